//! Smart-pointer facade over the hazard-pointer engine (component G,
//! spec.md §4.10): `init`, `copy`, `hp_dereference_copy`, `clear`.
//!
//! `Ref<T>` is an owned, refcounted handle — the counted-reference half
//! of the engine wrapped in an RAII type, so callers who only ever want
//! "smart pointer" semantics don't need to juggle [`HpContext`] directly.

use std::sync::atomic::{AtomicPtr, Ordering};

use super::engine::HprefDomain;
use super::node::HpNode;

/// An owned, refcounted reference to a node. Dropping it runs [`clear`]:
/// decrement the refcount, running the release callback on zero.
pub struct Ref<T> {
    node: *mut HpNode<T>,
}

unsafe impl<T: Send> Send for Ref<T> {}
unsafe impl<T: Sync> Sync for Ref<T> {}

impl<T> Ref<T> {
    /// `init(node, release)`: allocate a fresh node with refcount 1 and
    /// the given release callback.
    pub fn init(value: T, release: impl FnOnce(T) + Send + 'static) -> Self {
        Ref { node: HpNode::with_release(value, release) }
    }

    /// Borrow the payload.
    pub fn get(&self) -> &T {
        unsafe { HpNode::value(self.node) }
    }

    /// The underlying node pointer, for publishing into an `AtomicPtr`
    /// slot via [`crate::rcu::publish::set_pointer`] or for passing to
    /// [`HprefDomain::synchronize`].
    pub fn node_ptr(&self) -> *mut HpNode<T> {
        self.node
    }

    /// `copy(stable_ref) -> ref`: given a reference the caller already
    /// owns (not a racy raw pointer that might be concurrently freed),
    /// produce a second owned reference by incrementing the refcount.
    pub fn copy(&self) -> Self {
        unsafe { HpNode::incref(self.node) };
        Ref { node: self.node }
    }

    /// `clear(ref)`: drop the owned reference, running the release
    /// callback if this was the last one. Equivalent to `drop(self)`;
    /// provided under its spec name for API-table parity.
    pub fn clear(self) {
        drop(self);
    }
}

impl<T> Drop for Ref<T> {
    fn drop(&mut self) {
        unsafe {
            HpNode::decref(self.node);
        }
    }
}

/// `hp_dereference_copy(possibly-racy_ref) -> ref`: a hazard-protected
/// dereference of a publication slot, immediately promoted to an owned
/// counted reference. Returns `None` if the slot held `NULL`.
pub fn hp_dereference_copy<T>(
    domain: &HprefDomain,
    slot: &AtomicPtr<HpNode<T>>,
) -> Option<Ref<T>> {
    let mut ctx = domain.hp_get(slot)?;
    domain.hp_promote_to_ref(&mut ctx);
    Some(Ref { node: ctx.node_ptr() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn init_copy_clear_round_trip() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let a = Ref::init(10i32, move |_| flag.store(true, Ordering::SeqCst));
        let b = a.copy();
        assert_eq!(*a.get(), 10);
        assert_eq!(*b.get(), 10);
        drop(a);
        assert!(!released.load(Ordering::SeqCst));
        b.clear();
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn hp_dereference_copy_promotes_and_outlives_the_slot() {
        let domain = HprefDomain::new();
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let node = HpNode::with_release(99i32, move |_| flag.store(true, Ordering::SeqCst));
        let slot: AtomicPtr<HpNode<i32>> = AtomicPtr::new(node);

        let owned = hp_dereference_copy(&domain, &slot).expect("slot was populated");
        assert_eq!(*owned.get(), 99);

        slot.store(ptr::null_mut(), Ordering::Release);
        domain.synchronize_put(node);
        assert!(!released.load(Ordering::SeqCst), "owned ref still outstanding");

        owned.clear();
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn hp_dereference_copy_misses_on_null_slot() {
        let domain = HprefDomain::new();
        let slot: AtomicPtr<HpNode<i32>> = AtomicPtr::new(ptr::null_mut());
        assert!(hp_dereference_copy(&domain, &slot).is_none());
    }
}
