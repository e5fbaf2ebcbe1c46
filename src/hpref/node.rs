//! Hazard-pointer-protected nodes (spec.md §3: "Node = {refcount,
//! release_callback}").
//!
//! A node's refcount tracks promotions from hazard-pointer to long-lived
//! reference (invariant I4); it starts at 1 for the owner's initial
//! reference, dropped via [`HpNode::synchronize_put`] in
//! [`crate::hpref::engine`]. The release callback runs exactly once, only
//! after the refcount has reached zero *and* the engine has confirmed no
//! hazard slot still advertises the node (spec.md lifecycles).

use std::sync::atomic::{AtomicUsize, Ordering};

/// A reclaimable node: a payload plus the bookkeeping HPREF needs to know
/// when it is safe to run the release callback.
pub struct HpNode<T> {
    refcount: AtomicUsize,
    value: Option<T>,
    release: Option<Box<dyn FnOnce(T) + Send>>,
}

impl<T> HpNode<T> {
    /// Allocate a new node with refcount 1 (the owner's initial
    /// reference) and the default release behavior of simply dropping
    /// the payload.
    pub fn new(value: T) -> *mut HpNode<T> {
        Self::with_release(value, |v| drop(v))
    }

    /// Allocate a new node with a custom release callback, e.g. to return
    /// the payload to a pool instead of dropping it.
    pub fn with_release(value: T, release: impl FnOnce(T) + Send + 'static) -> *mut HpNode<T> {
        Box::into_raw(Box::new(HpNode {
            refcount: AtomicUsize::new(1),
            value: Some(value),
            release: Some(Box::new(release)),
        }))
    }

    /// Borrow the payload. Safe as long as the caller holds a live
    /// hazard-pointer or reference-count context on this node.
    ///
    /// # Safety
    /// `ptr` must point to a still-live `HpNode<T>` (not yet released).
    pub unsafe fn value<'a>(ptr: *const HpNode<T>) -> &'a T {
        (*ptr).value.as_ref().expect("value accessed on a released node")
    }

    /// Increment the refcount. Used when promoting a hazard-pointer
    /// context to a reference-count context.
    ///
    /// # Safety
    /// `ptr` must point to a still-live `HpNode<T>`.
    pub unsafe fn incref(ptr: *mut HpNode<T>) {
        (*ptr).refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement the refcount; if it reaches zero, run the release
    /// callback and free the node. Returns `true` if this call released
    /// the node.
    ///
    /// # Safety
    /// `ptr` must point to a still-live `HpNode<T>`, and the caller must
    /// own exactly one of the references the refcount counts.
    pub unsafe fn decref(ptr: *mut HpNode<T>) -> bool {
        let previous = (*ptr).refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous >= 1, "refcount underflow on HpNode release");
        if previous == 1 {
            let mut boxed = Box::from_raw(ptr);
            let value = boxed.value.take().expect("value already taken");
            let release = boxed.release.take().expect("release already taken");
            release(value);
            true
        } else {
            false
        }
    }

    /// Current refcount, for diagnostics and tests.
    ///
    /// # Safety
    /// `ptr` must point to a still-live `HpNode<T>`.
    pub unsafe fn refcount(ptr: *const HpNode<T>) -> usize {
        (*ptr).refcount.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn release_runs_exactly_once_at_zero() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let node = HpNode::with_release(42i32, move |_| flag.store(true, Ordering::SeqCst));
        unsafe {
            assert_eq!(HpNode::refcount(node), 1);
            HpNode::incref(node);
            assert_eq!(HpNode::refcount(node), 2);
            assert!(!HpNode::decref(node));
            assert!(!released.load(Ordering::SeqCst));
            assert!(HpNode::decref(node));
            assert!(released.load(Ordering::SeqCst));
        }
    }

    #[test]
    fn default_release_just_drops() {
        let node = HpNode::new(String::from("payload"));
        unsafe {
            assert_eq!(HpNode::value(node), "payload");
            assert!(HpNode::decref(node));
        }
    }
}
