//! Hazard-pointer protected doubly-linked list (component H, spec.md
//! §4.8): two co-located heads per element, a reader-visible chain and a
//! writer-owned structural chain, with two-phase deletion — hide from
//! readers first, physically unlink only after a hazard-pointer
//! synchronize confirms no reader still holds the element.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use parking_lot::Mutex;

use super::engine::{HpContext, HprefDomain};
use super::node::HpNode;
use crate::rcu::publish::set_pointer;

/// One list element: the caller's payload plus the reader-head and
/// writer-head link pointers.
pub struct ListElem<T> {
    value: T,
    reader_next: AtomicPtr<HpNode<ListElem<T>>>,
    writer_next: AtomicPtr<HpNode<ListElem<T>>>,
    writer_prev: AtomicPtr<HpNode<ListElem<T>>>,
    hidden: AtomicBool,
}

impl<T> ListElem<T> {
    /// Borrow the payload stored in this element.
    pub fn value(&self) -> &T {
        &self.value
    }
}

/// A hazard-pointer protected list, owning its own [`HprefDomain`].
///
/// Structural writer operations (`push_back`, `hide`, `remove`) serialize
/// on an internal mutex, matching spec.md §5's "the registry mutex ...
/// acquired only by writers; readers never acquire a mutex."
pub struct HpList<T> {
    domain: HprefDomain,
    reader_head: AtomicPtr<HpNode<ListElem<T>>>,
    writer_head: AtomicPtr<HpNode<ListElem<T>>>,
    writer_tail: AtomicPtr<HpNode<ListElem<T>>>,
    writer_lock: Mutex<()>,
}

impl<T> Default for HpList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HpList<T> {
    /// Create an empty list with a fresh hazard-pointer domain.
    pub fn new() -> Self {
        HpList {
            domain: HprefDomain::new(),
            reader_head: AtomicPtr::new(ptr::null_mut()),
            writer_head: AtomicPtr::new(ptr::null_mut()),
            writer_tail: AtomicPtr::new(ptr::null_mut()),
            writer_lock: Mutex::new(()),
        }
    }

    /// The list's hazard-pointer domain, for callers that want to drive
    /// `synchronize` directly between `hide` and `remove`.
    pub fn domain(&self) -> &HprefDomain {
        &self.domain
    }

    /// Append `value` at the tail. Returns the new element's node
    /// pointer, to be passed to [`HpList::hide`] and [`HpList::remove`].
    pub fn push_back(&self, value: T) -> *mut HpNode<ListElem<T>> {
        let _guard = self.writer_lock.lock();
        let node = HpNode::new(ListElem {
            value,
            reader_next: AtomicPtr::new(ptr::null_mut()),
            writer_next: AtomicPtr::new(ptr::null_mut()),
            writer_prev: AtomicPtr::new(ptr::null_mut()),
            hidden: AtomicBool::new(false),
        });

        let tail = self.writer_tail.load(Ordering::Acquire);
        unsafe {
            HpNode::value(node).writer_prev.store(tail, Ordering::Relaxed);
        }
        if tail.is_null() {
            self.writer_head.store(node, Ordering::Release);
            set_pointer(&self.reader_head, node);
        } else {
            let tail_elem = unsafe { HpNode::value(tail) };
            tail_elem.writer_next.store(node, Ordering::Release);
            set_pointer(&tail_elem.reader_next, node);
        }
        self.writer_tail.store(node, Ordering::Release);
        node
    }

    /// Acquire a hazard pointer on the list's current reader head.
    pub fn hp_get_head(&self) -> Option<HpContext<ListElem<T>>> {
        self.domain.hp_get(&self.reader_head)
    }

    /// Acquire a hazard pointer on the reader-visible successor of the
    /// element `ctx` protects.
    pub fn hp_get_next(&self, ctx: &HpContext<ListElem<T>>) -> Option<HpContext<ListElem<T>>> {
        let next_slot = unsafe { &HpNode::value(ctx.node_ptr()).reader_next };
        self.domain.hp_get(next_slot)
    }

    /// Phase 1: hide `target` from readers. Walks backward over the
    /// writer chain through any already-hidden predecessors until a
    /// still-visible one is found, repointing every traversed
    /// predecessor's reader-next at `target`'s successor so a reader
    /// mid-traversal never lands on a dangling step.
    pub fn hide(&self, target: *mut HpNode<ListElem<T>>) {
        let _guard = self.writer_lock.lock();
        unsafe {
            let elem = HpNode::value(target);
            elem.hidden.store(true, Ordering::Release);
            let successor = elem.reader_next.load(Ordering::Acquire);

            let mut pred = elem.writer_prev.load(Ordering::Acquire);
            while !pred.is_null() {
                let pred_elem = HpNode::value(pred);
                set_pointer(&pred_elem.reader_next, successor);
                if !pred_elem.hidden.load(Ordering::Acquire) {
                    break;
                }
                pred = pred_elem.writer_prev.load(Ordering::Acquire);
            }
            if pred.is_null() {
                set_pointer(&self.reader_head, successor);
            }
        }
    }

    /// Phase 2: physically unlink `target` from the writer chain. The
    /// caller must have already called `domain().synchronize(target)` (or
    /// `synchronize_put`) since `hide` so that no hazard pointer still
    /// advertises it, per spec.md invariant I4 / Property P7.
    pub fn remove(&self, target: *mut HpNode<ListElem<T>>) {
        let _guard = self.writer_lock.lock();
        unsafe {
            let elem = HpNode::value(target);
            let prev = elem.writer_prev.load(Ordering::Acquire);
            let next = elem.writer_next.load(Ordering::Acquire);

            if !prev.is_null() {
                HpNode::value(prev).writer_next.store(next, Ordering::Release);
            } else {
                self.writer_head.store(next, Ordering::Release);
            }
            if !next.is_null() {
                HpNode::value(next).writer_prev.store(prev, Ordering::Release);
            } else {
                self.writer_tail.store(prev, Ordering::Release);
            }
        }
        unsafe {
            HpNode::decref(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_traverse_in_order() {
        let list: HpList<i32> = HpList::new();
        list.push_back(1);
        list.push_back(2);
        list.push_back(3);

        let mut seen = Vec::new();
        let mut ctx = list.hp_get_head();
        while let Some(c) = ctx {
            seen.push(*c.get().value());
            ctx = list.hp_get_next(&c);
            list.domain().hp_put(c);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn hide_then_remove_skips_the_hidden_element() {
        let list: HpList<char> = HpList::new();
        let a = list.push_back('a');
        let b = list.push_back('b');
        let c = list.push_back('c');
        let d = list.push_back('d');

        // A reader parks a hazard pointer on `c` before either hide.
        let ctx_a = list.hp_get_head().unwrap();
        let ctx_b = list.hp_get_next(&ctx_a).unwrap();
        let ctx_c = list.hp_get_next(&ctx_b).unwrap();
        assert_eq!(*ctx_c.get().value(), 'c');
        list.domain().hp_put(ctx_a);
        list.domain().hp_put(ctx_b);

        list.hide(b);
        list.hide(c);

        // The reader's view of `c`'s successor must still be `d`.
        let next_of_c = list.hp_get_next(&ctx_c).unwrap();
        assert_eq!(*next_of_c.get().value(), 'd');
        list.domain().hp_put(next_of_c);
        list.domain().hp_put(ctx_c);

        list.domain().synchronize(b);
        list.domain().synchronize(c);
        list.remove(b);
        list.remove(c);

        let mut seen = Vec::new();
        let mut ctx = list.hp_get_head();
        while let Some(node) = ctx {
            seen.push(*node.get().value());
            ctx = list.hp_get_next(&node);
            list.domain().hp_put(node);
        }
        assert_eq!(seen, vec!['a', 'd']);

        let _ = a;
        let _ = d;
    }
}
