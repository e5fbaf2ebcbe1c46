//! Pointer-publication helpers (component I, spec.md §4.9).
//!
//! These are the primitives writers and readers use to hand pointers to
//! each other across the RCU/HPREF boundary: a writer `set_pointer`s a
//! new value with release ordering (so a reader that later loads it with
//! `dereference` sees every write the writer made before publishing), and
//! a writer `xchg_pointer`/`cmpxchg_pointer`s to unlink a node before
//! handing it to a grace period.

use std::sync::atomic::{AtomicPtr, Ordering};

use crate::sys::fence;

/// Publish `value` into `slot` with release ordering, so that any
/// concurrent [`dereference`] that observes the new value also observes
/// every write the publisher made before this call. Storing `NULL` is
/// the one exception spec.md calls out as safe to do with relaxed
/// ordering (there is nothing behind a null pointer to synchronize with).
#[inline]
pub fn set_pointer<T>(slot: &AtomicPtr<T>, value: *mut T) {
    if value.is_null() {
        slot.store(value, Ordering::Relaxed);
    } else {
        slot.store(value, Ordering::Release);
    }
}

/// Load the pointer currently published in `slot` with acquire ordering,
/// establishing happens-before with the [`set_pointer`] (or
/// [`xchg_pointer`]/[`cmpxchg_pointer`]) call that produced the observed
/// value.
///
/// On architectures that honor address dependencies a real consume
/// ordering would be cheaper than acquire; `core::sync::atomic` does not
/// expose `Consume`, so this crate always pays for the (stronger,
/// portable) acquire fence, matching upstream's documented fallback for
/// "non-DEC architectures."
#[inline]
pub fn dereference<T>(slot: &AtomicPtr<T>) -> *mut T {
    slot.load(Ordering::Acquire)
}

/// Atomically replace the pointer in `slot`, returning the previous
/// value, with a write-memory fence preceding the exchange as spec.md
/// §4.9 requires.
#[inline]
pub fn xchg_pointer<T>(slot: &AtomicPtr<T>, value: *mut T) -> *mut T {
    fence::fence_release();
    slot.swap(value, Ordering::AcqRel)
}

/// Compare-and-swap `slot` from `current` to `new`, with the same
/// preceding write-memory fence as [`xchg_pointer`]. Returns `Ok(current)`
/// on success or `Err(actual)` on failure.
#[inline]
pub fn cmpxchg_pointer<T>(
    slot: &AtomicPtr<T>,
    current: *mut T,
    new: *mut T,
) -> Result<*mut T, *mut T> {
    fence::fence_release();
    slot.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn set_then_dereference_round_trips() {
        let mut value = 42i32;
        let slot: AtomicPtr<i32> = AtomicPtr::new(ptr::null_mut());
        set_pointer(&slot, &mut value as *mut i32);
        let observed = dereference(&slot);
        assert_eq!(unsafe { *observed }, 42);
    }

    #[test]
    fn xchg_returns_previous_value() {
        let mut a = 1i32;
        let mut b = 2i32;
        let slot = AtomicPtr::new(&mut a as *mut i32);
        let prev = xchg_pointer(&slot, &mut b as *mut i32);
        assert_eq!(prev, &mut a as *mut i32);
        assert_eq!(dereference(&slot), &mut b as *mut i32);
    }

    #[test]
    fn cmpxchg_fails_on_mismatch() {
        let mut a = 1i32;
        let mut b = 2i32;
        let mut c = 3i32;
        let slot = AtomicPtr::new(&mut a as *mut i32);
        let result = cmpxchg_pointer(&slot, &mut b as *mut i32, &mut c as *mut i32);
        assert_eq!(result, Err(&mut a as *mut i32));
    }

    #[test]
    fn cmpxchg_succeeds_on_match() {
        let mut a = 1i32;
        let mut c = 3i32;
        let slot = AtomicPtr::new(&mut a as *mut i32);
        let result = cmpxchg_pointer(&slot, &mut a as *mut i32, &mut c as *mut i32);
        assert_eq!(result, Ok(&mut a as *mut i32));
        assert_eq!(dereference(&slot), &mut c as *mut i32);
    }
}
