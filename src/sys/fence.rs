//! Atomic load/store/CAS primitives and memory fences (component A).
//!
//! This mirrors the teacher crate's `pr` module: thin, inlined wrappers
//! around `core::sync::atomic` that give the rest of the crate a small,
//! named vocabulary of orderings (`relaxed`, `acquire`, `release`, `cas`,
//! `full fence`) instead of spelling out `Ordering::*` at every call site.
//! `master_fence` itself lives in [`crate::sys::membarrier`]; this module
//! only provides the single-thread-local fence flavors.

use core::sync::atomic::{fence, compiler_fence, Ordering};

/// Compiler barrier only — no hardware fence.
#[inline(always)]
pub fn barrier() {
    compiler_fence(Ordering::SeqCst);
}

/// Acquire fence: operations before this cannot be reordered after it.
#[inline(always)]
pub fn fence_acquire() {
    fence(Ordering::Acquire);
}

/// Release fence: operations after this cannot be reordered before it.
#[inline(always)]
pub fn fence_release() {
    fence(Ordering::Release);
}

/// Acquire-release fence.
#[inline(always)]
pub fn fence_acqrel() {
    fence(Ordering::AcqRel);
}

/// Full sequentially-consistent fence. The local half of a "slave" fence
/// pair, or the whole of a degraded `master_fence` when membarrier is
/// unavailable.
#[inline(always)]
pub fn fence_full() {
    fence(Ordering::SeqCst);
}

/// CPU pause/stall hint for spin loops.
#[inline(always)]
pub fn stall() {
    core::hint::spin_loop();
}

pub use core::sync::atomic::{
    AtomicBool, AtomicPtr, AtomicU32, AtomicU64, AtomicUsize,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_do_not_panic() {
        barrier();
        fence_acquire();
        fence_release();
        fence_acqrel();
        fence_full();
        stall();
    }
}
