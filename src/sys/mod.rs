//! Host capabilities consumed by the reclamation engines: atomics and
//! fences (component A), the membarrier master fence (component B), the
//! per-CPU fast path and memory pool (component C), and the futex-backed
//! waiter channel used by [`crate::sync::waiter`].

pub mod fence;
pub mod futex;
pub mod membarrier;
pub mod percpu;
