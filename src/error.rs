//! Error types for the narrow set of conditions this crate is allowed to
//! surface as a `Result`.
//!
//! Per the misuse/capability/resource-exhaustion/transient taxonomy: misuse
//! conditions (double-registration, nesting overflow, destroying a
//! non-empty domain, ...) are programmer errors and always `panic!` rather
//! than appear here. Capability-absent conditions are silently degraded
//! and also never appear here — they only affect which code path runs.
//! This enum exists for the boundary where a syscall can genuinely fail in
//! a way the caller might want to observe (pool allocation at init) or
//! that is fatal and should be reported with context before aborting.

use thiserror::Error;

/// Errors produced at the few points where this crate's otherwise-total
/// API can fail.
#[derive(Debug, Error)]
pub enum ReclaimError {
    /// The per-CPU memory pool could not be allocated at domain
    /// construction time. The process constructor treats this as fatal.
    #[error("failed to allocate per-CPU pool for {cpus} CPUs: {source}")]
    PoolAllocation {
        /// Number of per-CPU slots the pool tried to allocate.
        cpus: usize,
        /// Underlying allocation failure.
        #[source]
        source: std::collections::TryReserveError,
    },

    /// A `futex(2)` wait returned an error other than `EINTR`/`EAGAIN`.
    /// Per spec this is a fatal system-call failure; the crate panics
    /// after constructing this value for the panic message.
    #[error("futex wait failed: {0}")]
    FutexWait(#[source] std::io::Error),

    /// `membarrier(2)` is supported per `MEMBARRIER_CMD_QUERY` but the
    /// specific registration command this process needs was rejected for
    /// a reason other than "unsupported" (e.g. permission denied under a
    /// restrictive seccomp filter). Distinguished from ordinary
    /// capability-absence so callers doing their own diagnostics can tell
    /// "not present on this kernel" from "present but blocked."
    #[error("membarrier registration rejected: {0}")]
    MembarrierRejected(#[source] std::io::Error),
}
