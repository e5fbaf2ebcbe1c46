//! # Concurrent Reclaim
//!
//! RCU (read-copy-update) and hazard-pointer/reference-count memory
//! reclamation for lock-free readers, ported from the synchronization
//! core of [userspace-rcu](https://liburcu.org/).
//!
//! Two independent reclamation strategies are provided, matched to
//! different workloads:
//!
//! - [`rcu`] — grace-period reclamation. Readers bracket critical
//!   sections with `read_lock`/`read_unlock` (or, in the QSBR flavor,
//!   periodically declare a quiescent state); a writer's `synchronize()`
//!   blocks until every critical section active at the time of the call
//!   has ended, at which point anything unpublished before the call is
//!   safe to free.
//! - [`hpref`] — hazard pointers with reference-count fallback. Readers
//!   advertise the specific node they hold in a per-CPU slot; a writer's
//!   `synchronize(node, ...)` waits only for that node's slots to clear,
//!   letting unrelated readers proceed undisturbed.
//!
//! ## Module Organization
//!
//! ### Foundation
//! - [`error`] - The narrow error taxonomy surfaced by this crate
//! - [`sys`] - Host capabilities: fences, membarrier, futex, per-CPU pools
//!
//! ### Core Primitives
//! - [`sync`] - Backoff and FIFO-coalescing waiter queues shared by both engines
//!
//! ### Reclamation engines
//! - [`rcu`] - Grace-period reclamation (per-CPU and QSBR flavors) and pointer publication
//! - [`hpref`] - Hazard pointers, reference-count promotion, and the protected list
//!
//! ### Process integration
//! - [`lifecycle`] - Process constructor/destructor hooks and fork safety
//!
//! Each domain type ([`rcu::percpu_flavor::RcuDomain`],
//! [`rcu::qsbr::RcuDomain`], [`hpref::HprefDomain`]) is an independent,
//! explicitly-owned instance; a process-wide default of each is also
//! available for single-domain programs ([`rcu::DEFAULT_PERCPU_DOMAIN`],
//! [`rcu::DEFAULT_QSBR_DOMAIN`], [`hpref::DEFAULT_HPREF_DOMAIN`]).

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::module_inception)]

// =============================================================================
// Tier 0: Foundation (no internal dependencies)
// =============================================================================

/// The narrow error taxonomy this crate surfaces (spec.md §7): only
/// resource exhaustion and fatal system-call failure ever return
/// `Result`. Misuse aborts; capability-absence falls back silently;
/// transient fast-path contention retries internally.
pub mod error;

/// Host capabilities: memory fences, the membarrier master fence, futex
/// wait/wake, and per-CPU memory pools with the restartable-sequence fast
/// path.
pub mod sys;

// =============================================================================
// Tier 1: Core primitives (depends on tier 0)
// =============================================================================

/// Exponential backoff and FIFO-coalescing waiter queues, shared by the
/// RCU and HPREF grace-period/synchronize implementations.
pub mod sync;

// =============================================================================
// Tier 2: Reclamation engines (depends on tiers 0-1)
// =============================================================================

/// RCU with grace periods: per-CPU-counter and QSBR flavors, plus the
/// pointer-publication helpers both engines and callers share.
pub mod rcu;

/// Hazard pointers with reference-count fallback: the slot-array engine,
/// the smart-pointer facade, and the hazard-pointer protected list.
pub mod hpref;

// =============================================================================
// Tier 3: Process integration (depends on tiers 0-2)
// =============================================================================

/// Process constructor/destructor hooks and fork-safety glue.
pub mod lifecycle;

pub use error::ReclaimError;
