//! RCU with grace periods (component E), in two flavors that share the
//! same synchronization algebra but trade off read-side cost against
//! writer cost differently:
//!
//! - [`percpu_flavor`] — cheap `synchronize()`, a per-CPU counter
//!   increment on every `read_lock`/`read_unlock`.
//! - [`qsbr`] — free `read_lock`/`read_unlock`, at the cost of readers
//!   needing to call `quiescent_state()` between critical sections.
//!
//! Each flavor is its own namespace with its own [`percpu_flavor::RcuDomain`]
//! / [`qsbr::RcuDomain`] type, matching spec.md §6: "Flavors are selected
//! at link time by naming convention; each flavor is its own namespace so
//! multiple flavors coexist in one process."

pub mod percpu_flavor;
pub mod publish;
pub mod qsbr;

use once_cell::sync::Lazy;

/// Process-wide default per-CPU-flavor domain, for callers who don't need
/// multiple independent domains (component L).
pub static DEFAULT_PERCPU_DOMAIN: Lazy<percpu_flavor::RcuDomain> =
    Lazy::new(percpu_flavor::RcuDomain::new);

/// Process-wide default QSBR-flavor domain (component L).
pub static DEFAULT_QSBR_DOMAIN: Lazy<qsbr::RcuDomain> = Lazy::new(qsbr::RcuDomain::new);
