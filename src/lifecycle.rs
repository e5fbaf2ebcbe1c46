//! Process constructor/destructor hooks and fork-safety glue (component
//! J, spec.md §4.11).
//!
//! Process constructors force the one-time costs — the membarrier
//! capability probe, the default domains' per-CPU pool allocations — to
//! run at a predictable point instead of surprising the first caller.
//! The `pthread_atfork` child hook resets the state that does not survive
//! `fork(2)`: rseq registration is keyed by the kernel to the forking
//! thread's `(pid, tid)` pair, so the lone surviving thread in the child
//! must re-register before trusting its cached `cpu_id` again. Everything
//! else (registries, per-CPU counters) is thread-local, so it is moot:
//! only the forking thread survives into the child, and that thread's own
//! registrations remain valid since the underlying memory is copied, not
//! shared.

use std::sync::atomic::{AtomicBool, Ordering};

use ctor::{ctor, dtor};
use log::debug;
use once_cell::sync::Lazy;

use crate::hpref::DEFAULT_HPREF_DOMAIN;
use crate::rcu::{DEFAULT_PERCPU_DOMAIN, DEFAULT_QSBR_DOMAIN};
use crate::sys::membarrier;
use crate::sys::percpu;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

#[ctor]
fn on_process_start() {
    membarrier::capability_present();
    Lazy::force(&DEFAULT_PERCPU_DOMAIN);
    Lazy::force(&DEFAULT_QSBR_DOMAIN);
    Lazy::force(&DEFAULT_HPREF_DOMAIN);
    register_atfork_child_hook();
    INITIALIZED.store(true, Ordering::Release);
    debug!("concurrent_reclaim: process constructor ran");
}

#[dtor]
fn on_process_exit() {
    debug!("concurrent_reclaim: process destructor ran");
}

#[cfg(unix)]
fn register_atfork_child_hook() {
    extern "C" fn child_hook() {
        percpu::reset_after_fork();
    }
    unsafe {
        libc::pthread_atfork(None, None, Some(child_hook));
    }
}

#[cfg(not(unix))]
fn register_atfork_child_hook() {}

/// Whether the process constructor has run. Exposed for tests and for
/// embedders that want to assert the library initialized before spawning
/// reader threads.
pub fn initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_constructor_has_run() {
        assert!(initialized());
    }
}
