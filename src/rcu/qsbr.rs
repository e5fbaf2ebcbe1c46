//! Grace-period engine, quiescent-state-based flavor (component E/QSBR,
//! spec.md §4.6).
//!
//! Readers never touch a counter inside their critical sections; instead
//! they periodically announce a quiescent state between critical
//! sections. This is the "free reader, writer walks a registry" flavor:
//! cheaper than the per-CPU flavor for readers, at the cost of requiring
//! every reader thread to call `quiescent_state()` regularly (a reader
//! that never does will livelock exactly one writer, per spec.md §5).

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::sync::backoff::Backoff;
use crate::sync::waiter::{Role, WaiterQueue};
use crate::sys::membarrier::master_fence;

/// A registered reader's quiescent-state counter (spec.md §3: "`ctr`
/// word: `0` means offline / quiescent; otherwise it equals the
/// grace-period counter seen most recently by this reader").
struct ReaderDescriptor {
    ctr: AtomicU64,
}

impl ReaderDescriptor {
    fn new() -> Self {
        Self { ctr: AtomicU64::new(0) }
    }
}

thread_local! {
    static READERS: RefCell<HashMap<usize, Arc<ReaderDescriptor>>> = RefCell::new(HashMap::new());
}

/// An independent RCU domain using the QSBR flavor.
pub struct RcuDomain {
    counter: AtomicU64,
    registry: Mutex<Vec<Arc<ReaderDescriptor>>>,
    grace_period_mutex: Mutex<()>,
    waiter: WaiterQueue,
}

impl Default for RcuDomain {
    fn default() -> Self {
        Self::new()
    }
}

impl RcuDomain {
    /// Create a new QSBR domain. The counter starts at 1 so that `0`
    /// unambiguously means "offline" for every registered reader.
    pub fn new() -> Self {
        RcuDomain {
            counter: AtomicU64::new(1),
            registry: Mutex::new(Vec::new()),
            grace_period_mutex: Mutex::new(()),
            waiter: WaiterQueue::new(),
        }
    }

    fn domain_key(&self) -> usize {
        self as *const Self as usize
    }

    fn descriptor(&self) -> Option<Arc<ReaderDescriptor>> {
        let key = self.domain_key();
        READERS.with(|r| r.borrow().get(&key).cloned())
    }

    /// Register the calling thread, starting it online at the current
    /// counter value.
    pub fn register_thread(&self) {
        let key = self.domain_key();
        let already = READERS.with(|r| r.borrow().contains_key(&key));
        assert!(!already, "thread double-registered on RCU domain");
        let descriptor = Arc::new(ReaderDescriptor::new());
        descriptor.ctr.store(self.counter.load(Ordering::Acquire), Ordering::Release);
        self.registry.lock().push(descriptor.clone());
        READERS.with(|r| r.borrow_mut().insert(key, descriptor));
    }

    /// Unregister the calling thread, removing it from the registry.
    ///
    /// Goes offline first: a writer's `run_grace_period` may already hold
    /// a snapshot of the registry (including this reader's descriptor)
    /// taken before this call. Once the descriptor is removed from
    /// `registry`, nothing else will ever touch its `ctr` again, so if it
    /// was left at a stale ACTIVE_OLD value that writer would spin
    /// forever waiting on a reader that no longer exists.
    pub fn unregister_thread(&self) {
        self.thread_offline();
        let key = self.domain_key();
        let descriptor = READERS
            .with(|r| r.borrow_mut().remove(&key))
            .expect("unregistering a thread not registered on this domain");
        let mut registry = self.registry.lock();
        let pos = registry
            .iter()
            .position(|d| Arc::ptr_eq(d, &descriptor))
            .expect("reader descriptor missing from registry");
        registry.remove(pos);
    }

    /// Destroy the domain. Asserts the registry is empty.
    pub fn destroy(self) {
        assert!(self.registry.lock().is_empty(), "destroying QSBR domain with readers still registered");
    }

    /// Read-side critical sections are no-ops for QSBR; provided for API
    /// symmetry with the per-CPU flavor (spec.md §6: "QSBR treats
    /// lock/unlock as no-ops").
    pub fn read_lock(&self) {}

    /// See [`RcuDomain::read_lock`].
    pub fn read_unlock(&self) {}

    /// True iff the calling thread is registered and currently online.
    pub fn read_ongoing(&self) -> bool {
        match self.descriptor() {
            Some(d) => d.ctr.load(Ordering::Acquire) != 0,
            None => false,
        }
    }

    /// Announce that the calling thread holds no live references right
    /// now. This is the QSBR equivalent of `read_unlock` followed
    /// immediately by a fresh `read_lock`: it lets a pending
    /// `synchronize()` progress without the thread going fully offline.
    pub fn quiescent_state(&self) {
        let descriptor = self.descriptor().expect("quiescent_state on an unregistered thread");
        descriptor.ctr.store(self.counter.load(Ordering::Acquire), Ordering::Release);
    }

    /// Go offline: the thread holds no references and will not call
    /// `quiescent_state` again until `thread_online`.
    pub fn thread_online(&self) {
        let descriptor = self.descriptor().expect("thread_online on an unregistered thread");
        descriptor.ctr.store(self.counter.load(Ordering::Acquire), Ordering::Release);
    }

    /// Go offline (spec.md §3: "`thread_offline()` stores 0").
    pub fn thread_offline(&self) {
        let descriptor = self.descriptor().expect("thread_offline on an unregistered thread");
        descriptor.ctr.store(0, Ordering::Release);
    }

    /// Block until every reader that was online before this call has
    /// since been observed quiescent (offline, or caught up to the new
    /// counter value).
    pub fn synchronize(&self) {
        match self.waiter.join() {
            Role::Leader(node) => {
                self.run_grace_period();
                self.waiter.finish_as_leader(&node);
            }
            Role::Follower(node) => {
                self.waiter.wait_for_leader(&node);
            }
        }
    }

    fn run_grace_period(&self) {
        // A writer that is itself a registered reader must go offline
        // first, or it would wait on itself forever.
        let self_descriptor = self.descriptor();
        let was_online = self_descriptor.as_ref().map(|d| d.ctr.load(Ordering::Acquire) != 0).unwrap_or(false);
        if was_online {
            self.thread_offline();
        }

        let _guard = self.grace_period_mutex.lock();
        master_fence();

        let new_value = self.counter.fetch_add(1, Ordering::AcqRel) + 1;

        let mut pending: Vec<Arc<ReaderDescriptor>> = self.registry.lock().clone();
        let mut backoff = Backoff::new();
        loop {
            pending.retain(|reader| {
                let ctr = reader.ctr.load(Ordering::Acquire);
                // INACTIVE (0) or ACTIVE_CURRENT (== new_value) are
                // quiescent; ACTIVE_OLD is anything else and keeps the
                // reader in the pending list.
                !(ctr == 0 || ctr == new_value)
            });
            if pending.is_empty() {
                break;
            }
            trace!("qsbr synchronize: {} reader(s) still active-old", pending.len());
            backoff.spin();
        }

        master_fence();

        if was_online {
            self.thread_online();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn register_online_offline_unregister() {
        let domain = RcuDomain::new();
        domain.register_thread();
        assert!(domain.read_ongoing());
        domain.thread_offline();
        assert!(!domain.read_ongoing());
        domain.thread_online();
        assert!(domain.read_ongoing());
        domain.unregister_thread();
        domain.destroy();
    }

    #[test]
    #[should_panic(expected = "double-registered")]
    fn double_registration_panics() {
        let domain = RcuDomain::new();
        domain.register_thread();
        domain.register_thread();
    }

    #[test]
    fn synchronize_waits_for_active_old_reader() {
        let domain = Arc::new(RcuDomain::new());
        domain.register_thread();

        let reader_caught_up = Arc::new(AtomicBool::new(false));
        let d = domain.clone();
        let caught_up = reader_caught_up.clone();
        let reader = thread::spawn(move || {
            d.register_thread();
            // Stay "active-old" for a little while before calling
            // quiescent_state, simulating a reader mid-traversal.
            thread::sleep(Duration::from_millis(15));
            d.quiescent_state();
            caught_up.store(true, Ordering::SeqCst);
            d.unregister_thread();
        });

        let d2 = domain.clone();
        let writer = thread::spawn(move || d2.synchronize());

        writer.join().unwrap();
        assert!(reader_caught_up.load(Ordering::SeqCst));
        reader.join().unwrap();
        domain.unregister_thread();
    }

    #[test]
    fn offline_reader_does_not_block_synchronize() {
        let domain = Arc::new(RcuDomain::new());
        domain.register_thread();
        domain.thread_offline();

        let d = domain.clone();
        let writer = thread::spawn(move || d.synchronize());
        writer.join().unwrap();

        domain.thread_online();
        domain.unregister_thread();
    }

    #[test]
    fn writer_that_is_also_a_reader_does_not_self_wait() {
        let domain = RcuDomain::new();
        domain.register_thread();
        domain.synchronize();
        domain.unregister_thread();
    }

    // Regression: a reader that unregisters while still ACTIVE_OLD (never
    // having called quiescent_state since registering) must not leave a
    // concurrent writer's registry snapshot stuck waiting on a descriptor
    // whose ctr will now never change again.
    #[test]
    fn unregister_of_an_active_old_reader_does_not_stall_a_concurrent_writer() {
        let domain = Arc::new(RcuDomain::new());
        domain.register_thread();

        let reader_registered = Arc::new(AtomicBool::new(false));
        let d = domain.clone();
        let registered = reader_registered.clone();
        let reader = thread::spawn(move || {
            d.register_thread();
            registered.store(true, Ordering::SeqCst);
            // Unregister directly, without ever calling quiescent_state,
            // while still potentially ACTIVE_OLD from the writer's point
            // of view.
            d.unregister_thread();
        });

        while !reader_registered.load(Ordering::SeqCst) {
            thread::yield_now();
        }

        let d2 = domain.clone();
        let writer = thread::spawn(move || d2.synchronize());
        writer.join().unwrap();
        reader.join().unwrap();
        domain.unregister_thread();
    }
}
