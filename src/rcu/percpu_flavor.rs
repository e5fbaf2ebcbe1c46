//! Grace-period engine, per-CPU counter flavor (component E/per-CPU,
//! spec.md §4.5).
//!
//! Readers pay a per-CPU counter increment on `read_lock`/`read_unlock`;
//! writers drain by summing those counters across every CPU. This is the
//! "cheap reader, synchronize does the work" flavor, appropriate for
//! read-heavy workloads where `synchronize()` is rare.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use log::trace;
use parking_lot::Mutex;

use crate::sync::backoff::Backoff;
use crate::sync::waiter::{Role, WaiterQueue};
use crate::sys::fence;
use crate::sys::futex;
use crate::sys::membarrier::master_fence;
use crate::sys::percpu::{with_current_cpu, PerCpu};

/// Per-CPU lock/unlock counter pair for one phase.
#[derive(Default)]
struct PhaseCounters {
    lock: AtomicU64,
    unlock: AtomicU64,
}

/// Per-CPU state: one counter pair per phase (spec.md §3: "two counter
/// pairs ... one per phase").
#[derive(Default)]
struct PerCpuCounters {
    phases: [PhaseCounters; 2],
}

thread_local! {
    // A stack of phases entered by this thread, one entry per currently
    // open (possibly nested) critical section on a given domain. Keyed
    // by domain address so one thread can hold critical sections open on
    // several domains concurrently.
    static LOCK_STACKS: RefCell<std::collections::HashMap<usize, Vec<u32>>> =
        RefCell::new(std::collections::HashMap::new());
    static REGISTERED: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
}

/// An independent RCU domain using the per-CPU counter flavor.
///
/// Multiple domains may coexist in one process (spec.md §3: "lifecycles
/// ... a domain is created ... lives until destroy").
pub struct RcuDomain {
    phase: AtomicU32,
    percpu: PerCpu<PerCpuCounters>,
    grace_period_mutex: Mutex<()>,
    waiter: WaiterQueue,
    waiting_writers: AtomicUsize,
    futex_word: AtomicU32,
    registered_count: AtomicUsize,
}

impl Default for RcuDomain {
    fn default() -> Self {
        Self::new()
    }
}

impl RcuDomain {
    /// Create a new domain with its phase counter at the baseline.
    pub fn new() -> Self {
        let percpu = PerCpu::try_new_with(|_| PerCpuCounters::default())
            .expect("failed to allocate per-CPU RCU counters");
        RcuDomain {
            phase: AtomicU32::new(0),
            percpu,
            grace_period_mutex: Mutex::new(()),
            waiter: WaiterQueue::new(),
            waiting_writers: AtomicUsize::new(0),
            futex_word: AtomicU32::new(0),
            registered_count: AtomicUsize::new(0),
        }
    }

    fn domain_key(&self) -> usize {
        self as *const Self as usize
    }

    /// Register the calling thread as a reader of this domain. Idempotent
    /// registration is rejected as misuse, matching spec.md §7.
    pub fn register_thread(&self) {
        let key = self.domain_key();
        REGISTERED.with(|set| {
            let mut set = set.borrow_mut();
            assert!(set.insert(key), "thread double-registered on RCU domain");
        });
        self.registered_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Unregister the calling thread. Asserts it was registered and holds
    /// no open critical section.
    pub fn unregister_thread(&self) {
        let key = self.domain_key();
        REGISTERED.with(|set| {
            let mut set = set.borrow_mut();
            assert!(set.remove(&key), "unregistering a thread not registered on this domain");
        });
        LOCK_STACKS.with(|stacks| {
            let stacks = stacks.borrow();
            if let Some(stack) = stacks.get(&key) {
                assert!(stack.is_empty(), "unregistering thread with an open critical section");
            }
        });
        self.registered_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Destroy the domain. Asserts the registry is empty, per spec.md §3.
    pub fn destroy(self) {
        assert_eq!(
            self.registered_count.load(Ordering::Acquire),
            0,
            "destroying RCU domain with registered readers still present"
        );
    }

    fn assert_registered(&self) {
        let key = self.domain_key();
        let ok = REGISTERED.with(|set| set.borrow().contains(&key));
        assert!(ok, "RCU critical section entered on an unregistered thread");
    }

    /// Enter a critical section, returning a guard that exits it on drop.
    pub fn read_lock(&self) -> ReadGuard<'_> {
        self.assert_registered();
        let phase = self.phase.load(Ordering::Acquire) as usize;
        with_current_cpu(self.percpu.len(), |cpu| {
            self.percpu.get(cpu).phases[phase].lock.fetch_add(1, Ordering::Relaxed);
        });
        // "slave fence": cheap on the reader side, paired with the
        // writer's expensive master fence.
        fence::fence_acquire();
        let key = self.domain_key();
        LOCK_STACKS.with(|stacks| {
            stacks.borrow_mut().entry(key).or_default().push(phase as u32);
        });
        ReadGuard { domain: self }
    }

    fn read_unlock(&self) {
        let key = self.domain_key();
        let phase = LOCK_STACKS.with(|stacks| {
            let mut stacks = stacks.borrow_mut();
            let stack = stacks.get_mut(&key).expect("read_unlock without matching read_lock");
            stack.pop().expect("read_unlock without matching read_lock") as usize
        });
        fence::fence_release();
        with_current_cpu(self.percpu.len(), |cpu| {
            self.percpu.get(cpu).phases[phase].unlock.fetch_add(1, Ordering::Relaxed);
        });
        if self.waiting_writers.load(Ordering::Relaxed) > 0 {
            self.futex_word.fetch_add(1, Ordering::Release);
            futex::wake(&self.futex_word, i32::MAX);
        }
    }

    /// True iff the calling thread currently holds an open critical
    /// section on this domain.
    pub fn read_ongoing(&self) -> bool {
        let key = self.domain_key();
        LOCK_STACKS.with(|stacks| {
            stacks.borrow().get(&key).map(|s| !s.is_empty()).unwrap_or(false)
        })
    }

    fn sum_for_phase(&self, phase: usize) -> i64 {
        let mut sum: i64 = 0;
        for counters in self.percpu.iter() {
            // Read unlock before lock so a reader that migrates mid
            // critical-section can never be observed as "unlocked
            // without its earlier lock".
            let unlock = counters.phases[phase].unlock.load(Ordering::Acquire);
            let lock = counters.phases[phase].lock.load(Ordering::Acquire);
            sum += lock as i64 - unlock as i64;
        }
        sum
    }

    fn drain(&self, phase: usize) {
        let mut backoff = Backoff::new();
        loop {
            if self.sum_for_phase(phase) == 0 {
                return;
            }
            if !backoff.is_maxed() {
                backoff.spin();
                continue;
            }
            self.waiting_writers.fetch_add(1, Ordering::SeqCst);
            if self.sum_for_phase(phase) == 0 {
                self.waiting_writers.fetch_sub(1, Ordering::SeqCst);
                return;
            }
            let generation = self.futex_word.load(Ordering::Acquire);
            futex::wait(&self.futex_word, generation);
            self.waiting_writers.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Block until every critical section that began strictly before this
    /// call has ended (spec.md invariant I2).
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
        let _guard = self.grace_period_mutex.lock();
        master_fence();

        let current = self.phase.load(Ordering::Acquire) as usize;
        let prev = 1 - current;

        trace!("synchronize: draining prior phase {prev}");
        self.drain(prev);

        fence::barrier();
        master_fence();
        self.phase.store(prev as u32, Ordering::Release);

        trace!("synchronize: draining flipped phase {current}");
        self.drain(current);

        master_fence();
    }
}

/// RAII guard for a per-CPU-flavor critical section; dropping it calls
/// `read_unlock`.
pub struct ReadGuard<'a> {
    domain: &'a RcuDomain,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.domain.read_unlock();
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
    fn register_then_critical_section_then_unregister() {
        let domain = RcuDomain::new();
        domain.register_thread();
        assert!(!domain.read_ongoing());
        {
            let _g = domain.read_lock();
            assert!(domain.read_ongoing());
        }
        assert!(!domain.read_ongoing());
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
    #[should_panic(expected = "unregistered thread")]
    fn unregistered_reader_panics() {
        let domain = RcuDomain::new();
        let _g = domain.read_lock();
    }

    #[test]
    fn nested_critical_sections_are_supported() {
        let domain = RcuDomain::new();
        domain.register_thread();
        {
            let _outer = domain.read_lock();
            {
                let _inner = domain.read_lock();
                assert!(domain.read_ongoing());
            }
            assert!(domain.read_ongoing());
        }
        assert!(!domain.read_ongoing());
        domain.unregister_thread();
    }

    #[test]
    fn synchronize_waits_for_active_reader() {
        let domain = Arc::new(RcuDomain::new());
        domain.register_thread();
        let reader_entered = Arc::new(AtomicBool::new(false));
        let reader_may_exit = Arc::new(AtomicBool::new(false));

        let d = domain.clone();
        let entered = reader_entered.clone();
        let may_exit = reader_may_exit.clone();
        let reader = thread::spawn(move || {
            d.register_thread();
            let _g = d.read_lock();
            entered.store(true, Ordering::SeqCst);
            while !may_exit.load(Ordering::SeqCst) {
                thread::yield_now();
            }
            d.unregister_thread();
        });

        while !reader_entered.load(Ordering::SeqCst) {
            thread::yield_now();
        }

        let d2 = domain.clone();
        let writer = thread::spawn(move || {
            d2.synchronize();
        });

        thread::sleep(Duration::from_millis(20));
        reader_may_exit.store(true, Ordering::SeqCst);

        writer.join().unwrap();
        reader.join().unwrap();
        domain.unregister_thread();
    }

    #[test]
    fn concurrent_writers_all_return() {
        let domain = Arc::new(RcuDomain::new());
        let mut handles = Vec::new();
        for _ in 0..6 {
            let d = domain.clone();
            handles.push(thread::spawn(move || d.synchronize()));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
