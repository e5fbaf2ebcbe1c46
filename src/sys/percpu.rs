//! Per-CPU fast path and per-CPU memory pools (component C).
//!
//! Provides three things:
//!
//! 1. [`possible_cpus`] — how many per-CPU slots to allocate.
//! 2. [`PerCpu`] — a cache-line-padded per-CPU memory pool allocator.
//! 3. [`current_cpu`] and the `rseq_*` helpers — the restartable fast
//!    path primitives from spec.md §4.3.
//!
//! ## On the restartable sequence simplification
//!
//! The upstream design uses a true kernel-assisted restartable critical
//! section (hand-written per-architecture assembly that the kernel aborts
//! on preemption, migration, or signal delivery). This crate instead
//! registers the thread with the kernel `rseq(2)` ABI (so `cpu_id` is
//! readable without a syscall on the fast path) and performs the actual
//! read-modify-store with a genuine atomic compare-and-swap rather than a
//! non-atomic restartable sequence. This is deliberately *not* equivalent
//! to upstream's performance profile, but it is equivalent in
//! correctness: `synchronize()`'s drain step (spec.md §4.5 step 3) sums
//! `lock`/`unlock` counters across *all* CPUs, so a counter update
//! attributed to the "wrong" per-CPU slot because of a migration
//! mid-operation still contributes correctly to the global sum. Only
//! cache locality is affected, never correctness. See `DESIGN.md`.

use std::cell::Cell;
use std::collections::TryReserveError;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use log::warn;
use once_cell::sync::OnceCell;

use crate::error::ReclaimError;

/// A cache-line-padded wrapper to prevent false sharing between adjacent
/// per-CPU slots. 128 bytes covers the common 64-byte line plus adjacent
/// prefetch on modern x86/ARM, matching the alignment chosen by
/// `other_examples/.../dc-metrics-src-rseq.rs`'s `Page` struct.
#[repr(C, align(128))]
#[derive(Debug, Default)]
pub struct CachePadded<T>(T);

impl<T> CachePadded<T> {
    /// Wrap a value in cache-line padding.
    pub const fn new(value: T) -> Self {
        CachePadded(value)
    }

    /// Unwrap back to the inner value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for CachePadded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// How many per-CPU slots to provision.
///
/// Tries `/sys/devices/system/cpu/possible` first (the authoritative
/// source for the highest CPU index the kernel may ever hand out, even if
/// some are currently offline), then `std::thread::available_parallelism`,
/// then a hard floor of 1.
pub fn possible_cpus() -> usize {
    #[cfg(target_os = "linux")]
    {
        if let Ok(content) = std::fs::read_to_string("/sys/devices/system/cpu/possible") {
            if let Some(n) = parse_cpu_range(&content) {
                return n;
            }
        }
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn parse_cpu_range(content: &str) -> Option<usize> {
    let max = content
        .trim()
        .split(',')
        .filter_map(|range| {
            let end = range.split('-').next_back()?;
            end.parse::<usize>().ok()
        })
        .max()?;
    Some(max + 1)
}

/// A per-CPU memory pool: one cache-padded `T` per possible CPU.
///
/// This is the "per-CPU memory pool" external capability from spec.md §6,
/// modeled directly rather than consumed through a separate allocator
/// crate since the pack carries no dedicated per-CPU allocator crate to
/// borrow from.
pub struct PerCpu<T> {
    slots: Box<[CachePadded<T>]>,
}

impl<T> PerCpu<T> {
    /// Allocate one slot per possible CPU, each initialized by `f(cpu)`.
    pub fn try_new_with<F>(mut f: F) -> Result<Self, ReclaimError>
    where
        F: FnMut(usize) -> T,
    {
        let n = possible_cpus();
        let mut vec = Vec::new();
        vec.try_reserve_exact(n).map_err(|source| ReclaimError::PoolAllocation { cpus: n, source })?;
        for cpu in 0..n {
            vec.push(CachePadded::new(f(cpu)));
        }
        Ok(PerCpu { slots: vec.into_boxed_slice() })
    }

    /// Number of provisioned per-CPU slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether this pool has zero slots (never true in practice; kept for
    /// API completeness and clippy's `len_without_is_empty`).
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Borrow the slot for `cpu`, wrapping modulo the pool size so a
    /// `current_cpu()` reading that briefly disagrees with the pool size
    /// (e.g. a CPU hot-added after startup) never indexes out of bounds.
    pub fn get(&self, cpu: usize) -> &T {
        &self.slots[cpu % self.slots.len()]
    }

    /// Iterate all per-CPU slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().map(|s| &**s)
    }
}

// ---------------------------------------------------------------------
// rseq registration
// ---------------------------------------------------------------------

/// Minimal kernel `rseq` ABI structure (32 bytes, the size the kernel has
/// required since the feature's introduction). We only ever read
/// `cpu_id` from it; `rseq_cs` is left null because this crate does not
/// install restartable assembly critical sections (see module docs).
#[cfg(target_os = "linux")]
#[repr(C, align(32))]
struct RseqAbi {
    cpu_id_start: u32,
    cpu_id: u32,
    rseq_cs: u64,
    flags: u32,
    node_id: u32,
    mm_cid: u32,
    _reserved: [u8; 4],
}

#[cfg(target_os = "linux")]
const RSEQ_CPU_ID_UNINITIALIZED: u32 = u32::MAX;

thread_local! {
    static RSEQ_ENTERED: Cell<bool> = const { Cell::new(false) };
    #[cfg(target_os = "linux")]
    static RSEQ_STATE: Cell<*mut RseqAbi> = const { Cell::new(std::ptr::null_mut()) };
}

static RSEQ_CAPABLE: OnceCell<bool> = OnceCell::new();
static RSEQ_WARNED: AtomicBool = AtomicBool::new(false);

#[cfg(target_os = "linux")]
fn try_register_rseq() -> *mut RseqAbi {
    RSEQ_STATE.with(|cell| {
        let existing = cell.get();
        if !existing.is_null() {
            return existing;
        }
        let boxed = Box::into_raw(Box::new(RseqAbi {
            cpu_id_start: 0,
            cpu_id: RSEQ_CPU_ID_UNINITIALIZED,
            rseq_cs: 0,
            flags: 0,
            node_id: 0,
            mm_cid: 0,
            _reserved: [0; 4],
        }));
        let ret = unsafe {
            libc::syscall(
                libc::SYS_rseq,
                boxed,
                std::mem::size_of::<RseqAbi>(),
                0,
                0u32, // signature; unused since we install no asm abort handler
            )
        };
        if ret == 0 {
            cell.set(boxed);
            boxed
        } else {
            if !RSEQ_WARNED.swap(true, Ordering::Relaxed) {
                warn!("current_cpu: rseq(2) registration failed ({}), falling back to sched_getcpu",
                    std::io::Error::last_os_error());
            }
            unsafe { drop(Box::from_raw(boxed)) };
            std::ptr::null_mut()
        }
    })
}

#[cfg(target_os = "linux")]
fn rseq_capable() -> bool {
    *RSEQ_CAPABLE.get_or_init(|| !try_register_rseq().is_null())
}

/// Current CPU index, clamped into `0..bound`. Prefers the rseq-registered
/// `cpu_id` field (no syscall), falling back to `sched_getcpu()`, falling
/// back to a thread-id derived index on targets with neither.
pub fn current_cpu(bound: usize) -> usize {
    if bound == 0 {
        return 0;
    }
    #[cfg(target_os = "linux")]
    {
        if rseq_capable() {
            let ptr = RSEQ_STATE.with(|c| c.get());
            if !ptr.is_null() {
                let id = unsafe { (*ptr).cpu_id };
                if id != RSEQ_CPU_ID_UNINITIALIZED {
                    return (id as usize) % bound;
                }
            }
        }
        let cpu = unsafe { libc::sched_getcpu() };
        if cpu >= 0 {
            return (cpu as usize) % bound;
        }
    }
    let _ = RSEQ_CAPABLE.get(); // keep cfg(not(linux)) builds from warning on unused statics
    thread_id_fallback(bound)
}

/// Drop this thread's rseq registration after `fork(2)`. The kernel keys
/// rseq registration to the `(pid, tid)` pair at registration time, so a
/// child process's sole surviving thread must re-register before its
/// cached `cpu_id` field can be trusted again; the next `current_cpu`
/// call does so lazily.
#[cfg(target_os = "linux")]
pub(crate) fn reset_after_fork() {
    RSEQ_STATE.with(|cell| {
        let ptr = cell.replace(std::ptr::null_mut());
        if !ptr.is_null() {
            unsafe { drop(Box::from_raw(ptr)) };
        }
    });
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn reset_after_fork() {}

fn thread_id_fallback(bound: usize) -> usize {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    (hasher.finish() as usize) % bound
}

/// Run `f` with the calling thread's current CPU index, detecting and
/// rejecting nested re-entry (spec.md §4.3: "nested-signal re-entry is
/// detected and rejected"). No signal handlers are installed by this
/// crate, so true signal re-entrancy cannot occur; this guard instead
/// catches the programming error of a fast path recursively invoking
/// itself on the same thread.
/// Resets [`RSEQ_ENTERED`] on drop, so a panic inside `f` still clears
/// the re-entrancy flag instead of poisoning every later call on this
/// thread.
struct EnteredGuard;

impl Drop for EnteredGuard {
    fn drop(&mut self) {
        RSEQ_ENTERED.with(|e| e.set(false));
    }
}

pub fn with_current_cpu<F, R>(bound: usize, f: F) -> R
where
    F: FnOnce(usize) -> R,
{
    let already = RSEQ_ENTERED.with(|e| e.replace(true));
    assert!(!already, "per-CPU fast path re-entered on the same thread");
    let _guard = EnteredGuard;
    let cpu = current_cpu(bound);
    f(cpu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn possible_cpus_is_at_least_one() {
        assert!(possible_cpus() >= 1);
    }

    #[test]
    fn per_cpu_pool_round_trips() {
        let pool = PerCpu::try_new_with(|cpu| cpu * 2).unwrap();
        assert!(pool.len() >= 1);
        for (i, v) in pool.iter().enumerate() {
            assert_eq!(*v, i * 2);
        }
    }

    #[test]
    fn current_cpu_is_in_bounds() {
        for _ in 0..8 {
            assert!(current_cpu(4) < 4);
        }
    }

    #[test]
    fn with_current_cpu_rejects_reentry() {
        let result = std::panic::catch_unwind(|| {
            with_current_cpu(4, |_| {
                with_current_cpu(4, |_| {});
            });
        });
        assert!(result.is_err());
    }

    // spec.md §4.11: the child of fork(2) must re-register rseq before
    // trusting its cached cpu_id, since the kernel keys registration to
    // the (pid, tid) pair at registration time. We can't actually fork in
    // a unit test harness, but we can assert that dropping the
    // registration and calling current_cpu again is side-effect-free and
    // still yields an in-bounds index, the same path the atfork child
    // hook drives.
    #[test]
    fn reset_after_fork_is_safe_to_call_and_current_cpu_still_works() {
        let _ = current_cpu(4);
        reset_after_fork();
        assert!(current_cpu(4) < 4);
        reset_after_fork();
        assert!(current_cpu(4) < 4);
    }
}
