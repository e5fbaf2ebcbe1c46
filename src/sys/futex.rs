//! Futex-backed wait/wake channel for writers waiting on a grace period.
//!
//! A writer that has spun past its budget parks on a 32-bit word via
//! `futex(2)`; readers (or the grace-period leader) wake it with
//! `FUTEX_WAKE`. On non-Linux targets we fall back to a
//! `parking_lot::Condvar`-backed channel with equivalent semantics
//! (`wait` only blocks if the word still holds the expected value).

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::ReclaimError;

/// Block the calling thread until `word` no longer equals `expected`, or
/// until woken. Spurious wakeups are possible; callers must re-check
/// their condition in a loop, exactly as with the raw syscall.
pub fn wait(word: &AtomicU32, expected: u32) {
    #[cfg(target_os = "linux")]
    {
        let ptr = word as *const AtomicU32 as *const u32;
        let ret = unsafe {
            libc::syscall(
                libc::SYS_futex,
                ptr,
                libc::FUTEX_WAIT,
                expected,
                std::ptr::null::<libc::timespec>(),
                0,
                0,
            )
        };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                // EAGAIN: word already changed before we parked — not an
                // error. EINTR: spurious wake — caller's loop handles it.
                Some(libc::EAGAIN) | Some(libc::EINTR) => {}
                _ => panic!("{}", ReclaimError::FutexWait(err)),
            }
        }
        return;
    }
    #[cfg(not(target_os = "linux"))]
    {
        fallback::wait(word, expected);
    }
}

/// Wake up to `n` threads parked on `word`.
pub fn wake(word: &AtomicU32, n: i32) {
    #[cfg(target_os = "linux")]
    {
        let ptr = word as *const AtomicU32 as *const u32;
        let ret = unsafe {
            libc::syscall(libc::SYS_futex, ptr, libc::FUTEX_WAKE, n, 0, 0, 0)
        };
        if ret < 0 {
            panic!("futex wake failed: {}", std::io::Error::last_os_error());
        }
        return;
    }
    #[cfg(not(target_os = "linux"))]
    {
        fallback::wake(word, n);
    }
}

#[cfg(not(target_os = "linux"))]
mod fallback {
    use super::*;
    use parking_lot::{Condvar, Mutex};
    use std::collections::HashMap;

    // A process-wide table mapping a futex word's address to the condvar
    // parked threads on it wait on. This is the textbook portable futex
    // emulation: the mutex only protects the wait/notify race, never the
    // word itself (which stays a plain atomic so the fast path is still
    // lock-free).
    static TABLE: once_cell::sync::Lazy<Mutex<HashMap<usize, std::sync::Arc<Condvar>>>> =
        once_cell::sync::Lazy::new(|| Mutex::new(HashMap::new()));

    fn condvar_for(word: &AtomicU32) -> std::sync::Arc<Condvar> {
        let key = word as *const AtomicU32 as usize;
        let mut table = TABLE.lock();
        table
            .entry(key)
            .or_insert_with(|| std::sync::Arc::new(Condvar::new()))
            .clone()
    }

    pub fn wait(word: &AtomicU32, expected: u32) {
        let cv = condvar_for(word);
        let guard_mutex: Mutex<()> = Mutex::new(());
        let mut guard = guard_mutex.lock();
        if word.load(Ordering::SeqCst) != expected {
            return;
        }
        let timeout = std::time::Duration::from_millis(10);
        cv.wait_for(&mut guard, timeout);
    }

    pub fn wake(word: &AtomicU32, _n: i32) {
        let cv = condvar_for(word);
        cv.notify_all();
    }
}
