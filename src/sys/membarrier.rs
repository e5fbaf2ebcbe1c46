//! The master fence: process-wide full fence via `membarrier(2)` (component B).
//!
//! `master_fence()` must, when it returns, guarantee that every thread in
//! the process has passed through a full memory fence since the call
//! began. We prefer `MEMBARRIER_CMD_PRIVATE_EXPEDITED`, which is cheap
//! enough to call from a writer's `synchronize()` without becoming the
//! bottleneck. When membarrier is unsupported (non-Linux, old kernel, or
//! blocked by a sandboxing policy) we degrade to a local full fence; this
//! is only correct when every reader fast path also issues an explicit
//! fence of its own ("slave flavor"), which every reader path in this
//! crate does (see [`crate::rcu::percpu_flavor`] and
//! [`crate::hpref::engine`]).

use log::warn;
use once_cell::sync::OnceCell;

use crate::error::ReclaimError;
use crate::sys::fence;

/// Whether `membarrier(2)` registration succeeded for this process.
static REGISTERED: OnceCell<bool> = OnceCell::new();

fn log_fallback_once(reason: &str) {
    static WARNED: OnceCell<()> = OnceCell::new();
    if WARNED.get().is_none() {
        warn!("master_fence: membarrier unavailable ({reason}), falling back to local fence");
        let _ = WARNED.set(());
    }
}

#[cfg(target_os = "linux")]
fn register() -> Result<bool, ReclaimError> {
    // Probe support first so we never pay for a registration syscall on
    // kernels/sandboxes that don't implement membarrier at all.
    let supported = unsafe {
        libc::syscall(libc::SYS_membarrier, libc::MEMBARRIER_CMD_QUERY, 0)
    };
    if supported < 0 {
        log_fallback_once("MEMBARRIER_CMD_QUERY failed");
        return Ok(false);
    }
    let bits = supported as i32;
    if bits & libc::MEMBARRIER_CMD_PRIVATE_EXPEDITED == 0 {
        log_fallback_once("MEMBARRIER_CMD_PRIVATE_EXPEDITED not in query mask");
        return Ok(false);
    }

    let ret = unsafe {
        libc::syscall(
            libc::SYS_membarrier,
            libc::MEMBARRIER_CMD_REGISTER_PRIVATE_EXPEDITED,
            0,
        )
    };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        // EPERM/ENOSYS style failures are capability-absence, not a
        // reportable misconfiguration; only a genuinely unexpected errno
        // is surfaced as `MembarrierRejected` for callers who care.
        match err.raw_os_error() {
            Some(libc::ENOSYS) | Some(libc::EINVAL) | None => {
                log_fallback_once("REGISTER_PRIVATE_EXPEDITED unsupported");
                return Ok(false);
            }
            _ => return Err(ReclaimError::MembarrierRejected(err)),
        }
    }
    Ok(true)
}

#[cfg(not(target_os = "linux"))]
fn register() -> Result<bool, ReclaimError> {
    log_fallback_once("non-Linux target");
    Ok(false)
}

fn is_registered() -> bool {
    *REGISTERED.get_or_init(|| register().unwrap_or_else(|e| {
        warn!("master_fence: {e}, falling back to local fence");
        false
    }))
}

/// Force every thread in the process to have executed a full fence since
/// this call began, or degrade to a local full fence if unavailable.
///
/// Correctness is identical either way; only throughput differs (cheap
/// reader / expensive writer with real membarrier, vs. expensive reader /
/// cheap writer when every reader fast path issues its own fence to
/// compensate for the degraded master fence).
#[inline]
pub fn master_fence() {
    #[cfg(target_os = "linux")]
    {
        if is_registered() {
            let ret = unsafe {
                libc::syscall(libc::SYS_membarrier, libc::MEMBARRIER_CMD_PRIVATE_EXPEDITED, 0)
            };
            if ret == 0 {
                return;
            }
            // A previously successful registration that starts failing at
            // call time (e.g. a later seccomp filter) is a fatal
            // system-call failure per the error taxonomy.
            panic!("master_fence: membarrier(2) failed after successful registration: {}",
                std::io::Error::last_os_error());
        }
    }
    let _ = is_registered();
    fence::fence_full();
}

/// True if this process has a working `membarrier(2)` registration.
/// Exposed for tests and for callers tuning which RCU flavor to pick.
pub fn capability_present() -> bool {
    is_registered()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_fence_never_panics_in_steady_state() {
        master_fence();
        master_fence();
        let _ = capability_present();
    }
}
