//! Exponential backoff for spin-then-sleep loops.
//!
//! Adapted from the teacher crate's `backoff` module: the same
//! doubling-with-ceiling spin strategy, reused here by the grace-period
//! drain loop (spec.md §4.5 step 3) and the hazard-pointer scan (§4.7)
//! before either falls back to parking on a futex.

use crate::sys::fence;

const DEFAULT_CEILING: u32 = 128;
const MAX_CEILING: u32 = 65536;

/// Exponential backoff state: spin an increasing number of times, up to
/// a ceiling, between retries of a contended operation.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: u32,
    ceiling: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    /// New backoff state with the default ceiling.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self { current: 1, ceiling: DEFAULT_CEILING }
    }

    /// New backoff state with a custom ceiling (clamped to `MAX_CEILING`).
    #[inline]
    #[must_use]
    pub const fn with_ceiling(ceiling: u32) -> Self {
        Self {
            current: 1,
            ceiling: if ceiling > MAX_CEILING { MAX_CEILING } else { ceiling },
        }
    }

    /// Reset to the initial spin count.
    #[inline]
    pub fn reset(&mut self) {
        self.current = 1;
    }

    /// Spin for the current count, then double it (capped at `ceiling`).
    #[inline]
    pub fn spin(&mut self) {
        for _ in 0..self.current {
            fence::stall();
        }
        if self.current < self.ceiling {
            self.current = self.current.saturating_mul(2);
        }
    }

    /// True once further `spin()` calls stop increasing the spin count —
    /// the signal for a caller to stop spinning and park instead.
    #[inline]
    #[must_use]
    pub fn is_maxed(&self) -> bool {
        self.current >= self.ceiling
    }
}
