//! Per-CPU hazard-pointer slot arrays (component F, spec.md §4.7 and §9's
//! "most recent design": 64 slots per CPU, slot 0 repurposed as the
//! `scan_depth` cursor, dynamic hysteresis, tag-based two-phase scans).
//!
//! The C original packs `scan_depth` into slot 0 of the same cache line
//! as the hazard cells to avoid a second allocation; this layout mirrors
//! that structurally even though Rust has no particular need for the
//! space trick.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Slots per CPU, including the repurposed `scan_depth` cell (index 0)
/// and the emergency slot (the last index).
pub const SLOTS_PER_CPU: usize = 64;
/// First index usable as an actual hazard-pointer cell; index 0 holds
/// `scan_depth` instead.
pub const FIRST_SCANNABLE: usize = 1;
/// Index of the emergency slot: the last slot, reserved for immediate
/// promotion to reference-count when every ordinary slot is occupied.
pub const EMERGENCY_INDEX: usize = SLOTS_PER_CPU - 1;
/// Granularity `scan_depth` grows or shrinks by.
pub const DEPTH_STRIDE: usize = 8;
/// How far below `scan_depth` the high-water mark must fall before a
/// shrink is attempted.
pub const HYSTERESIS_STRIDE: usize = 8;

const SCAN_DEPTH_FLOOR: usize = FIRST_SCANNABLE + DEPTH_STRIDE - 1;
const SCAN_DEPTH_CEILING: usize = EMERGENCY_INDEX - 1;

const TAG_MASK: usize = 1;
const PTR_MASK: usize = !TAG_MASK;

#[inline]
fn untag(value: usize) -> (usize, usize) {
    (value & PTR_MASK, value & TAG_MASK)
}

#[inline]
fn tag_with(ptr: usize, tag: usize) -> usize {
    debug_assert_eq!(
        ptr & TAG_MASK,
        0,
        "node pointer must be at least 2-byte aligned to carry a period tag"
    );
    ptr | (tag & TAG_MASK)
}

fn round_up_to_stride(index: usize) -> usize {
    index.div_ceil(DEPTH_STRIDE) * DEPTH_STRIDE
}

/// One CPU's hazard-pointer slot array.
pub struct PerCpuSlots {
    cells: [AtomicUsize; SLOTS_PER_CPU],
}

impl Default for PerCpuSlots {
    fn default() -> Self {
        let cells: [AtomicUsize; SLOTS_PER_CPU] = std::array::from_fn(|_| AtomicUsize::new(0));
        cells[0].store(SCAN_DEPTH_FLOOR, Ordering::Relaxed);
        PerCpuSlots { cells }
    }
}

impl PerCpuSlots {
    /// Current scan depth: the highest scannable index writers must
    /// examine on this CPU (spec.md glossary: "Scan depth").
    pub fn scan_depth(&self) -> usize {
        self.cells[0].load(Ordering::Acquire)
    }

    /// Raise `scan_depth` to the smallest multiple of the depth stride
    /// that covers `index`, via a monotonic compare-and-swap loop.
    pub fn raise_scan_depth_to_cover(&self, index: usize) {
        let target = round_up_to_stride(index).min(SCAN_DEPTH_CEILING);
        let mut current = self.cells[0].load(Ordering::Relaxed);
        while target > current {
            match self.cells[0].compare_exchange_weak(
                current,
                target,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Attempt to shrink `scan_depth` by one stride, given the highest
    /// occupied index seen during the writer's most recent scan. Returns
    /// `true` if the shrink was applied.
    pub fn try_shrink_scan_depth(&self, high_water: usize) -> bool {
        let current = self.cells[0].load(Ordering::Acquire);
        if current <= SCAN_DEPTH_FLOOR {
            return false;
        }
        if current.saturating_sub(high_water) < HYSTERESIS_STRIDE {
            return false;
        }
        let shrunk = current.saturating_sub(DEPTH_STRIDE).max(SCAN_DEPTH_FLOOR);
        self.cells[0]
            .compare_exchange(current, shrunk, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Restore `scan_depth` back up to at least `previous`, used when a
    /// shrink's post-check finds the removed range became occupied again.
    pub fn restore_scan_depth(&self, previous: usize) {
        self.raise_scan_depth_to_cover(previous);
    }

    /// Load a slot's untagged pointer bits and period tag.
    pub fn load(&self, index: usize) -> (usize, usize) {
        untag(self.cells[index].load(Ordering::Acquire))
    }

    /// Attempt to claim an empty slot for `node_ptr`, tagged with
    /// `period`. Succeeds only if the slot was `NULL`.
    pub fn try_acquire(&self, index: usize, node_ptr: usize, period: usize) -> bool {
        self.cells[index]
            .compare_exchange(0, tag_with(node_ptr, period), Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Release a slot back to `NULL`.
    pub fn clear(&self, index: usize) {
        self.cells[index].store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_the_floor() {
        let slots = PerCpuSlots::default();
        assert_eq!(slots.scan_depth(), SCAN_DEPTH_FLOOR);
    }

    #[test]
    fn acquire_then_clear_round_trips() {
        let slots = PerCpuSlots::default();
        assert!(slots.try_acquire(1, 0x1000, 0));
        assert_eq!(slots.load(1), (0x1000, 0));
        assert!(!slots.try_acquire(1, 0x2000, 0), "slot already occupied");
        slots.clear(1);
        assert_eq!(slots.load(1), (0, 0));
        assert!(slots.try_acquire(1, 0x2000, 1));
        assert_eq!(slots.load(1), (0x2000, 1));
    }

    #[test]
    fn raising_scan_depth_rounds_up_to_a_stride_multiple() {
        let slots = PerCpuSlots::default();
        slots.raise_scan_depth_to_cover(20);
        assert_eq!(slots.scan_depth(), 24);
        slots.raise_scan_depth_to_cover(17);
        assert_eq!(slots.scan_depth(), 24, "raising never shrinks");
    }

    #[test]
    fn shrink_requires_hysteresis_margin() {
        let slots = PerCpuSlots::default();
        slots.raise_scan_depth_to_cover(40);
        assert!(!slots.try_shrink_scan_depth(35), "high water too close to depth");
        assert!(slots.try_shrink_scan_depth(10));
        assert_eq!(slots.scan_depth(), 32);
    }

    #[test]
    fn shrink_never_crosses_the_floor() {
        let slots = PerCpuSlots::default();
        assert!(!slots.try_shrink_scan_depth(0));
        assert_eq!(slots.scan_depth(), SCAN_DEPTH_FLOOR);
    }

    // spec.md §4.7 final paragraph: "if so, restore scan_depth upward" —
    // a shrink must be undone if the writer's post-check finds the
    // removed range became occupied again while the shrink was in flight.
    #[test]
    fn restore_scan_depth_undoes_a_shrink() {
        let slots = PerCpuSlots::default();
        slots.raise_scan_depth_to_cover(40);
        let before_shrink = slots.scan_depth();
        assert!(slots.try_shrink_scan_depth(10));
        let shrunk = slots.scan_depth();
        assert!(shrunk < before_shrink);

        // A reader raced in and occupied a slot in the just-removed range.
        assert!(slots.try_acquire(shrunk + 1, 0x3000, 0));
        slots.restore_scan_depth(before_shrink);
        assert_eq!(slots.scan_depth(), before_shrink);
        assert_eq!(slots.load(shrunk + 1), (0x3000, 0));
    }
}
