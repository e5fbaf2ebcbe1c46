//! The hazard-pointer / reference-count engine (component F, spec.md
//! §4.7), grounded in the teacher's `hp.rs` hazard-pointer records and
//! generalized to the dynamic scan-depth, period-tagged, emergency-slot
//! design spec.md §9 calls the "most recent" draft.

use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use log::trace;
use parking_lot::Mutex;

use super::node::HpNode;
use super::slots::{self, PerCpuSlots};
use crate::sync::backoff::Backoff;
use crate::sys::fence;
use crate::sys::membarrier::master_fence;
use crate::sys::percpu::{with_current_cpu, PerCpu};

/// Whether a reader context is a live hazard pointer (slot-based) or has
/// been promoted to a counted reference.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ContextKind {
    Hp,
    Ref,
}

/// A reader's handle on a node, returned by [`HprefDomain::hp_get`] and
/// consumed by [`HprefDomain::hp_put`] / [`HprefDomain::hp_promote_to_ref`].
pub struct HpContext<T> {
    node: *mut HpNode<T>,
    cpu: usize,
    slot: usize,
    kind: ContextKind,
}

impl<T> HpContext<T> {
    /// Borrow the protected payload.
    pub fn get(&self) -> &T {
        unsafe { HpNode::value(self.node) }
    }

    /// Which kind of context this is: a live hazard pointer, or a
    /// promoted counted reference.
    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// The raw node pointer this context protects, for callers building
    /// higher-level structures (e.g. the hazard-pointer protected list).
    pub fn node_ptr(&self) -> *mut HpNode<T> {
        self.node
    }
}

/// An independent hazard-pointer-and-reference-count domain: its own
/// per-CPU slot pool and period counter (spec.md §9: "the domain an
/// explicit first-class object whose lifetime is controlled by the
/// embedder").
pub struct HprefDomain {
    percpu: PerCpu<PerCpuSlots>,
    period: AtomicUsize,
    sync_lock: Mutex<()>,
}

impl Default for HprefDomain {
    fn default() -> Self {
        Self::new()
    }
}

impl HprefDomain {
    /// Create a new domain with freshly allocated per-CPU slot pools.
    pub fn new() -> Self {
        let percpu = PerCpu::try_new_with(|_| PerCpuSlots::default())
            .expect("failed to allocate per-CPU hazard-pointer slots");
        HprefDomain {
            percpu,
            period: AtomicUsize::new(0),
            sync_lock: Mutex::new(()),
        }
    }

    /// Acquire a hazard pointer (or, if every ordinary slot on this CPU
    /// is occupied, a promoted reference) to the node currently
    /// published at `*slot`. Returns `None` on a miss (`*slot` was
    /// `NULL`).
    pub fn hp_get<T>(&self, slot: &AtomicPtr<HpNode<T>>) -> Option<HpContext<T>> {
        loop {
            let candidate = slot.load(Ordering::Relaxed);
            if candidate.is_null() {
                return None;
            }
            let period = self.period.load(Ordering::Acquire);
            let cpu = with_current_cpu(self.percpu.len(), |cpu| cpu);
            let cpu_slots = self.percpu.get(cpu);

            let mut acquired = None;
            for index in slots::FIRST_SCANNABLE..slots::EMERGENCY_INDEX {
                if cpu_slots.try_acquire(index, candidate as usize, period) {
                    acquired = Some(index);
                    break;
                }
            }

            let (index, kind) = match acquired {
                Some(index) => {
                    if index > cpu_slots.scan_depth() {
                        cpu_slots.raise_scan_depth_to_cover(index);
                    }
                    (index, ContextKind::Hp)
                }
                None => {
                    // Every ordinary slot on this CPU is occupied: fall
                    // back to the emergency slot. Promotion to refcount
                    // happens below, only after the re-validate confirms
                    // `candidate` is still published, same as the
                    // ordinary-slot path, so a concurrent unpublish can
                    // never free the node out from under us between the
                    // candidate load and the incref.
                    let mut backoff = Backoff::new();
                    while !cpu_slots.try_acquire(slots::EMERGENCY_INDEX, candidate as usize, period)
                    {
                        backoff.spin();
                    }
                    (slots::EMERGENCY_INDEX, ContextKind::Ref)
                }
            };

            // Master-paired fence, then re-validate: if the publisher
            // replaced the pointer while we were landing a slot, release
            // it and retry against the fresh value.
            fence::barrier();
            master_fence();
            let current = slot.load(Ordering::Acquire);
            if current != candidate {
                cpu_slots.clear(index);
                if current.is_null() {
                    return None;
                }
                continue;
            }

            if kind == ContextKind::Ref {
                unsafe { HpNode::incref(candidate) };
                cpu_slots.clear(index);
                trace!("hp_get: emergency slot promotion on cpu {cpu}");
            }

            return Some(HpContext { node: candidate, cpu, slot: index, kind });
        }
    }

    /// Release a reader context: clears the slot for a hazard-pointer
    /// context, or decrements the refcount (running the release callback
    /// on zero) for a promoted reference.
    pub fn hp_put<T>(&self, ctx: HpContext<T>) {
        match ctx.kind {
            ContextKind::Hp => {
                self.percpu.get(ctx.cpu).clear(ctx.slot);
            }
            ContextKind::Ref => unsafe {
                HpNode::decref(ctx.node);
            },
        }
    }

    /// Promote a hazard-pointer context to a counted reference.
    /// Idempotent when `ctx` already holds `Ref`.
    pub fn hp_promote_to_ref<T>(&self, ctx: &mut HpContext<T>) {
        if ctx.kind == ContextKind::Ref {
            return;
        }
        unsafe { HpNode::incref(ctx.node) };
        self.percpu.get(ctx.cpu).clear(ctx.slot);
        ctx.kind = ContextKind::Ref;
    }

    /// Targeted synchronize: block until no slot, across every CPU,
    /// advertises `target` (spec.md §4.7, "targeted" branch).
    pub fn synchronize<T>(&self, target: *mut HpNode<T>) {
        let target = target as usize;
        let mut backoff = Backoff::new();
        loop {
            let blocked = self.percpu.iter().any(|cpu_slots| {
                let depth = cpu_slots.scan_depth();
                (slots::FIRST_SCANNABLE..=depth).any(|index| cpu_slots.load(index).0 == target)
            });
            if !blocked {
                return;
            }
            backoff.spin();
        }
    }

    /// `synchronize(target, sizeof(node))` followed by one refcount
    /// decrement, dropping the owner's initial reference.
    pub fn synchronize_put<T>(&self, node: *mut HpNode<T>) {
        self.synchronize(node);
        unsafe {
            HpNode::decref(node);
        }
    }

    /// Broad synchronize (`target = NULL`, or `length` exceeding one
    /// node): a two-phase tag-based scan that guarantees forward
    /// progress even under a steady stream of readers re-entering hazard
    /// slots, by waiting out one full period flip per phase.
    pub fn synchronize_broad(&self) {
        let _guard = self.sync_lock.lock();
        for phase in 0..2 {
            let wait_period = self.period.load(Ordering::Acquire) ^ 1;
            trace!("synchronize_broad: phase {phase}, draining period {wait_period}");
            for cpu_slots in self.percpu.iter() {
                self.drain_cpu_for_period(cpu_slots, wait_period);
            }
            self.period.store(wait_period, Ordering::Release);
        }
    }

    fn drain_cpu_for_period(&self, cpu_slots: &PerCpuSlots, wait_period: usize) {
        let mut backoff = Backoff::new();
        let mut high_water = slots::FIRST_SCANNABLE.saturating_sub(1);
        loop {
            let depth = cpu_slots.scan_depth();
            let mut blocked = false;
            for index in slots::FIRST_SCANNABLE..=depth {
                let (ptr_bits, tag) = cpu_slots.load(index);
                if ptr_bits != 0 {
                    high_water = high_water.max(index);
                    if tag == wait_period {
                        blocked = true;
                    }
                }
            }
            if !blocked {
                break;
            }
            backoff.spin();
        }

        let depth = cpu_slots.scan_depth();
        if depth.saturating_sub(high_water) >= slots::HYSTERESIS_STRIDE
            && cpu_slots.try_shrink_scan_depth(high_water)
        {
            let shrunk = cpu_slots.scan_depth();
            let reoccupied =
                ((shrunk + 1)..=depth).any(|index| cpu_slots.load(index).0 != 0);
            if reoccupied {
                cpu_slots.restore_scan_depth(depth);
            }
        }
    }
}
