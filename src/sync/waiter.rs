//! Writer waiter-queue coalescing (component D, spec.md §4.4).
//!
//! When several writers call `synchronize()` concurrently on the same
//! domain, only the first one actually has to pay for the drain; the
//! rest ride along and wake up together when the leader is done. This
//! amortizes grace-period cost across concurrent writers while
//! preserving the per-caller ordering guarantee from spec.md §5: every
//! writer that joins the queue returns only after every writer that had
//! already finished before it joined.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::sync::backoff::Backoff;
use crate::sys::futex;

const WAITING: u32 = 0;
const WOKEN: u32 = 1;

struct WaitNode {
    state: AtomicU32,
}

impl WaitNode {
    fn new() -> Self {
        Self { state: AtomicU32::new(WAITING) }
    }
}

/// Which role a writer plays after joining the queue.
pub enum Role {
    /// This writer must actually run the grace period and, when done,
    /// call [`WaiterQueue::finish_as_leader`].
    Leader(Arc<WaitNode>),
    /// This writer should call [`WaiterQueue::wait_for_leader`] and then
    /// return — the leader will perform the grace period on its behalf.
    Follower(Arc<WaitNode>),
}

/// FIFO coalescing queue of writers waiting on a grace period.
pub struct WaiterQueue {
    queue: Mutex<VecDeque<Arc<WaitNode>>>,
}

impl Default for WaiterQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WaiterQueue {
    /// A fresh, empty queue.
    pub const fn new() -> Self {
        Self { queue: Mutex::new(VecDeque::new()) }
    }

    /// Join the queue. Returns `Leader` to the first writer to join an
    /// empty queue, `Follower` to everyone else.
    pub fn join(&self) -> Role {
        let node = Arc::new(WaitNode::new());
        let mut guard = self.queue.lock();
        let is_leader = guard.is_empty();
        guard.push_back(node.clone());
        drop(guard);
        if is_leader {
            Role::Leader(node)
        } else {
            Role::Follower(node)
        }
    }

    /// Called by the leader once it has completed the grace period: pull
    /// every writer currently queued (itself and any followers that
    /// joined while it was working) out of the queue and wake them all.
    /// A writer that joins *after* this call starts a new batch, with
    /// itself as the new leader.
    pub fn finish_as_leader(&self, leader: &Arc<WaitNode>) {
        let batch = {
            let mut guard = self.queue.lock();
            std::mem::take(&mut *guard)
        };
        for node in batch {
            if !Arc::ptr_eq(&node, leader) {
                node.state.store(WOKEN, Ordering::Release);
                futex::wake(&node.state, 1);
            }
        }
    }

    /// Called by a follower: spin, then park, until the leader wakes it.
    pub fn wait_for_leader(&self, node: &Arc<WaitNode>) {
        let mut backoff = Backoff::new();
        loop {
            if node.state.load(Ordering::Acquire) == WOKEN {
                return;
            }
            if backoff.is_maxed() {
                futex::wait(&node.state, WAITING);
            } else {
                backoff.spin();
            }
        }
    }
}
