//! In-memory lane capacity accounting.
//!
//! `active` only moves through [`LaneState::try_acquire`] (a CAS loop that
//! refuses to pass `capacity`) and [`LanePermit`]'s `Drop` (one decrement per
//! successful acquire), so `0 <= active <= capacity` holds at every instant.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rf_core::Lane;
use tokio::sync::Notify;

#[derive(Debug)]
pub struct LaneState {
    lane: Lane,
    capacity: usize,
    active: AtomicUsize,
    paused: AtomicBool,
    /// Wakes the lane's dispatcher: new work, freed capacity, or resume.
    wake: Notify,
}

impl LaneState {
    pub fn new(lane: Lane, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            lane,
            capacity,
            active: AtomicUsize::new(0),
            paused: AtomicBool::new(false),
            wake: Notify::new(),
        })
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
        if !paused {
            self.wake();
        }
    }

    /// Reserve one execution slot, unless the lane is paused or full.
    pub fn try_acquire(self: &Arc<Self>) -> Option<LanePermit> {
        if self.is_paused() {
            return None;
        }
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .ok()
            .map(|_| LanePermit {
                lane: Arc::clone(self),
            })
    }

    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Resolves on the next [`LaneState::wake`] (or immediately if one is pending).
    pub async fn woken(&self) {
        self.wake.notified().await;
    }
}

/// One reserved slot of a lane. Dropping it frees the slot.
#[derive(Debug)]
pub struct LanePermit {
    lane: Arc<LaneState>,
}

impl LanePermit {
    pub fn lane(&self) -> Lane {
        self.lane.lane
    }
}

impl Drop for LanePermit {
    fn drop(&mut self) {
        self.lane.active.fetch_sub(1, Ordering::AcqRel);
        self.lane.wake();
    }
}
