//! Trailing-edge debouncer

use std::time::Duration;

use kestrel_core::Timestamp;

use crate::TimerSlot;

/// Collapses bursts of triggers into one firing `delay` after the last trigger
#[derive(Clone, Debug)]
pub struct Debouncer {
    delay: Duration,
    slot: TimerSlot,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Debouncer {
            delay,
            slot: TimerSlot::new(),
        }
    }

    /// Restart the quiet period
    pub fn trigger(&mut self, now: Timestamp) {
        self.slot.schedule_after(now, self.delay);
    }

    /// True exactly once when the quiet period has elapsed
    pub fn poll(&mut self, now: Timestamp) -> bool {
        self.slot.take_due(now)
    }

    pub fn cancel(&mut self) {
        self.slot.cancel();
    }

    pub fn is_pending(&self) -> bool {
        self.slot.is_armed()
    }

    pub fn deadline(&self) -> Option<Timestamp> {
        self.slot.deadline()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}
