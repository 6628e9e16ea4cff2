//! Scheduled-task slot
//!
//! A [`TimerSlot`] holds at most one pending deadline. Scheduling again
//! supersedes the previous deadline and cancelling clears it. The owner
//! polls [`TimerSlot::take_due`] so a superseded deadline never fires.

use std::time::Duration;

use kestrel_core::Timestamp;

/// One cancellable deadline
#[derive(Clone, Debug, Default)]
pub struct TimerSlot {
    deadline: Option<Timestamp>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm at `at`, superseding any pending deadline
    pub fn schedule(&mut self, at: Timestamp) {
        self.deadline = Some(at);
    }

    /// Arm `after` from `now`, superseding any pending deadline
    pub fn schedule_after(&mut self, now: Timestamp, after: Duration) {
        self.schedule(now + after);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    #[inline]
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    #[inline]
    pub fn deadline(&self) -> Option<Timestamp> {
        self.deadline
    }

    #[inline]
    pub fn is_due(&self, now: Timestamp) -> bool {
        matches!(self.deadline, Some(at) if now >= at)
    }

    /// Disarm and report true if the deadline has passed
    pub fn take_due(&mut self, now: Timestamp) -> bool {
        if self.is_due(now) {
            self.deadline = None;
            true
        } else {
            false
        }
    }

    /// Time left until the deadline, zero if overdue
    pub fn remaining(&self, now: Timestamp) -> Option<Duration> {
        self.deadline.map(|at| at - now)
    }
}
