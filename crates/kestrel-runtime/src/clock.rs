//! Clock backed by tokio's timer

use kestrel_core::Timestamp;
use kestrel_time::{Clock, SystemClock};
use tokio::time::Instant;

/// Wall-clock anchored, advanced by `tokio::time::Instant`. Under a paused
/// tokio runtime it follows the virtual time, so timer-driven tests stay
/// deterministic.
#[derive(Clone, Copy, Debug)]
pub struct TokioClock {
    origin: Instant,
    base: Timestamp,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(SystemClock.now())
    }

    pub fn starting_at(base: Timestamp) -> Self {
        TokioClock {
            origin: Instant::now(),
            base,
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Timestamp {
        self.base + self.origin.elapsed()
    }
}
