//! Clock implementations for KESTREL
//!
//! Every time-dependent state machine reads an injected [`Clock`] instead of
//! the wall clock so that batching, cool-downs and heartbeats can be driven
//! deterministically in tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use kestrel_core::Timestamp;

/// Source of the current time in milliseconds
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// Wall clock (milliseconds since the Unix epoch)
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Timestamp(millis)
    }
}

/// Virtual clock advanced explicitly. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        ManualClock {
            millis: Arc::new(AtomicI64::new(start.as_millis())),
        }
    }

    /// Move time forward. Returns the new time.
    pub fn advance(&self, by: Duration) -> Timestamp {
        let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        let prev = self.millis.fetch_add(delta, Ordering::SeqCst);
        Timestamp(prev.saturating_add(delta))
    }

    pub fn set(&self, to: Timestamp) {
        self.millis.store(to.as_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.millis.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(Timestamp(1_000));
        let other = clock.clone();

        clock.advance(Duration::from_millis(250));
        assert_eq!(other.now(), Timestamp(1_250));

        other.set(Timestamp(5));
        assert_eq!(clock.now(), Timestamp(5));
    }

    #[test]
    fn test_system_clock_is_after_epoch() {
        assert!(SystemClock.now() > Timestamp::ZERO);
    }

    #[test]
    fn test_dyn_clock_through_arc() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Timestamp(3)));
        assert_eq!(clock.now(), Timestamp(3));
    }
}
