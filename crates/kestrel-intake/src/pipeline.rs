//! Event intake pipeline
//!
//! Stages, in order:
//! 1. per-event dedup against the previous accepted event's key
//! 2. batching, flushed at `max_batch_size` events or `max_wait` after the
//!    first event of the batch, whichever comes first
//! 3. coalescing of redundant full-refresh events
//! 4. dispatch planning into a deduplicated [`RefreshPlan`]
//!
//! The pipeline never sleeps. The owner polls it when
//! [`IntakePipeline::next_deadline`] passes.

use std::sync::Arc;
use std::time::Duration;

use kestrel_core::{RawEvent, Timestamp};
use kestrel_time::{Clock, TimerSlot};
use tracing::{debug, warn};

use crate::RefreshPlan;

/// Batching tuning
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    pub max_wait: Duration,
    pub max_batch_size: usize,
    /// When false every accepted event is dispatched on its own
    pub enable_batching: bool,
    pub enable_metrics: bool,
    /// Batches slower than this are logged
    pub slow_batch_threshold: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            max_wait: Duration::from_millis(100),
            max_batch_size: 10,
            enable_batching: true,
            enable_metrics: true,
            slow_batch_threshold: Duration::from_millis(100),
        }
    }
}

/// Diagnostic counters, owned per pipeline instance
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntakeStats {
    /// Events that entered a flushed batch
    pub processed: u64,
    /// Events dropped as duplicate deliveries
    pub skipped: u64,
    /// Full-refresh events removed by coalescing
    pub coalesced: u64,
    pub batches: u64,
    pub last_batch_time: Duration,
    /// Moving average, weight 0.1 on the newest sample
    pub average_batch_time: Duration,
}

/// One flushed batch, ready for execution
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dispatch {
    /// Surviving events in dispatch order
    pub events: Vec<RawEvent>,
    pub plan: RefreshPlan,
    /// Events received before coalescing
    pub received: usize,
}

impl Dispatch {
    pub fn coalesced(&self) -> usize {
        self.received - self.events.len()
    }
}

/// Keep non-refresh events in arrival order and only the latest full
/// refresh, unchanged, at the end. Every full refresh re-derives the whole
/// state, so the earlier ones are redundant.
pub fn coalesce(events: Vec<RawEvent>) -> (Vec<RawEvent>, usize) {
    let mut others = Vec::with_capacity(events.len());
    let mut latest = None;
    let mut dropped = 0;
    for event in events {
        if event.is_full_refresh() {
            if latest.replace(event).is_some() {
                dropped += 1;
            }
        } else {
            others.push(event);
        }
    }
    others.extend(latest);
    (others, dropped)
}

/// Dedup, batch, coalesce and plan raw events
pub struct IntakePipeline {
    config: BatchConfig,
    clock: Arc<dyn Clock>,
    last_key: Option<String>,
    pending: Vec<RawEvent>,
    flush_timer: TimerSlot,
    stats: IntakeStats,
}

impl IntakePipeline {
    pub fn new(config: BatchConfig, clock: Arc<dyn Clock>) -> Self {
        IntakePipeline {
            config,
            clock,
            last_key: None,
            pending: Vec::new(),
            flush_timer: TimerSlot::new(),
            stats: IntakeStats::default(),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Accept one raw event. Returns a dispatch when this event completes
    /// a batch (or immediately when batching is disabled).
    pub fn push(&mut self, event: RawEvent) -> Option<Dispatch> {
        let now = self.clock.now();
        let key = event.dedup_key(now);
        if self.last_key.as_deref() == Some(key.as_str()) {
            if self.config.enable_metrics {
                self.stats.skipped += 1;
            }
            debug!(key = %key, "skipping duplicate event");
            return None;
        }
        self.last_key = Some(key);

        if !self.config.enable_batching {
            return Some(self.process(vec![event]));
        }

        // A stale deadline (owner polled late) flushes with this event included
        let overdue = self.flush_timer.is_due(now);
        self.pending.push(event);
        if self.pending.len() == 1 {
            self.flush_timer.schedule(now + self.config.max_wait);
        }

        if self.pending.len() >= self.config.max_batch_size || overdue {
            return self.flush();
        }
        None
    }

    /// Flush if the batch deadline has passed
    pub fn poll(&mut self) -> Option<Dispatch> {
        if self.flush_timer.is_due(self.clock.now()) {
            self.flush()
        } else {
            None
        }
    }

    /// Flush whatever is pending now
    pub fn flush(&mut self) -> Option<Dispatch> {
        self.flush_timer.cancel();
        if self.pending.is_empty() {
            return None;
        }
        let batch = std::mem::take(&mut self.pending);
        Some(self.process(batch))
    }

    /// Drop pending events and cancel the batch timer
    pub fn cancel(&mut self) -> usize {
        self.flush_timer.cancel();
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.flush_timer.deadline()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn process(&mut self, batch: Vec<RawEvent>) -> Dispatch {
        let received = batch.len();
        let (events, coalesced) = coalesce(batch);
        if coalesced > 0 {
            debug!(coalesced, received, "coalesced redundant full-refresh events");
        }
        let plan = RefreshPlan::from_events(&events);

        if self.config.enable_metrics {
            self.stats.processed += received as u64;
            self.stats.coalesced += coalesced as u64;
            self.stats.batches += 1;
        }

        Dispatch {
            events,
            plan,
            received,
        }
    }

    /// Record how long executing a dispatch took
    pub fn complete_batch(&mut self, elapsed: Duration, events: usize) {
        if !self.config.enable_metrics {
            return;
        }
        self.stats.last_batch_time = elapsed;
        self.stats.average_batch_time =
            self.stats.average_batch_time.mul_f64(0.9) + elapsed.mul_f64(0.1);

        if elapsed > self.config.slow_batch_threshold {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                events, "slow batch processing"
            );
        }
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> IntakeStats {
        self.stats.clone()
    }

    pub fn reset_stats(&mut self) {
        self.stats = IntakeStats::default();
    }
}

impl std::fmt::Debug for IntakePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntakePipeline")
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .field("deadline", &self.flush_timer.deadline())
            .field("stats", &self.stats)
            .finish()
    }
}
