//! Heartbeat tracking and reconnection scheduling
//!
//! ```text
//! Healthy ──timeout──▶ Degraded ──N misses──▶ Reconnecting ──event──▶ Healthy
//!    ▲                                            │
//!    └──────────── reset / event ◀── Failed ◀─────┘ (attempts exhausted)
//! ```

use std::sync::Arc;
use std::time::Duration;

use kestrel_core::Timestamp;
use kestrel_time::{Backoff, Clock, TimerSlot};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Health monitor configuration
#[derive(Clone, Debug)]
pub struct HealthConfig {
    /// Silence longer than this counts as a missed heartbeat
    pub heartbeat_timeout: Duration,
    /// Attempts before giving up
    pub max_reconnect_attempts: u32,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    /// Consecutive misses before a reconnect is scheduled
    pub missed_heartbeats_before_reconnect: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            heartbeat_timeout: Duration::from_secs(60),
            max_reconnect_attempts: 5,
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            missed_heartbeats_before_reconnect: 2,
        }
    }
}

impl HealthConfig {
    /// Periodic check runs at half the heartbeat timeout
    pub fn check_interval(&self) -> Duration {
        self.heartbeat_timeout / 2
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.initial_reconnect_delay, self.max_reconnect_delay)
    }
}

/// Connection health state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Reconnecting,
    Failed,
}

/// Point-in-time snapshot for the host
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub state: HealthState,
    pub is_connected: bool,
    pub last_event_time: Timestamp,
    pub missed_heartbeats: u32,
    pub reconnect_attempts: u32,
    /// When the next reconnect fires, if one is scheduled
    pub reconnect_at: Option<Timestamp>,
}

/// Result of one periodic check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckOutcome {
    /// An event arrived within the timeout
    Fresh,
    /// Stale, no reconnect scheduled by this check
    Missed { missed: u32 },
    /// Stale, reconnect `attempt` (1-based) will fire after `delay`
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Attempts exhausted
    Failed,
}

/// Clock-driven connection health state machine
pub struct HealthMonitor {
    config: HealthConfig,
    backoff: Backoff,
    clock: Arc<dyn Clock>,
    state: HealthState,
    connected: bool,
    last_event: Timestamp,
    missed: u32,
    attempts: u32,
    check_timer: TimerSlot,
    reconnect_timer: TimerSlot,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let mut check_timer = TimerSlot::new();
        check_timer.schedule_after(now, config.check_interval());
        HealthMonitor {
            backoff: config.backoff(),
            config,
            clock,
            state: HealthState::Healthy,
            connected: true,
            last_event: now,
            missed: 0,
            attempts: 0,
            check_timer,
            reconnect_timer: TimerSlot::new(),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Any delivered event proves the connection is alive
    pub fn record_event(&mut self) {
        if self.state != HealthState::Healthy {
            info!(
                previous = ?self.state,
                attempts = self.attempts,
                "connection recovered"
            );
        }
        self.mark_healthy();
    }

    /// External reset, e.g. a user-initiated reconnect. Leaves `Failed`.
    pub fn reset(&mut self) {
        debug!(state = ?self.state, "health monitor reset");
        self.mark_healthy();
        let now = self.clock.now();
        self.check_timer.schedule_after(now, self.config.check_interval());
    }

    fn mark_healthy(&mut self) {
        self.last_event = self.clock.now();
        self.missed = 0;
        self.attempts = 0;
        self.connected = true;
        self.state = HealthState::Healthy;
        self.reconnect_timer.cancel();
    }

    /// Run the periodic staleness check now and re-arm the next one
    pub fn check(&mut self) -> CheckOutcome {
        let now = self.clock.now();
        self.check_timer.schedule_after(now, self.config.check_interval());

        if self.state == HealthState::Failed {
            return CheckOutcome::Failed;
        }

        let silent_for = now - self.last_event;
        if silent_for <= self.config.heartbeat_timeout {
            return CheckOutcome::Fresh;
        }

        self.missed = self.missed.saturating_add(1);
        self.connected = false;
        warn!(
            silent_ms = silent_for.as_millis() as u64,
            missed = self.missed,
            "no events within heartbeat timeout"
        );

        if self.missed < self.config.missed_heartbeats_before_reconnect
            || self.reconnect_timer.is_armed()
        {
            if self.state == HealthState::Healthy {
                self.state = HealthState::Degraded;
            }
            return CheckOutcome::Missed {
                missed: self.missed,
            };
        }

        self.schedule_reconnect(now)
    }

    fn schedule_reconnect(&mut self, now: Timestamp) -> CheckOutcome {
        if self.attempts >= self.config.max_reconnect_attempts {
            error!(
                attempts = self.attempts,
                "max reconnection attempts reached, giving up"
            );
            self.state = HealthState::Failed;
            self.connected = false;
            self.reconnect_timer.cancel();
            return CheckOutcome::Failed;
        }

        let delay = self.backoff.delay(self.attempts);
        let attempt = self.attempts + 1;
        self.reconnect_timer.schedule_after(now, delay);
        self.state = HealthState::Reconnecting;
        info!(
            delay_ms = delay.as_millis() as u64,
            attempt,
            max = self.config.max_reconnect_attempts,
            "scheduling reconnect"
        );
        CheckOutcome::ReconnectScheduled { attempt, delay }
    }

    /// Run the periodic check if it is due
    pub fn poll_check(&mut self) -> Option<CheckOutcome> {
        if self.check_timer.is_due(self.clock.now()) {
            Some(self.check())
        } else {
            None
        }
    }

    /// Fire the reconnect timer if due. Returns the attempt number (1-based)
    /// the caller must now perform.
    pub fn poll_reconnect(&mut self) -> Option<u32> {
        if !self.reconnect_timer.take_due(self.clock.now()) {
            return None;
        }
        self.attempts += 1;
        debug!(attempt = self.attempts, "reconnect timer fired");
        Some(self.attempts)
    }

    /// Earliest pending deadline across the check and reconnect timers
    pub fn next_deadline(&self) -> Option<Timestamp> {
        match (self.check_timer.deadline(), self.reconnect_timer.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Disarm every timer. Nothing fires afterwards until `reset`.
    pub fn cancel_timers(&mut self) {
        self.check_timer.cancel();
        self.reconnect_timer.cancel();
    }

    pub fn check_interval(&self) -> Duration {
        self.config.check_interval()
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Connected with no outstanding misses
    pub fn is_healthy(&self) -> bool {
        self.connected && self.missed == 0
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus {
            state: self.state,
            is_connected: self.connected,
            last_event_time: self.last_event,
            missed_heartbeats: self.missed,
            reconnect_attempts: self.attempts,
            reconnect_at: self.reconnect_timer.deadline(),
        }
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("state", &self.state)
            .field("missed", &self.missed)
            .field("attempts", &self.attempts)
            .field("next_deadline", &self.next_deadline())
            .finish()
    }
}
