//! KESTREL Health - Connection liveness and reconnection
//!
//! A clock-driven state machine. The runtime feeds it delivered events and
//! wakes it at [`HealthMonitor::next_deadline`]; the monitor decides when
//! the connection is stale and when to try reconnecting.

pub mod monitor;

pub use monitor::*;
