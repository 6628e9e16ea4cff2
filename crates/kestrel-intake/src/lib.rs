//! KESTREL Intake - Real-time event intake
//!
//! Turns the raw live event stream into a small set of refresh actions:
//! dedup against the previous event, batch by size or age, coalesce
//! redundant full refreshes, plan the resulting actions in priority order.
//! Also owns the process-wide channel subscription set.

pub mod action;
pub mod filter;
pub mod hub;
pub mod pipeline;
pub mod subscription;

pub use action::*;
pub use filter::*;
pub use hub::*;
pub use pipeline::*;
pub use subscription::*;
