//! KESTREL Core - Fundamental types for the message synchronization core
//!
//! This crate defines the types shared by every other KESTREL crate:
//! - Identifiers (MessageId, ChannelId)
//! - Time primitives (Timestamp)
//! - Message records and partial patches
//! - Raw real-time events and their sub-event tagged union
//! - The error taxonomy

pub mod id;
pub mod time;
pub mod message;
pub mod event;
pub mod error;

pub use id::*;
pub use time::*;
pub use message::*;
pub use event::*;
pub use error::*;
