//! KESTREL Runtime - Async host surface for the chat sync core
//!
//! [`SyncRuntime`] runs the event intake and health loops on tokio and
//! owns the process-wide subscription set. Each open conversation gets its
//! own [`ConversationView`].

pub mod clock;
pub mod config;
pub mod handler;
pub mod logging;
pub mod runtime;

pub use clock::*;
pub use config::*;
pub use handler::*;
pub use logging::*;
pub use runtime::*;

/// Per-conversation pagination window and message store. Never shared
/// between two conversations.
pub type ConversationView = kestrel_window::WindowController;

pub use kestrel_intake::RefreshAction;
