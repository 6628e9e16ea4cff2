//! Error types for KESTREL

use thiserror::Error;

use crate::{ChannelId, MessageId};

/// Core KESTREL errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KestrelError {
    // Data invariant violations
    #[error("Id collision: {id} already names a different message")]
    IdCollision { id: MessageId },

    #[error("Malformed update descriptor: {0}")]
    MalformedDescriptor(&'static str),

    #[error("Invalid message id: {0}")]
    InvalidMessageId(MessageId),

    // Boundary failures
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Subscription failed for {channel}: {reason}")]
    Subscription { channel: ChannelId, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    // Configuration
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Shut down")]
    Shutdown,
}

impl KestrelError {
    /// Invariant violations indicate a caller bug and are propagated
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            KestrelError::IdCollision { .. }
                | KestrelError::MalformedDescriptor(_)
                | KestrelError::InvalidMessageId(_)
        )
    }
}

/// Result type for KESTREL operations
pub type KestrelResult<T> = Result<T, KestrelError>;
