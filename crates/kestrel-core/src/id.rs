//! Identity types for KESTREL
//!
//! Message and channel identifiers are opaque strings handed out by the
//! server. Locally created messages carry a temporary id with a
//! distinguishable prefix until the server confirms them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix used for client-generated message ids
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Message identity - unique within a conversation once confirmed
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        MessageId(id.into())
    }

    /// Build a temporary id from a client-side sequence number
    #[inline]
    pub fn temporary(seq: u64) -> Self {
        MessageId(format!("{TEMP_ID_PREFIX}{seq}"))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Is this a client-generated id under the given prefix?
    #[inline]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    /// Is this a client-generated id under the default prefix?
    #[inline]
    pub fn is_temporary(&self) -> bool {
        self.has_prefix(TEMP_ID_PREFIX)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Msg({})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        MessageId(s)
    }
}

/// Channel identity - one addressable chat context (channel or DM pair)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl ChannelId {
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        ChannelId(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Blank ids are never subscribed
    #[inline]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel({})", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        ChannelId(s.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        ChannelId(s)
    }
}
