//! Message records and field patches
//!
//! The core only interprets `id`, `timestamp`, `sender` and `text`. Every
//! other field (reactions, thread metadata, attachments, ...) is carried as
//! an opaque JSON payload and merged key-by-key by patches.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{MessageId, Timestamp};

/// Payload key for the soft-delete marker
pub const FIELD_DELETED: &str = "deleted";
/// Payload key for the reaction map (`emoji -> [user]`)
pub const FIELD_REACTIONS: &str = "reactions";
/// Payload key for the thread reply counter
pub const FIELD_THREAD_COUNT: &str = "threadCount";
/// Payload key for the newest thread reply timestamp
pub const FIELD_THREAD_LAST_TIMESTAMP: &str = "threadLastTimestamp";

/// A chat message as held by the store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub text: String,
    /// Opaque payload
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(
        id: impl Into<MessageId>,
        timestamp: Timestamp,
        sender: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Message {
            id: id.into(),
            timestamp,
            sender: sender.into(),
            text: text.into(),
            extra: Map::new(),
        }
    }

    /// Builder-style payload field
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.extra.get(FIELD_DELETED), Some(Value::Bool(true)))
    }

    pub fn thread_count(&self) -> u64 {
        self.extra
            .get(FIELD_THREAD_COUNT)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    /// Body equality used to pair an optimistic message with its confirmation
    #[inline]
    pub fn content_matches(&self, other: &Message) -> bool {
        self.sender == other.sender && self.text == other.text
    }

    /// Merge a patch into this message. Payload keys set to `null` are removed.
    pub fn apply(&mut self, patch: MessagePatch) {
        if let Some(id) = patch.id {
            self.id = id;
        }
        if let Some(timestamp) = patch.timestamp {
            self.timestamp = timestamp;
        }
        if let Some(sender) = patch.sender {
            self.sender = sender;
        }
        if let Some(text) = patch.text {
            self.text = text;
        }
        for (key, value) in patch.extra {
            if value.is_null() {
                self.extra.remove(&key);
            } else {
                self.extra.insert(key, value);
            }
        }
    }

    /// Every field of this message except its id, as a patch
    pub fn into_confirmation_patch(self) -> MessagePatch {
        MessagePatch {
            id: None,
            timestamp: Some(self.timestamp),
            sender: Some(self.sender),
            text: Some(self.text),
            extra: self.extra,
        }
    }
}

/// Partial-field update for a message
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessagePatch {
    pub id: Option<MessageId>,
    pub timestamp: Option<Timestamp>,
    pub sender: Option<String>,
    pub text: Option<String>,
    pub extra: Map<String, Value>,
}

impl MessagePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.timestamp.is_none()
            && self.sender.is_none()
            && self.text.is_none()
            && self.extra.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_patch_merges_payload() {
        let mut msg = Message::new("m1", Timestamp(10), "alice", "hi")
            .with_field("reactions", json!({"👍": ["bob"]}))
            .with_field("pinned", json!(true));

        msg.apply(
            MessagePatch::new()
                .text("edited")
                .field("pinned", Value::Null)
                .field(FIELD_THREAD_COUNT, json!(2)),
        );

        assert_eq!(msg.text, "edited");
        assert_eq!(msg.sender, "alice");
        assert!(msg.field("pinned").is_none());
        assert_eq!(msg.thread_count(), 2);
        assert!(msg.field("reactions").is_some());
    }

    #[test]
    fn test_confirmation_patch_keeps_target_id() {
        let mut temp = Message::new("temp-1", Timestamp(1_000), "alice", "hi");
        let confirmed = Message::new("real-42", Timestamp(2_000), "alice", "hi")
            .with_field("edited", json!(false));

        temp.apply(confirmed.clone().into_confirmation_patch());

        assert_eq!(temp.id.as_str(), "temp-1");
        assert_eq!(temp.timestamp, confirmed.timestamp);
        assert_eq!(temp.extra, confirmed.extra);
    }

    #[test]
    fn test_deserialize_flattens_payload() {
        let msg: Message = serde_json::from_value(json!({
            "id": "m9",
            "timestamp": 1700,
            "sender": "carol",
            "text": "yo",
            "threadCount": 3
        }))
        .unwrap();

        assert_eq!(msg.id, MessageId::new("m9"));
        assert_eq!(msg.thread_count(), 3);
        assert!(!msg.is_deleted());
    }
}
