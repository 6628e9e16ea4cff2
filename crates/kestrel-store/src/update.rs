//! Live update descriptors
//!
//! Out-of-band mutations (edits, deletions, reactions, thread replies) reach
//! the store as a message id plus an [`UpdateDescriptor`]. A descriptor is
//! either a plain field patch or a pure function from the current message
//! to a patch.

use std::fmt;

use kestrel_core::{
    KestrelError, Message, MessageId, MessagePatch, Timestamp, FIELD_DELETED, FIELD_REACTIONS,
    FIELD_THREAD_COUNT, FIELD_THREAD_LAST_TIMESTAMP,
};
use serde_json::{json, Map, Value};

/// Pure update function
pub type UpdateFn = Box<dyn FnOnce(&Message) -> MessagePatch + Send>;

/// Exactly one form of update
pub enum UpdateDescriptor {
    Fields(MessagePatch),
    Function(UpdateFn),
}

impl UpdateDescriptor {
    pub fn function<F>(f: F) -> Self
    where
        F: FnOnce(&Message) -> MessagePatch + Send + 'static,
    {
        UpdateDescriptor::Function(Box::new(f))
    }

    /// Resolve against the current value of the message
    pub fn into_patch(self, current: &Message) -> MessagePatch {
        match self {
            UpdateDescriptor::Fields(patch) => patch,
            UpdateDescriptor::Function(f) => f(current),
        }
    }
}

impl fmt::Debug for UpdateDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateDescriptor::Fields(patch) => f.debug_tuple("Fields").field(patch).finish(),
            UpdateDescriptor::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Loose descriptor as handed over by a host that may fill in either slot
#[derive(Default)]
pub struct UpdateSpec {
    pub updated_fields: Option<MessagePatch>,
    pub update_fn: Option<UpdateFn>,
}

impl TryFrom<UpdateSpec> for UpdateDescriptor {
    type Error = KestrelError;

    fn try_from(spec: UpdateSpec) -> Result<Self, Self::Error> {
        match (spec.updated_fields, spec.update_fn) {
            (Some(patch), None) => Ok(UpdateDescriptor::Fields(patch)),
            (None, Some(f)) => Ok(UpdateDescriptor::Function(f)),
            (Some(_), Some(_)) => Err(KestrelError::MalformedDescriptor(
                "cannot have both updated fields and an update function",
            )),
            (None, None) => Err(KestrelError::MalformedDescriptor(
                "needs updated fields or an update function",
            )),
        }
    }
}

/// One addressed mutation
#[derive(Debug)]
pub struct LiveUpdate {
    pub id: MessageId,
    pub descriptor: UpdateDescriptor,
}

impl LiveUpdate {
    pub fn new(id: impl Into<MessageId>, descriptor: UpdateDescriptor) -> Self {
        LiveUpdate {
            id: id.into(),
            descriptor,
        }
    }

    pub fn fields(id: impl Into<MessageId>, patch: MessagePatch) -> Self {
        Self::new(id, UpdateDescriptor::Fields(patch))
    }

    pub fn from_spec(id: impl Into<MessageId>, spec: UpdateSpec) -> Result<Self, KestrelError> {
        Ok(Self::new(id, UpdateDescriptor::try_from(spec)?))
    }

    /// Replace the message body
    pub fn edit(id: impl Into<MessageId>, text: impl Into<String>) -> Self {
        Self::fields(
            id,
            MessagePatch::new()
                .text(text)
                .field("edited", Value::Bool(true)),
        )
    }

    /// Soft delete: the entry stays in place so logical indices do not shift
    pub fn delete(id: impl Into<MessageId>) -> Self {
        Self::fields(
            id,
            MessagePatch::new()
                .text("")
                .field(FIELD_DELETED, Value::Bool(true)),
        )
    }

    /// Add `user` under `emoji`, or remove them if already present
    pub fn toggle_reaction(
        id: impl Into<MessageId>,
        emoji: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        let emoji = emoji.into();
        let user = user.into();
        Self::new(
            id,
            UpdateDescriptor::function(move |current| {
                let mut reactions = current
                    .field(FIELD_REACTIONS)
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_else(Map::new);

                let mut users: Vec<Value> = reactions
                    .get(&emoji)
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();

                if let Some(pos) = users.iter().position(|u| u.as_str() == Some(user.as_str())) {
                    users.remove(pos);
                } else {
                    users.push(Value::String(user));
                }

                if users.is_empty() {
                    reactions.remove(&emoji);
                } else {
                    reactions.insert(emoji, Value::Array(users));
                }

                MessagePatch::new().field(FIELD_REACTIONS, Value::Object(reactions))
            }),
        )
    }

    /// A thread reply arrived for this message
    pub fn bump_thread_count(id: impl Into<MessageId>, reply_at: Timestamp) -> Self {
        Self::new(
            id,
            UpdateDescriptor::function(move |current| {
                MessagePatch::new()
                    .field(FIELD_THREAD_COUNT, json!(current.thread_count() + 1))
                    .field(FIELD_THREAD_LAST_TIMESTAMP, json!(reply_at.as_millis()))
            }),
        )
    }
}
