//! Raw push events as delivered by the subscription transport
//!
//! Wire shape:
//! `{ contextId, type, data?: { events?: [{ kind, data? }], timestamp? }, timestamp? }`
//!
//! Both `type` and `kind` are closed tag sets with an explicit `Unknown`
//! fallback so that new server-side kinds never fail deserialization.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ChannelId, Timestamp};

/// Top-level event tag
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    /// A batch of low-level domain events occurred; implies re-deriving state
    StateMutation,
    ExecutionEvent,
    Unknown(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::StateMutation => "StateMutation",
            EventType::ExecutionEvent => "ExecutionEvent",
            EventType::Unknown(s) => s,
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "StateMutation" => EventType::StateMutation,
            "ExecutionEvent" => EventType::ExecutionEvent,
            _ => EventType::Unknown(s),
        }
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        match t {
            EventType::Unknown(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

/// Domain sub-event tag carried inside a full-refresh event
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubEventKind {
    ChatInitialized,
    ChatJoined,
    ChannelCreated,
    ChannelInvited,
    ChannelLeft,
    ChannelJoined,
    MessageSent,
    MessageSentThread,
    MessageReceived,
    DmCreated,
    ReactionUpdated,
    NewIdentityUpdated,
    InvitationPayloadUpdated,
    InvitationAccepted,
    Unknown(String),
}

impl SubEventKind {
    pub fn as_str(&self) -> &str {
        match self {
            SubEventKind::ChatInitialized => "ChatInitialized",
            SubEventKind::ChatJoined => "ChatJoined",
            SubEventKind::ChannelCreated => "ChannelCreated",
            SubEventKind::ChannelInvited => "ChannelInvited",
            SubEventKind::ChannelLeft => "ChannelLeft",
            SubEventKind::ChannelJoined => "ChannelJoined",
            SubEventKind::MessageSent => "MessageSent",
            SubEventKind::MessageSentThread => "MessageSentThread",
            SubEventKind::MessageReceived => "MessageReceived",
            SubEventKind::DmCreated => "DMCreated",
            SubEventKind::ReactionUpdated => "ReactionUpdated",
            SubEventKind::NewIdentityUpdated => "NewIdentityUpdated",
            SubEventKind::InvitationPayloadUpdated => "InvitationPayloadUpdated",
            SubEventKind::InvitationAccepted => "InvitationAccepted",
            SubEventKind::Unknown(s) => s,
        }
    }

    #[inline]
    pub fn is_known(&self) -> bool {
        !matches!(self, SubEventKind::Unknown(_))
    }
}

impl From<String> for SubEventKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "ChatInitialized" => SubEventKind::ChatInitialized,
            "ChatJoined" => SubEventKind::ChatJoined,
            "ChannelCreated" => SubEventKind::ChannelCreated,
            "ChannelInvited" => SubEventKind::ChannelInvited,
            "ChannelLeft" => SubEventKind::ChannelLeft,
            "ChannelJoined" => SubEventKind::ChannelJoined,
            "MessageSent" => SubEventKind::MessageSent,
            "MessageSentThread" => SubEventKind::MessageSentThread,
            "MessageReceived" => SubEventKind::MessageReceived,
            "DMCreated" => SubEventKind::DmCreated,
            "ReactionUpdated" => SubEventKind::ReactionUpdated,
            "NewIdentityUpdated" => SubEventKind::NewIdentityUpdated,
            "InvitationPayloadUpdated" => SubEventKind::InvitationPayloadUpdated,
            "InvitationAccepted" => SubEventKind::InvitationAccepted,
            _ => SubEventKind::Unknown(s),
        }
    }
}

impl From<SubEventKind> for String {
    fn from(k: SubEventKind) -> Self {
        match k {
            SubEventKind::Unknown(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

/// One domain sub-event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubEvent {
    pub kind: SubEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl SubEvent {
    pub fn new(kind: SubEventKind) -> Self {
        SubEvent { kind, data: None }
    }
}

/// Event payload
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SubEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A push event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "contextId", default)]
    pub context_id: ChannelId,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EventData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl RawEvent {
    pub fn new(context_id: impl Into<ChannelId>, event_type: EventType) -> Self {
        RawEvent {
            context_id: context_id.into(),
            event_type,
            data: None,
            timestamp: None,
        }
    }

    /// Full-refresh event carrying the given sub-event kinds
    pub fn state_mutation(context_id: impl Into<ChannelId>, kinds: &[SubEventKind]) -> Self {
        let mut event = RawEvent::new(context_id, EventType::StateMutation);
        event.data = Some(EventData {
            events: kinds.iter().cloned().map(SubEvent::new).collect(),
            ..EventData::default()
        });
        event
    }

    pub fn with_timestamp(mut self, millis: i64) -> Self {
        self.timestamp = Some(millis);
        self
    }

    pub fn with_data_timestamp(mut self, millis: i64) -> Self {
        self.data.get_or_insert_with(EventData::default).timestamp = Some(millis);
        self
    }

    /// Is this the catch-all "re-derive everything" event?
    #[inline]
    pub fn is_full_refresh(&self) -> bool {
        self.event_type == EventType::StateMutation
    }

    pub fn sub_events(&self) -> &[SubEvent] {
        self.data.as_ref().map(|d| d.events.as_slice()).unwrap_or(&[])
    }

    /// Producer timestamp: payload timestamp first, then the envelope's
    pub fn effective_timestamp(&self) -> Option<i64> {
        self.data
            .as_ref()
            .and_then(|d| d.timestamp)
            .or(self.timestamp)
    }

    /// Duplicate-delivery key: `type` plus producer timestamp or `now`
    pub fn dedup_key(&self, now: Timestamp) -> String {
        let ts = self.effective_timestamp().unwrap_or(now.as_millis());
        format!("{}-{}", self.event_type.as_str(), ts)
    }
}
