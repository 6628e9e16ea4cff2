//! Scripted subscription transport

use std::collections::{BTreeMap, HashSet};

use kestrel_core::{ChannelId, KestrelError, KestrelResult, RawEvent};
use kestrel_intake::{EventSink, EventTransport};
use parking_lot::Mutex;

/// One recorded transport call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportCall {
    Subscribe(ChannelId),
    Unsubscribe(ChannelId),
}

impl TransportCall {
    pub fn channel(&self) -> &ChannelId {
        match self {
            TransportCall::Subscribe(id) | TransportCall::Unsubscribe(id) => id,
        }
    }
}

/// In-memory transport. Records every call, can be told to refuse given
/// channels, and delivers events to whichever sink subscribed the channel.
#[derive(Default)]
pub struct ScriptedTransport {
    calls: Mutex<Vec<TransportCall>>,
    failing: Mutex<HashSet<ChannelId>>,
    sinks: Mutex<BTreeMap<ChannelId, EventSink>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse subscribe and unsubscribe calls for `id`
    pub fn fail_on(&self, id: impl Into<ChannelId>) {
        self.failing.lock().insert(id.into());
    }

    pub fn heal(&self, id: &ChannelId) {
        self.failing.lock().remove(id);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    pub fn take_calls(&self) -> Vec<TransportCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    /// Calls that mention `id`
    pub fn calls_for(&self, id: &ChannelId) -> Vec<TransportCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.channel() == id)
            .cloned()
            .collect()
    }

    /// Channels with a live server-side subscription
    pub fn active_channels(&self) -> Vec<ChannelId> {
        self.sinks.lock().keys().cloned().collect()
    }

    /// Deliver `event` to the sink subscribed for its channel. Returns
    /// false if nobody is subscribed.
    pub fn emit(&self, event: RawEvent) -> bool {
        let sink = self.sinks.lock().get(&event.context_id).cloned();
        match sink {
            Some(sink) => sink.deliver(event),
            None => false,
        }
    }

    pub fn emit_all(&self, events: impl IntoIterator<Item = RawEvent>) -> usize {
        events.into_iter().filter(|e| self.emit(e.clone())).count()
    }

    fn refuse(&self, id: &ChannelId) -> KestrelResult<()> {
        if self.failing.lock().contains(id) {
            return Err(KestrelError::Subscription {
                channel: id.clone(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

impl EventTransport for ScriptedTransport {
    fn subscribe(&self, channels: &[ChannelId], sink: EventSink) -> KestrelResult<()> {
        for id in channels {
            self.refuse(id)?;
            self.calls.lock().push(TransportCall::Subscribe(id.clone()));
            self.sinks.lock().insert(id.clone(), sink.clone());
        }
        Ok(())
    }

    fn unsubscribe(&self, channels: &[ChannelId]) -> KestrelResult<()> {
        for id in channels {
            self.refuse(id)?;
            self.calls.lock().push(TransportCall::Unsubscribe(id.clone()));
            self.sinks.lock().remove(id);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("calls", &self.calls.lock().len())
            .field("active", &self.active_channels())
            .finish()
    }
}
