//! Multi-channel subscription bookkeeping
//!
//! The process keeps one [`SubscriptionSet`] for every open conversation.
//! A desired channel list is diffed against what is currently subscribed,
//! so only the delta reaches the transport. All channels share one delivery
//! callback that lives in a [`CallbackCell`]; swapping it never touches the
//! server-side subscriptions.

use std::collections::BTreeSet;
use std::sync::Arc;

use kestrel_core::{ChannelId, KestrelError, KestrelResult, RawEvent};
use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

/// Shared delivery callback
pub type EventCallback = Arc<dyn Fn(RawEvent) + Send + Sync>;

/// Single mutable slot holding the current callback
#[derive(Clone, Default)]
pub struct CallbackCell {
    slot: Arc<RwLock<Option<EventCallback>>>,
}

impl CallbackCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, callback: EventCallback) {
        *self.slot.write() = Some(callback);
    }

    pub fn clear(&self) {
        *self.slot.write() = None;
    }

    pub fn is_set(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Handle given to the transport
    pub fn sink(&self) -> EventSink {
        EventSink { cell: self.clone() }
    }
}

/// Delivery endpoint handed to the transport. Reads the callback cell at
/// delivery time, so a swapped callback takes effect immediately.
#[derive(Clone)]
pub struct EventSink {
    cell: CallbackCell,
}

impl EventSink {
    /// Returns false if no callback was installed
    pub fn deliver(&self, event: RawEvent) -> bool {
        // Clone out so the callback never runs under the lock
        let callback = self.cell.slot.read().clone();
        match callback {
            Some(cb) => {
                cb(event);
                true
            }
            None => {
                trace!(channel = %event.context_id, "dropping event, no callback installed");
                false
            }
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("installed", &self.cell.is_set())
            .finish()
    }
}

/// Multiplexed subscribe/unsubscribe transport
pub trait EventTransport: Send + Sync {
    fn subscribe(&self, channels: &[ChannelId], sink: EventSink) -> KestrelResult<()>;

    fn unsubscribe(&self, channels: &[ChannelId]) -> KestrelResult<()>;
}

/// What one reconcile call changed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionDiff {
    pub subscribed: Vec<ChannelId>,
    pub unsubscribed: Vec<ChannelId>,
    /// Ids whose transport call failed; their membership is unchanged
    pub failed: Vec<ChannelId>,
}

impl SubscriptionDiff {
    pub fn is_noop(&self) -> bool {
        self.subscribed.is_empty() && self.unsubscribed.is_empty() && self.failed.is_empty()
    }
}

/// Process-wide set of subscribed channels
pub struct SubscriptionSet {
    transport: Arc<dyn EventTransport>,
    callback: CallbackCell,
    subscribed: BTreeSet<ChannelId>,
    shut_down: bool,
}

impl SubscriptionSet {
    pub fn new(transport: Arc<dyn EventTransport>) -> Self {
        SubscriptionSet {
            transport,
            callback: CallbackCell::new(),
            subscribed: BTreeSet::new(),
            shut_down: false,
        }
    }

    /// The shared callback cell
    pub fn callback_cell(&self) -> &CallbackCell {
        &self.callback
    }

    /// Swap the delivery callback without re-subscribing
    pub fn set_callback(&self, callback: EventCallback) {
        self.callback.set(callback);
    }

    /// Diff `desired` against the current set and apply only the delta.
    /// Blank and repeated ids are ignored.
    pub fn reconcile(&mut self, desired: &[ChannelId]) -> KestrelResult<SubscriptionDiff> {
        self.ensure_open()?;

        let wanted: BTreeSet<ChannelId> = desired
            .iter()
            .filter(|id| !id.is_blank())
            .cloned()
            .collect();

        let to_remove: Vec<ChannelId> = self.subscribed.difference(&wanted).cloned().collect();
        let to_add: Vec<ChannelId> = wanted.difference(&self.subscribed).cloned().collect();

        let mut diff = SubscriptionDiff::default();
        if !to_remove.is_empty() {
            info!(count = to_remove.len(), "unsubscribing from channels");
        }
        for id in to_remove {
            match self.transport.unsubscribe(std::slice::from_ref(&id)) {
                Ok(()) => {
                    self.subscribed.remove(&id);
                    diff.unsubscribed.push(id);
                }
                Err(e) => {
                    warn!(channel = %id, error = %e, "failed to unsubscribe");
                    diff.failed.push(id);
                }
            }
        }

        if !to_add.is_empty() {
            info!(count = to_add.len(), "subscribing to channels");
        }
        for id in to_add {
            match self.transport.subscribe(std::slice::from_ref(&id), self.callback.sink()) {
                Ok(()) => {
                    self.subscribed.insert(id.clone());
                    diff.subscribed.push(id);
                }
                Err(e) => {
                    warn!(channel = %id, error = %e, "failed to subscribe");
                    diff.failed.push(id);
                }
            }
        }

        debug!(total = self.subscribed.len(), "subscription set reconciled");
        Ok(diff)
    }

    /// Subscribe one more channel. No-op if already subscribed.
    pub fn subscribe_one(&mut self, id: &ChannelId) -> KestrelResult<bool> {
        self.ensure_open()?;
        if id.is_blank() || self.subscribed.contains(id) {
            return Ok(false);
        }
        self.transport
            .subscribe(std::slice::from_ref(id), self.callback.sink())
            .map_err(|e| subscription_error(id, e))?;
        self.subscribed.insert(id.clone());
        Ok(true)
    }

    /// Unsubscribe one channel. No-op if not subscribed.
    pub fn unsubscribe_one(&mut self, id: &ChannelId) -> KestrelResult<bool> {
        if !self.subscribed.contains(id) {
            return Ok(false);
        }
        self.transport
            .unsubscribe(std::slice::from_ref(id))
            .map_err(|e| subscription_error(id, e))?;
        self.subscribed.remove(id);
        Ok(true)
    }

    /// Unsubscribe every channel, one call per id. Returns ids that failed;
    /// those stay in the set.
    pub fn unsubscribe_all(&mut self) -> Vec<ChannelId> {
        if self.subscribed.is_empty() {
            return Vec::new();
        }
        info!(count = self.subscribed.len(), "unsubscribing from all channels");

        let mut failed = Vec::new();
        for id in std::mem::take(&mut self.subscribed) {
            if let Err(e) = self.transport.unsubscribe(std::slice::from_ref(&id)) {
                warn!(channel = %id, error = %e, "failed to unsubscribe");
                failed.push(id);
            }
        }
        self.subscribed.extend(failed.iter().cloned());
        failed
    }

    /// Re-issue subscribe for every current channel after a reconnect.
    /// Returns the number of channels re-subscribed.
    pub fn resubscribe_all(&mut self) -> KestrelResult<usize> {
        self.ensure_open()?;
        let mut ok = 0;
        for id in &self.subscribed {
            match self.transport.subscribe(std::slice::from_ref(id), self.callback.sink()) {
                Ok(()) => ok += 1,
                Err(e) => warn!(channel = %id, error = %e, "failed to resubscribe"),
            }
        }
        Ok(ok)
    }

    /// Unsubscribe everything and refuse further changes
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.unsubscribe_all();
        self.callback.clear();
        self.shut_down = true;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Subscribed channels in sorted order
    pub fn channels(&self) -> Vec<ChannelId> {
        self.subscribed.iter().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.subscribed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribed.is_empty()
    }

    pub fn is_subscribed(&self, id: &ChannelId) -> bool {
        self.subscribed.contains(id)
    }

    fn ensure_open(&self) -> KestrelResult<()> {
        if self.shut_down {
            Err(KestrelError::Shutdown)
        } else {
            Ok(())
        }
    }
}

fn subscription_error(id: &ChannelId, e: KestrelError) -> KestrelError {
    match e {
        KestrelError::Subscription { .. } => e,
        other => KestrelError::Subscription {
            channel: id.clone(),
            reason: other.to_string(),
        },
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

impl std::fmt::Debug for SubscriptionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionSet")
            .field("subscribed", &self.subscribed)
            .field("shut_down", &self.shut_down)
            .finish()
    }
}
