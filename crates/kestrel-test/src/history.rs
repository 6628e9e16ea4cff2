//! Fake server-side paged history

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kestrel_core::{ChannelId, KestrelError, KestrelResult, Message, MessageId, Timestamp};
use kestrel_window::{InitialPage, OlderPage, PageSource};
use parking_lot::Mutex;

/// Spacing between generated message timestamps
pub const MESSAGE_SPACING: Duration = Duration::from_secs(1);

/// Fetch call counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryStats {
    pub initial: usize,
    pub older: usize,
    pub failures: usize,
}

/// Conversation histories served in pages, oldest to newest
#[derive(Default)]
pub struct FakeHistory {
    conversations: Mutex<HashMap<ChannelId, Vec<Message>>>,
    fail_next: AtomicUsize,
    latency: Mutex<Duration>,
    stats: Mutex<HistoryStats>,
}

impl FakeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// History pre-filled with `count` generated messages
    pub fn with_messages(conversation: impl Into<ChannelId>, count: usize) -> Self {
        let history = Self::new();
        history.seed(conversation, count, Timestamp(1_700_000_000_000));
        history
    }

    /// Replace a conversation with `count` generated messages `m0..`
    pub fn seed(&self, conversation: impl Into<ChannelId>, count: usize, start: Timestamp) {
        let messages = (0..count)
            .map(|i| {
                let sender = if i % 2 == 0 { "alice" } else { "bob" };
                Message::new(
                    format!("m{i}"),
                    start + MESSAGE_SPACING * i as u32,
                    sender,
                    format!("message {i}"),
                )
            })
            .collect();
        self.conversations.lock().insert(conversation.into(), messages);
    }

    /// A new message lands on the server
    pub fn push(&self, conversation: impl Into<ChannelId>, message: Message) {
        self.conversations
            .lock()
            .entry(conversation.into())
            .or_default()
            .push(message);
    }

    pub fn len(&self, conversation: &ChannelId) -> usize {
        self.conversations
            .lock()
            .get(conversation)
            .map_or(0, Vec::len)
    }

    /// The next `n` fetches fail
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Every fetch sleeps this long first (tokio time)
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn stats(&self) -> HistoryStats {
        self.stats.lock().clone()
    }

    async fn begin(&self) -> KestrelResult<()> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            self.stats.lock().failures += 1;
            return Err(KestrelError::Fetch("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PageSource for FakeHistory {
    async fn fetch_initial(
        &self,
        conversation: &ChannelId,
        page_size: usize,
    ) -> KestrelResult<InitialPage> {
        self.stats.lock().initial += 1;
        self.begin().await?;

        let conversations = self.conversations.lock();
        let all = conversations.get(conversation).map_or(&[][..], Vec::as_slice);
        let start = all.len().saturating_sub(page_size);
        Ok(InitialPage {
            messages: all[start..].to_vec(),
            total_count: all.len() as u64,
        })
    }

    async fn fetch_older(
        &self,
        conversation: &ChannelId,
        cursor: &MessageId,
        page_size: usize,
    ) -> KestrelResult<OlderPage> {
        self.stats.lock().older += 1;
        self.begin().await?;

        let conversations = self.conversations.lock();
        let all = conversations.get(conversation).map_or(&[][..], Vec::as_slice);
        let end = all
            .iter()
            .position(|m| &m.id == cursor)
            .ok_or_else(|| KestrelError::Fetch(format!("unknown cursor {cursor}")))?;
        let start = end.saturating_sub(page_size);
        Ok(OlderPage {
            messages: all[start..end].to_vec(),
            has_older: start > 0,
        })
    }
}

impl std::fmt::Debug for FakeHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeHistory")
            .field("conversations", &self.conversations.lock().len())
            .field("stats", &self.stats())
            .finish()
    }
}
