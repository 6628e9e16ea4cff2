//! Paged history collaborator

use async_trait::async_trait;
use kestrel_core::{ChannelId, KestrelResult, Message, MessageId};

/// Newest page of a conversation
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InitialPage {
    /// Oldest to newest
    pub messages: Vec<Message>,
    /// Server-reported total message count
    pub total_count: u64,
}

/// A page older than some cursor
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OlderPage {
    /// Oldest to newest
    pub messages: Vec<Message>,
    pub has_older: bool,
}

/// Remote paged-fetch API for message history
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_initial(
        &self,
        conversation: &ChannelId,
        page_size: usize,
    ) -> KestrelResult<InitialPage>;

    /// Messages strictly older than `cursor`
    async fn fetch_older(
        &self,
        conversation: &ChannelId,
        cursor: &MessageId,
        page_size: usize,
    ) -> KestrelResult<OlderPage>;

    /// The newest `limit` messages, oldest to newest. Used to catch up
    /// after a live "message sent" signal.
    async fn fetch_recent(
        &self,
        conversation: &ChannelId,
        limit: usize,
    ) -> KestrelResult<Vec<Message>> {
        Ok(self.fetch_initial(conversation, limit).await?.messages)
    }
}
