//! Pagination window controller
//!
//! One controller per open conversation. It owns the conversation's
//! [`MessageStore`] and the window anchor used by the virtualized list:
//!
//! ```text
//! Empty -> LoadingInitial -> Ready <-> LoadingOlder
//! ```
//!
//! Fetches never hold the state lock across an await. Overlapping requests
//! are suppressed by the phase guard, and results that return after a
//! conversation switch are discarded by comparing epochs.

use std::sync::Arc;
use std::time::Duration;

use kestrel_core::{ChannelId, KestrelResult, Message, Timestamp};
use kestrel_store::{AppendOutcome, LiveUpdate, MessageStore, ReconcileConfig};
use kestrel_time::Clock;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::PageSource;

/// Window tuning
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowConfig {
    /// Messages per history page
    pub page_size: usize,
    /// Quiet period after an older page lands before another may start
    pub older_cooldown: Duration,
    /// Size of the catch-up fetch after a live message signal
    pub recent_check_size: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            page_size: 20,
            older_cooldown: Duration::from_millis(200),
            recent_check_size: 5,
        }
    }
}

/// Loader phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WindowPhase {
    #[default]
    Empty,
    LoadingInitial,
    Ready,
    LoadingOlder,
}

/// Virtualization anchor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct WindowState {
    /// Logical index of the oldest loaded message
    pub first_item_index: i64,
    /// Server-reported total, grown by live appends
    pub total_count: u64,
    /// Older pages remain on the server
    pub has_more: bool,
}

/// Result of a load request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Fetch completed; `count` messages entered the store
    Loaded { count: usize },
    /// Guard rejected the request; nothing was fetched
    Suppressed,
    /// Fetch failed; state left as it was
    Failed,
    /// Conversation changed while the fetch was in flight
    Discarded,
}

/// One row of the render window
#[derive(Clone, Debug, PartialEq)]
pub struct RenderItem {
    pub key: String,
    pub message: Message,
}

/// Snapshot consumed by the virtualized list
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderWindow {
    pub items: Vec<RenderItem>,
    pub first_item_index: i64,
    pub total_count: u64,
}

impl RenderWindow {
    pub fn messages(&self) -> impl Iterator<Item = &Message> + '_ {
        self.items.iter().map(|i| &i.message)
    }
}

#[derive(Debug, Default)]
struct Inner {
    conversation: Option<ChannelId>,
    store: MessageStore,
    phase: WindowPhase,
    window: WindowState,
    /// Bumped on every conversation switch and initial load
    epoch: u64,
    older_ready_at: Option<Timestamp>,
}

impl Inner {
    fn settled_phase(&self) -> WindowPhase {
        if self.store.is_empty() && self.window.total_count == 0 {
            WindowPhase::Empty
        } else {
            WindowPhase::Ready
        }
    }
}

/// Pagination window controller for one conversation
#[derive(Clone)]
pub struct WindowController {
    inner: Arc<Mutex<Inner>>,
    source: Arc<dyn PageSource>,
    clock: Arc<dyn Clock>,
    config: WindowConfig,
}

impl WindowController {
    pub fn new(source: Arc<dyn PageSource>, clock: Arc<dyn Clock>, config: WindowConfig) -> Self {
        Self::with_reconcile(source, clock, config, ReconcileConfig::default())
    }

    pub fn with_reconcile(
        source: Arc<dyn PageSource>,
        clock: Arc<dyn Clock>,
        config: WindowConfig,
        reconcile: ReconcileConfig,
    ) -> Self {
        let inner = Inner {
            store: MessageStore::with_config(reconcile),
            ..Inner::default()
        };
        WindowController {
            inner: Arc::new(Mutex::new(inner)),
            source,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Reset store and window for a new active conversation.
    /// In-flight fetches for the previous conversation are discarded.
    pub fn switch_conversation(&self, conversation: ChannelId) {
        let mut inner = self.inner.lock();
        let epoch = inner.epoch.wrapping_add(1);
        let store_config = inner.store.config().clone();
        *inner = Inner {
            conversation: Some(conversation),
            store: MessageStore::with_config(store_config),
            epoch,
            ..Inner::default()
        };
    }

    pub fn conversation(&self) -> Option<ChannelId> {
        self.inner.lock().conversation.clone()
    }

    pub fn phase(&self) -> WindowPhase {
        self.inner.lock().phase
    }

    pub fn state(&self) -> WindowState {
        self.inner.lock().window
    }

    pub fn has_more(&self) -> bool {
        self.inner.lock().window.has_more
    }

    /// Fetch the newest page and rebuild the store from it
    pub async fn load_initial(&self) -> KestrelResult<LoadOutcome> {
        let (conversation, epoch) = {
            let mut inner = self.inner.lock();
            if inner.phase == WindowPhase::LoadingInitial {
                return Ok(LoadOutcome::Suppressed);
            }
            let Some(conversation) = inner.conversation.clone() else {
                return Ok(LoadOutcome::Suppressed);
            };
            inner.phase = WindowPhase::LoadingInitial;
            inner.epoch = inner.epoch.wrapping_add(1);
            (conversation, inner.epoch)
        };

        let result = self
            .source
            .fetch_initial(&conversation, self.config.page_size)
            .await;

        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            debug!(conversation = %conversation, "discarding stale initial page");
            return Ok(LoadOutcome::Discarded);
        }

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "failed to load initial messages");
                inner.phase = inner.settled_phase();
                return Ok(LoadOutcome::Failed);
            }
        };

        let loaded = page.messages.len();
        if let Err(e) = inner.store.initial(page.messages) {
            inner.phase = inner.settled_phase();
            return Err(e);
        }
        let total = page.total_count.max(loaded as u64);
        inner.window = WindowState {
            first_item_index: (total - loaded as u64) as i64,
            total_count: total,
            has_more: total > loaded as u64,
        };
        inner.phase = WindowPhase::Ready;
        inner.older_ready_at = None;

        debug!(conversation = %conversation, loaded, total, "initial page loaded");
        Ok(LoadOutcome::Loaded { count: loaded })
    }

    /// Fetch the page before the oldest loaded message and prepend it
    pub async fn load_older(&self) -> KestrelResult<LoadOutcome> {
        let now = self.clock.now();
        let (conversation, cursor, epoch) = {
            let mut inner = self.inner.lock();
            let cooling = matches!(inner.older_ready_at, Some(at) if now < at);
            if inner.phase != WindowPhase::Ready
                || !inner.window.has_more
                || inner.store.is_empty()
                || cooling
            {
                return Ok(LoadOutcome::Suppressed);
            }
            let (Some(conversation), Some(cursor)) =
                (inner.conversation.clone(), inner.store.oldest_id().cloned())
            else {
                inner.window.has_more = false;
                return Ok(LoadOutcome::Suppressed);
            };
            inner.phase = WindowPhase::LoadingOlder;
            (conversation, cursor, inner.epoch)
        };

        let result = self
            .source
            .fetch_older(&conversation, &cursor, self.config.page_size)
            .await;

        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            debug!(conversation = %conversation, "discarding stale older page");
            return Ok(LoadOutcome::Discarded);
        }
        inner.phase = WindowPhase::Ready;

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                warn!(conversation = %conversation, cursor = %cursor, error = %e, "failed to load older messages");
                return Ok(LoadOutcome::Failed);
            }
        };

        let prepended = inner.store.prepend(page.messages)?;
        inner.window.first_item_index -= prepended as i64;
        inner.window.has_more = page.has_older;
        inner.older_ready_at = Some(self.clock.now() + self.config.older_cooldown);

        debug!(conversation = %conversation, prepended, has_more = page.has_older, "older page loaded");
        Ok(LoadOutcome::Loaded { count: prepended })
    }

    /// Catch-up fetch of the newest few messages, appended through the
    /// normal dedup and reconciliation path
    pub async fn refresh_recent(&self) -> KestrelResult<LoadOutcome> {
        let (conversation, epoch) = {
            let inner = self.inner.lock();
            if matches!(inner.phase, WindowPhase::Empty | WindowPhase::LoadingInitial) {
                return Ok(LoadOutcome::Suppressed);
            }
            let Some(conversation) = inner.conversation.clone() else {
                return Ok(LoadOutcome::Suppressed);
            };
            (conversation, inner.epoch)
        };

        let result = self
            .source
            .fetch_recent(&conversation, self.config.recent_check_size)
            .await;

        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            return Ok(LoadOutcome::Discarded);
        }
        match result {
            Ok(messages) => {
                let outcome = inner.store.append(messages)?;
                inner.window.total_count += outcome.added as u64;
                Ok(LoadOutcome::Loaded {
                    count: outcome.added + outcome.merged,
                })
            }
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "failed to refresh recent messages");
                Ok(LoadOutcome::Failed)
            }
        }
    }

    /// Render a locally sent message before the server confirms it
    pub fn add_optimistic(&self, message: Message) -> KestrelResult<AppendOutcome> {
        let mut inner = self.inner.lock();
        let outcome = inner.store.add_optimistic(message)?;
        inner.window.total_count += outcome.added as u64;
        Ok(outcome)
    }

    /// Append live messages; the total grows by the newly added count
    pub fn append_incoming(&self, messages: Vec<Message>) -> KestrelResult<AppendOutcome> {
        let mut inner = self.inner.lock();
        let outcome = inner.store.append(messages)?;
        inner.window.total_count += outcome.added as u64;
        if outcome.added > 0 && inner.phase == WindowPhase::Empty {
            inner.phase = WindowPhase::Ready;
        }
        Ok(outcome)
    }

    pub fn apply_updates(&self, updates: Vec<LiveUpdate>) -> KestrelResult<usize> {
        self.inner.lock().store.apply_updates(updates)
    }

    pub fn render_window(&self) -> RenderWindow {
        let inner = self.inner.lock();
        RenderWindow {
            items: inner
                .store
                .render_items()
                .map(|(key, message)| RenderItem {
                    key,
                    message: message.clone(),
                })
                .collect(),
            first_item_index: inner.window.first_item_index,
            total_count: inner.window.total_count,
        }
    }

    /// Read-only access to the store
    pub fn with_store<R>(&self, f: impl FnOnce(&MessageStore) -> R) -> R {
        f(&self.inner.lock().store)
    }
}

impl std::fmt::Debug for WindowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("WindowController")
            .field("conversation", &inner.conversation)
            .field("phase", &inner.phase)
            .field("window", &inner.window)
            .field("loaded", &inner.store.len())
            .finish()
    }
}
