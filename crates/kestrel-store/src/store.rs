//! Ordered message log
//!
//! Messages live in a deque addressed by a stable logical index:
//! the entry at local position `i` has logical index `start_offset + i`.
//! Prepending older pages lowers `start_offset`, appending raises
//! `end_offset`, and no existing entry is ever renumbered.

use std::collections::{HashMap, HashSet, VecDeque};

use kestrel_core::{KestrelError, KestrelResult, Message, MessageId};
use tracing::{debug, trace};

use crate::reconcile::{find_candidate, ReconcileConfig};
use crate::update::LiveUpdate;

/// Render key for a message at a given version
#[inline]
pub fn render_key(id: &MessageId, version: u64) -> String {
    format!("{}_{}", id, version)
}

/// A message plus its render-identity bookkeeping
#[derive(Clone, Debug, PartialEq)]
pub struct StoredMessage {
    message: Message,
    version: u64,
    /// Server id this optimistic entry was merged with
    confirmed_as: Option<MessageId>,
}

impl StoredMessage {
    fn new(message: Message) -> Self {
        StoredMessage {
            message,
            version: 0,
            confirmed_as: None,
        }
    }

    #[inline]
    pub fn message(&self) -> &Message {
        &self.message
    }

    #[inline]
    pub fn id(&self) -> &MessageId {
        &self.message.id
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn confirmed_id(&self) -> Option<&MessageId> {
        self.confirmed_as.as_ref()
    }

    /// `"{id}_{version}"`
    pub fn render_key(&self) -> String {
        render_key(&self.message.id, self.version)
    }
}

/// Result of one `append` call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Genuinely new entries
    pub added: usize,
    /// Confirmations merged into optimistic entries
    pub merged: usize,
    /// Already-present ids that were filtered out
    pub duplicates: usize,
}

/// Ordered, index-addressed message log for one conversation
#[derive(Debug, Default)]
pub struct MessageStore {
    entries: VecDeque<StoredMessage>,
    start_offset: i64,
    /// Current id -> logical index
    id_index: HashMap<MessageId, i64>,
    /// Confirmed server id -> logical index of the optimistic entry it merged into
    aliases: HashMap<MessageId, i64>,
    config: ReconcileConfig,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ReconcileConfig) -> Self {
        MessageStore {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Clear everything. Used on conversation switch.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.start_offset = 0;
        self.id_index.clear();
        self.aliases.clear();
    }

    /// Reset, then append
    pub fn initial(&mut self, messages: Vec<Message>) -> KestrelResult<AppendOutcome> {
        validate_ids(&messages)?;
        self.reset();
        self.append(messages)
    }

    /// Insert an oldest-to-newest batch before the earliest entry.
    /// Ids already present are skipped. Returns the number inserted.
    pub fn prepend(&mut self, messages: Vec<Message>) -> KestrelResult<usize> {
        validate_ids(&messages)?;

        let mut seen = HashSet::new();
        let fresh: Vec<Message> = messages
            .into_iter()
            .filter(|m| !self.contains(&m.id) && seen.insert(m.id.clone()))
            .collect();

        let count = fresh.len();
        self.start_offset -= count as i64;
        for (i, message) in fresh.iter().enumerate() {
            self.id_index
                .insert(message.id.clone(), self.start_offset + i as i64);
        }
        for message in fresh.into_iter().rev() {
            self.entries.push_front(StoredMessage::new(message));
        }
        Ok(count)
    }

    /// Append newer messages.
    ///
    /// Ids already present (directly or as a confirmed alias) are filtered.
    /// A confirmed message that matches an open optimistic entry is merged
    /// into it without changing the entry's id or version.
    pub fn append(&mut self, mut messages: Vec<Message>) -> KestrelResult<AppendOutcome> {
        validate_ids(&messages)?;
        let mut outcome = AppendOutcome::default();
        if messages.is_empty() {
            return Ok(outcome);
        }

        messages.sort_by_key(|m| m.timestamp);

        let mut seen = HashSet::new();
        let mut to_add = Vec::new();
        for message in messages {
            if self.contains(&message.id) || !seen.insert(message.id.clone()) {
                outcome.duplicates += 1;
                continue;
            }

            let candidate = find_candidate(
                &self.config,
                self.entries
                    .iter()
                    .map(|e| (e.confirmed_as.is_none(), &e.message)),
                &message,
            );

            match candidate {
                Some(pos) => {
                    self.merge_confirmation(pos, message);
                    outcome.merged += 1;
                }
                None => to_add.push(message),
            }
        }

        let end = self.end_offset();
        for (i, message) in to_add.into_iter().enumerate() {
            self.id_index.insert(message.id.clone(), end + i as i64);
            self.entries.push_back(StoredMessage::new(message));
            outcome.added += 1;
        }

        trace!(
            added = outcome.added,
            merged = outcome.merged,
            duplicates = outcome.duplicates,
            "append"
        );
        Ok(outcome)
    }

    /// Insert a locally created message under its temporary id
    pub fn add_optimistic(&mut self, message: Message) -> KestrelResult<AppendOutcome> {
        if !self.config.is_temporary(&message.id) {
            return Err(KestrelError::InvalidMessageId(message.id));
        }
        self.append(vec![message])
    }

    fn merge_confirmation(&mut self, pos: usize, confirmed: Message) {
        let logical = self.start_offset + pos as i64;
        let confirmed_id = confirmed.id.clone();
        if let Some(entry) = self.entries.get_mut(pos) {
            debug!(
                temp_id = %entry.message.id,
                confirmed_id = %confirmed_id,
                "merged confirmed message into optimistic entry"
            );
            entry.message.apply(confirmed.into_confirmation_patch());
            entry.confirmed_as = Some(confirmed_id.clone());
            self.aliases.insert(confirmed_id, logical);
        }
    }

    /// Apply mutations in order. A missing id is a no-op. The first failing
    /// update stops the batch; earlier updates stay applied.
    /// Returns the number of entries changed.
    pub fn apply_updates(&mut self, updates: Vec<LiveUpdate>) -> KestrelResult<usize> {
        let mut applied = 0;
        for update in updates {
            if self.apply_update(update)? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Apply one mutation and bump the entry's version.
    /// Returns false if the id is not loaded.
    pub fn apply_update(&mut self, update: LiveUpdate) -> KestrelResult<bool> {
        if update.id.is_empty() {
            return Err(KestrelError::InvalidMessageId(update.id));
        }
        let Some(logical) = self.resolve(&update.id) else {
            trace!(id = %update.id, "update for message outside the loaded window");
            return Ok(false);
        };
        let Some(pos) = self.local_index(logical) else {
            return Ok(false);
        };

        let patch = update.descriptor.into_patch(&self.entries[pos].message);

        if let Some(new_id) = &patch.id {
            if new_id.is_empty() {
                return Err(KestrelError::InvalidMessageId(new_id.clone()));
            }
            if matches!(self.resolve(new_id), Some(other) if other != logical) {
                return Err(KestrelError::IdCollision { id: new_id.clone() });
            }
        }

        let entry = &mut self.entries[pos];
        let old_id = entry.message.id.clone();
        entry.message.apply(patch);
        entry.version += 1;

        if entry.message.id != old_id {
            let new_id = entry.message.id.clone();
            self.id_index.remove(&old_id);
            self.aliases.remove(&new_id);
            self.id_index.insert(new_id, logical);
        }
        Ok(true)
    }

    /// Logical index for an id or confirmed alias
    pub fn resolve(&self, id: &MessageId) -> Option<i64> {
        self.id_index
            .get(id)
            .or_else(|| self.aliases.get(id))
            .copied()
    }

    #[inline]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.resolve(id).is_some()
    }

    fn local_index(&self, logical: i64) -> Option<usize> {
        let local = usize::try_from(logical - self.start_offset).ok()?;
        (local < self.entries.len()).then_some(local)
    }

    /// O(1) lookup by logical index
    pub fn get_by_logical_index(&self, index: i64) -> Option<&StoredMessage> {
        self.local_index(index).and_then(|i| self.entries.get(i))
    }

    pub fn get(&self, id: &MessageId) -> Option<&StoredMessage> {
        self.resolve(id)
            .and_then(|logical| self.get_by_logical_index(logical))
    }

    pub fn version_of(&self, id: &MessageId) -> Option<u64> {
        self.get(id).map(StoredMessage::version)
    }

    pub fn compute_render_key(&self, stored: &StoredMessage) -> String {
        stored.render_key()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn start_offset(&self) -> i64 {
        self.start_offset
    }

    #[inline]
    pub fn end_offset(&self) -> i64 {
        self.start_offset + self.entries.len() as i64
    }

    /// Cursor for fetching the next older page
    pub fn oldest_id(&self) -> Option<&MessageId> {
        self.entries.front().map(StoredMessage::id)
    }

    pub fn newest_id(&self) -> Option<&MessageId> {
        self.entries.back().map(StoredMessage::id)
    }

    /// Ids of the newest `n` entries, oldest first
    pub fn recent_ids(&self, n: usize) -> Vec<MessageId> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).map(|e| e.id().clone()).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &StoredMessage> + '_ {
        self.entries.iter()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> + '_ {
        self.entries.iter().map(StoredMessage::message)
    }

    /// `(render_key, message)` pairs oldest to newest
    pub fn render_items(&self) -> impl Iterator<Item = (String, &Message)> + '_ {
        self.entries.iter().map(|e| (e.render_key(), &e.message))
    }
}

fn validate_ids(messages: &[Message]) -> KestrelResult<()> {
    match messages.iter().find(|m| m.id.is_empty()) {
        Some(bad) => Err(KestrelError::InvalidMessageId(bad.id.clone())),
        None => Ok(()),
    }
}
