//! Optimistic reconciliation
//!
//! A locally sent message is rendered immediately under a temporary id.
//! When the server-confirmed copy arrives it is merged into the temporary
//! entry in place: the id and the render version stay the same, so the
//! virtualized list keeps its row mounted.
//!
//! Matching is a heuristic. The first unconfirmed temporary entry in log
//! order with equal body and a timestamp within tolerance wins. Two rapid
//! sends of the same text can be paired with the wrong confirmation.

use std::time::Duration;

use kestrel_core::{Message, MessageId, TEMP_ID_PREFIX};

/// Reconciliation tuning
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Prefix that marks a client-generated id
    pub temp_prefix: String,
    /// Maximum producer-clock distance between optimistic and confirmed copy
    pub match_tolerance: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        ReconcileConfig {
            temp_prefix: TEMP_ID_PREFIX.to_string(),
            match_tolerance: Duration::from_millis(5_000),
        }
    }
}

impl ReconcileConfig {
    #[inline]
    pub fn is_temporary(&self, id: &MessageId) -> bool {
        id.has_prefix(&self.temp_prefix)
    }

    /// Inclusive timestamp tolerance plus body equality
    pub fn matches(&self, optimistic: &Message, confirmed: &Message) -> bool {
        let tolerance = u64::try_from(self.match_tolerance.as_millis()).unwrap_or(u64::MAX);
        optimistic.content_matches(confirmed)
            && optimistic.timestamp.abs_diff_millis(confirmed.timestamp) <= tolerance
    }
}

/// Position of the first open candidate for `confirmed`
///
/// `candidates` yields `(is_open, message)` in log order, where `is_open` is
/// false for temporary entries that were already merged.
pub(crate) fn find_candidate<'a, I>(
    config: &ReconcileConfig,
    candidates: I,
    confirmed: &Message,
) -> Option<usize>
where
    I: IntoIterator<Item = (bool, &'a Message)>,
{
    if config.is_temporary(&confirmed.id) {
        return None;
    }
    candidates.into_iter().position(|(open, existing)| {
        open && config.is_temporary(&existing.id) && config.matches(existing, confirmed)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::Timestamp;

    #[test]
    fn test_tolerance_is_inclusive() {
        let config = ReconcileConfig::default();
        let temp = Message::new("temp-1", Timestamp(10_000), "a", "hi");

        let edge = Message::new("r1", Timestamp(15_000), "a", "hi");
        let beyond = Message::new("r2", Timestamp(15_001), "a", "hi");
        assert!(config.matches(&temp, &edge));
        assert!(!config.matches(&temp, &beyond));
    }

    #[test]
    fn test_sender_is_part_of_content() {
        let config = ReconcileConfig::default();
        let temp = Message::new("temp-1", Timestamp(0), "alice", "hi");
        let other = Message::new("r1", Timestamp(0), "bob", "hi");
        assert!(!config.matches(&temp, &other));
    }

    #[test]
    fn test_first_open_candidate_wins() {
        let config = ReconcileConfig::default();
        let merged = Message::new("temp-1", Timestamp(0), "a", "hi");
        let second = Message::new("temp-2", Timestamp(100), "a", "hi");
        let third = Message::new("temp-3", Timestamp(200), "a", "hi");
        let confirmed = Message::new("r9", Timestamp(150), "a", "hi");

        let found = find_candidate(
            &config,
            vec![(false, &merged), (true, &second), (true, &third)],
            &confirmed,
        );
        assert_eq!(found, Some(1));
    }

    #[test]
    fn test_temporary_incoming_never_reconciles() {
        let config = ReconcileConfig::default();
        let temp = Message::new("temp-1", Timestamp(0), "a", "hi");
        let incoming = Message::new("temp-2", Timestamp(0), "a", "hi");
        assert_eq!(find_candidate(&config, vec![(true, &temp)], &incoming), None);
    }
}
