//! Chaos event feed
//!
//! Simulates a misbehaving live transport:
//! - Duplicate delivery (transport retries)
//! - Reordering within a small window

use kestrel_core::{RawEvent, SubEventKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Chaos configuration
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Probability that an event is delivered twice in a row
    pub duplicate_prob: f64,
    /// Probability that an event is swapped with a later one
    pub reorder_prob: f64,
    /// Maximum distance of a swap
    pub reorder_depth: usize,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            duplicate_prob: 0.05,
            reorder_prob: 0.05,
            reorder_depth: 3,
        }
    }
}

impl ChaosConfig {
    /// Delivers everything once, in order
    pub fn calm() -> Self {
        ChaosConfig {
            duplicate_prob: 0.0,
            reorder_prob: 0.0,
            reorder_depth: 0,
        }
    }

    /// Retry storms only
    pub fn duplicating(prob: f64) -> Self {
        ChaosConfig {
            duplicate_prob: prob,
            ..Self::calm()
        }
    }

    pub fn hostile() -> Self {
        ChaosConfig {
            duplicate_prob: 0.3,
            reorder_prob: 0.3,
            reorder_depth: 5,
        }
    }
}

/// What the feed did to the last stream
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChaosStats {
    pub input: usize,
    pub duplicated: usize,
    pub reordered: usize,
}

/// Seeded event scrambler. Same seed, same output.
#[derive(Debug)]
pub struct ChaosFeed {
    config: ChaosConfig,
    rng: StdRng,
    stats: ChaosStats,
}

impl ChaosFeed {
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        ChaosFeed {
            config,
            rng: StdRng::seed_from_u64(seed),
            stats: ChaosStats::default(),
        }
    }

    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }

    /// Apply reordering, then duplication, to a stream
    pub fn scramble(&mut self, events: Vec<RawEvent>) -> Vec<RawEvent> {
        self.stats.input += events.len();
        let mut events = events;

        if self.config.reorder_depth > 0 {
            for i in 0..events.len() {
                if !self.rng.gen_bool(self.config.reorder_prob) {
                    continue;
                }
                let max = (i + self.config.reorder_depth).min(events.len() - 1);
                if max > i {
                    let j = self.rng.gen_range(i + 1..=max);
                    events.swap(i, j);
                    self.stats.reordered += 1;
                }
            }
        }

        let mut out = Vec::with_capacity(events.len());
        for event in events {
            if self.rng.gen_bool(self.config.duplicate_prob) {
                out.push(event.clone());
                self.stats.duplicated += 1;
            }
            out.push(event);
        }
        out
    }
}

/// `count` full-refresh events on `channel`, each carrying one sub-event
/// from `kinds` in rotation and a distinct payload timestamp
pub fn event_stream(channel: &str, kinds: &[SubEventKind], count: usize) -> Vec<RawEvent> {
    if kinds.is_empty() {
        return Vec::new();
    }
    (0..count)
        .map(|i| {
            let kind = kinds[i % kinds.len()].clone();
            RawEvent::state_mutation(channel, &[kind]).with_data_timestamp(1_000 + i as i64)
        })
        .collect()
}
