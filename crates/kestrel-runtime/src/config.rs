//! Runtime configuration
//!
//! Loaded from JSON. Every field is optional; durations are human-readable
//! strings such as `"100ms"` or `"30s"`.
//!
//! ```json
//! {
//!   "batch": { "max_wait": "100ms", "max_batch_size": 10 },
//!   "health": { "heartbeat_timeout": "60s" },
//!   "roster_debounce": "1s"
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use kestrel_core::{KestrelError, KestrelResult};
use kestrel_health::HealthConfig;
use kestrel_intake::BatchConfig;
use kestrel_store::ReconcileConfig;
use kestrel_time::Clock;
use kestrel_window::{PageSource, WindowConfig};
use serde::{Deserialize, Deserializer};

use crate::ConversationView;

/// Aggregated configuration for one sync runtime
#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub reconcile: ReconcileConfig,
    pub window: WindowConfig,
    pub batch: BatchConfig,
    pub health: HealthConfig,
    /// Quiet period before a channel or DM roster refresh runs
    pub roster_debounce: Duration,
    /// Capacity of the queue between the transport callback and the intake loop
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            reconcile: ReconcileConfig::default(),
            window: WindowConfig::default(),
            batch: BatchConfig::default(),
            health: HealthConfig::default(),
            roster_debounce: Duration::from_millis(1_000),
            event_buffer: 1_024,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> KestrelResult<Self> {
        let file: ConfigFile = serde_json::from_str(json)
            .map_err(|e| KestrelError::InvalidConfig(e.to_string()))?;
        let config = file.into_config();
        config.validate()?;
        Ok(config)
    }

    /// A view for one open conversation, paged and reconciled with this
    /// configuration
    pub fn conversation_view(
        &self,
        source: Arc<dyn PageSource>,
        clock: Arc<dyn Clock>,
    ) -> ConversationView {
        ConversationView::with_reconcile(
            source,
            clock,
            self.window.clone(),
            self.reconcile.clone(),
        )
    }

    pub fn validate(&self) -> KestrelResult<()> {
        if self.batch.max_batch_size == 0 {
            return Err(invalid("batch.max_batch_size must be non-zero"));
        }
        if self.health.heartbeat_timeout.is_zero() {
            return Err(invalid("health.heartbeat_timeout must be non-zero"));
        }
        if self.health.max_reconnect_delay < self.health.initial_reconnect_delay {
            return Err(invalid(
                "health.max_reconnect_delay must not be below initial_reconnect_delay",
            ));
        }
        if self.window.page_size == 0 {
            return Err(invalid("window.page_size must be non-zero"));
        }
        if self.event_buffer == 0 {
            return Err(invalid("event_buffer must be non-zero"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> KestrelError {
    KestrelError::InvalidConfig(msg.to_string())
}

fn human_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    reconcile: ReconcileSection,
    window: WindowSection,
    batch: BatchSection,
    health: HealthSection,
    #[serde(deserialize_with = "human_duration")]
    roster_debounce: Option<Duration>,
    event_buffer: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ReconcileSection {
    temp_prefix: Option<String>,
    #[serde(deserialize_with = "human_duration")]
    match_tolerance: Option<Duration>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct WindowSection {
    page_size: Option<usize>,
    #[serde(deserialize_with = "human_duration")]
    older_cooldown: Option<Duration>,
    recent_check_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BatchSection {
    #[serde(deserialize_with = "human_duration")]
    max_wait: Option<Duration>,
    max_batch_size: Option<usize>,
    enable_batching: Option<bool>,
    enable_metrics: Option<bool>,
    #[serde(deserialize_with = "human_duration")]
    slow_batch_threshold: Option<Duration>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct HealthSection {
    #[serde(deserialize_with = "human_duration")]
    heartbeat_timeout: Option<Duration>,
    max_reconnect_attempts: Option<u32>,
    #[serde(deserialize_with = "human_duration")]
    initial_reconnect_delay: Option<Duration>,
    #[serde(deserialize_with = "human_duration")]
    max_reconnect_delay: Option<Duration>,
    missed_heartbeats_before_reconnect: Option<u32>,
}

impl ConfigFile {
    fn into_config(self) -> SyncConfig {
        let mut config = SyncConfig::default();

        let r = self.reconcile;
        if let Some(v) = r.temp_prefix {
            config.reconcile.temp_prefix = v;
        }
        if let Some(v) = r.match_tolerance {
            config.reconcile.match_tolerance = v;
        }

        let w = self.window;
        if let Some(v) = w.page_size {
            config.window.page_size = v;
        }
        if let Some(v) = w.older_cooldown {
            config.window.older_cooldown = v;
        }
        if let Some(v) = w.recent_check_size {
            config.window.recent_check_size = v;
        }

        let b = self.batch;
        if let Some(v) = b.max_wait {
            config.batch.max_wait = v;
        }
        if let Some(v) = b.max_batch_size {
            config.batch.max_batch_size = v;
        }
        if let Some(v) = b.enable_batching {
            config.batch.enable_batching = v;
        }
        if let Some(v) = b.enable_metrics {
            config.batch.enable_metrics = v;
        }
        if let Some(v) = b.slow_batch_threshold {
            config.batch.slow_batch_threshold = v;
        }

        let h = self.health;
        if let Some(v) = h.heartbeat_timeout {
            config.health.heartbeat_timeout = v;
        }
        if let Some(v) = h.max_reconnect_attempts {
            config.health.max_reconnect_attempts = v;
        }
        if let Some(v) = h.initial_reconnect_delay {
            config.health.initial_reconnect_delay = v;
        }
        if let Some(v) = h.max_reconnect_delay {
            config.health.max_reconnect_delay = v;
        }
        if let Some(v) = h.missed_heartbeats_before_reconnect {
            config.health.missed_heartbeats_before_reconnect = v;
        }

        if let Some(v) = self.roster_debounce {
            config.roster_debounce = v;
        }
        if let Some(v) = self.event_buffer {
            config.event_buffer = v;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = SyncConfig::from_json_str("{}").unwrap();
        assert_eq!(config.batch, BatchConfig::default());
        assert_eq!(config.health.heartbeat_timeout, Duration::from_secs(60));
        assert_eq!(config.roster_debounce, Duration::from_secs(1));
        assert_eq!(config.reconcile.temp_prefix, "temp-");
    }

    #[test]
    fn test_human_readable_durations() {
        let config = SyncConfig::from_json_str(
            r#"{
                "batch": { "max_wait": "250ms", "max_batch_size": 4, "enable_batching": false },
                "health": { "heartbeat_timeout": "2m", "max_reconnect_delay": "1m 30s" },
                "window": { "older_cooldown": "0ms", "page_size": 50 },
                "roster_debounce": "1500ms"
            }"#,
        )
        .unwrap();

        assert_eq!(config.batch.max_wait, Duration::from_millis(250));
        assert_eq!(config.batch.max_batch_size, 4);
        assert!(!config.batch.enable_batching);
        assert_eq!(config.health.heartbeat_timeout, Duration::from_secs(120));
        assert_eq!(config.health.max_reconnect_delay, Duration::from_secs(90));
        assert_eq!(config.window.older_cooldown, Duration::ZERO);
        assert_eq!(config.window.page_size, 50);
        assert_eq!(config.roster_debounce, Duration::from_millis(1_500));
    }

    #[test]
    fn test_rejects_bad_duration_and_unknown_field() {
        assert!(matches!(
            SyncConfig::from_json_str(r#"{ "roster_debounce": "soon" }"#),
            Err(KestrelError::InvalidConfig(_))
        ));
        assert!(matches!(
            SyncConfig::from_json_str(r#"{ "batch": { "max_size": 3 } }"#),
            Err(KestrelError::InvalidConfig(_))
        ));
    }

    struct NoHistory;

    #[async_trait::async_trait]
    impl PageSource for NoHistory {
        async fn fetch_initial(
            &self,
            _: &kestrel_core::ChannelId,
            _: usize,
        ) -> KestrelResult<kestrel_window::InitialPage> {
            Ok(kestrel_window::InitialPage::default())
        }

        async fn fetch_older(
            &self,
            _: &kestrel_core::ChannelId,
            _: &kestrel_core::MessageId,
            _: usize,
        ) -> KestrelResult<kestrel_window::OlderPage> {
            Ok(kestrel_window::OlderPage::default())
        }
    }

    #[test]
    fn test_loaded_config_reaches_the_view() {
        let config = SyncConfig::from_json_str(
            r#"{
                "window": { "page_size": 50, "older_cooldown": "1s" },
                "reconcile": { "temp_prefix": "local:", "match_tolerance": "2s" }
            }"#,
        )
        .unwrap();
        let clock = Arc::new(kestrel_time::ManualClock::new(kestrel_core::Timestamp(0)));
        let view = config.conversation_view(Arc::new(NoHistory), clock);

        assert_eq!(view.config().page_size, 50);
        assert_eq!(view.config().older_cooldown, Duration::from_secs(1));
        let reconcile = view.with_store(|s| s.config().clone());
        assert_eq!(reconcile.temp_prefix, "local:");
        assert_eq!(reconcile.match_tolerance, Duration::from_secs(2));

        let optimistic = kestrel_core::Message::new(
            "local:1",
            kestrel_core::Timestamp(0),
            "me",
            "hi",
        );
        assert_eq!(view.add_optimistic(optimistic).unwrap().added, 1);
    }

    #[test]
    fn test_validation() {
        let zero_batch = SyncConfig::from_json_str(r#"{ "batch": { "max_batch_size": 0 } }"#);
        assert!(matches!(zero_batch, Err(KestrelError::InvalidConfig(_))));

        let inverted = SyncConfig::from_json_str(
            r#"{ "health": { "initial_reconnect_delay": "10s", "max_reconnect_delay": "5s" } }"#,
        );
        assert!(matches!(inverted, Err(KestrelError::InvalidConfig(_))));

        let zero_timeout = SyncConfig::from_json_str(r#"{ "health": { "heartbeat_timeout": "0s" } }"#);
        assert!(matches!(zero_timeout, Err(KestrelError::InvalidConfig(_))));
    }
}
