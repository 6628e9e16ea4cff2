//! End-to-end scenarios
//!
//! Wires a [`ConversationView`] and a [`SyncRuntime`] to the in-memory
//! fakes of this crate:
//! - Paged history walk-through
//! - Optimistic send confirmed by a live signal
//! - Chaotic live feeds
//! - Subscription churn and teardown

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kestrel_core::KestrelResult;
use kestrel_runtime::{ConversationView, RefreshAction, RefreshHandler};
use parking_lot::Mutex;
use tracing::debug;

/// Host stand-in: message refreshes run a catch-up fetch on the view,
/// every action is counted
pub struct ViewRefresher {
    view: ConversationView,
    counts: Mutex<HashMap<RefreshAction, usize>>,
}

impl ViewRefresher {
    pub fn new(view: ConversationView) -> Arc<Self> {
        Arc::new(ViewRefresher {
            view,
            counts: Mutex::new(HashMap::new()),
        })
    }

    pub fn count(&self, action: RefreshAction) -> usize {
        self.counts.lock().get(&action).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.lock().values().sum()
    }
}

#[async_trait]
impl RefreshHandler for ViewRefresher {
    async fn refresh(&self, action: RefreshAction) -> KestrelResult<()> {
        *self.counts.lock().entry(action).or_insert(0) += 1;
        if action == RefreshAction::Messages {
            let outcome = self.view.refresh_recent().await?;
            debug!(?outcome, "catch-up fetch");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event_stream, ChaosConfig, ChaosFeed, FakeHistory, ScriptedTransport, TransportCall};
    use kestrel_core::{ChannelId, Message, MessageId, RawEvent, SubEventKind, Timestamp};
    use kestrel_health::HealthState;
    use kestrel_intake::{BatchConfig, IntakePipeline, RefreshPlan};
    use kestrel_runtime::{SyncConfig, SyncRuntime, TokioClock};
    use kestrel_time::{Clock, ManualClock};
    use kestrel_window::{LoadOutcome, WindowPhase};
    use std::time::Duration;

    fn view_over(history: Arc<FakeHistory>, clock: Arc<dyn Clock>, conv: &str) -> ConversationView {
        let view = SyncConfig::default().conversation_view(history, clock);
        view.switch_conversation(ChannelId::new(conv));
        view
    }

    fn runtime_with(
        handler: Arc<ViewRefresher>,
        clock: Arc<dyn Clock>,
    ) -> (SyncRuntime, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new());
        let runtime =
            SyncRuntime::spawn(SyncConfig::default(), transport.clone(), handler, clock).unwrap();
        (runtime, transport)
    }

    #[tokio::test]
    async fn test_forty_five_message_walkthrough() {
        let clock = ManualClock::new(Timestamp(0));
        let history = Arc::new(FakeHistory::with_messages("c", 45));
        let view = view_over(history.clone(), Arc::new(clock.clone()), "c");

        assert_eq!(view.load_initial().await.unwrap(), LoadOutcome::Loaded { count: 20 });
        let state = view.state();
        assert_eq!(state.first_item_index, 25);
        assert_eq!(state.total_count, 45);
        assert!(state.has_more);

        assert_eq!(view.load_older().await.unwrap(), LoadOutcome::Loaded { count: 20 });
        assert_eq!(view.state().first_item_index, 5);

        // scroll momentum right after completion is ignored
        assert_eq!(view.load_older().await.unwrap(), LoadOutcome::Suppressed);
        clock.advance(Duration::from_millis(200));

        assert_eq!(view.load_older().await.unwrap(), LoadOutcome::Loaded { count: 5 });
        let state = view.state();
        assert_eq!(state.first_item_index, 0);
        assert!(!state.has_more);

        clock.advance(Duration::from_secs(1));
        assert_eq!(view.load_older().await.unwrap(), LoadOutcome::Suppressed);
        assert_eq!(history.stats().older, 2);

        let window = view.render_window();
        assert_eq!(window.items.len(), 45);
        let ids: Vec<String> = window.messages().map(|m| m.id.0.clone()).collect();
        let expected: Vec<String> = (0..45).map(|i| format!("m{i}")).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_failed_older_fetch_is_retryable() {
        let clock = ManualClock::new(Timestamp(0));
        let history = Arc::new(FakeHistory::with_messages("c", 30));
        let view = view_over(history.clone(), Arc::new(clock), "c");
        view.load_initial().await.unwrap();
        let before = view.state();

        history.fail_next(1);
        assert_eq!(view.load_older().await.unwrap(), LoadOutcome::Failed);
        assert_eq!(view.phase(), WindowPhase::Ready);
        assert_eq!(view.state(), before);

        assert_eq!(view.load_older().await.unwrap(), LoadOutcome::Loaded { count: 10 });
        assert_eq!(view.state().first_item_index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_discards_inflight_initial_load() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(Timestamp(0)));
        let history = Arc::new(FakeHistory::with_messages("a", 10));
        history.set_latency(Duration::from_millis(100));
        let view = view_over(history, clock, "a");

        let v = view.clone();
        let pending = tokio::spawn(async move { v.load_initial().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        view.switch_conversation(ChannelId::new("b"));

        assert_eq!(pending.await.unwrap().unwrap(), LoadOutcome::Discarded);
        assert_eq!(view.conversation(), Some(ChannelId::new("b")));
        assert_eq!(view.with_store(|s| s.len()), 0);
        assert_eq!(view.phase(), WindowPhase::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimistic_send_confirmed_by_live_signal() {
        let start = Timestamp(1_700_000_000_000);
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(start));
        let history = Arc::new(FakeHistory::new());
        history.seed("general", 3, start);
        let view = view_over(history.clone(), clock.clone(), "general");
        view.load_initial().await.unwrap();

        let sent_at = start + Duration::from_secs(10);
        let temp = MessageId::new("temp-1");
        view.add_optimistic(Message::new(temp.clone(), sent_at, "alice", "hi"))
            .unwrap();
        let version = view.with_store(|s| s.version_of(&temp));

        history.push(
            "general",
            Message::new("real-42", sent_at + Duration::from_secs(1), "alice", "hi"),
        );

        let refresher = ViewRefresher::new(view.clone());
        let (runtime, transport) = runtime_with(refresher.clone(), clock);
        runtime.set_channels(&[ChannelId::new("general")]).unwrap();
        assert!(transport.emit(
            RawEvent::state_mutation("general", &[SubEventKind::MessageSent])
                .with_data_timestamp(sent_at.as_millis() + 1_000),
        ));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(refresher.count(RefreshAction::Messages), 1);

        view.with_store(|store| {
            assert_eq!(store.len(), 4);
            let entry = store.get(&temp).expect("temp entry kept");
            assert_eq!(entry.id(), &temp);
            assert_eq!(entry.message().timestamp, sent_at + Duration::from_secs(1));
            assert_eq!(entry.confirmed_id(), Some(&MessageId::new("real-42")));
            assert_eq!(Some(entry.version()), version);
        });
        assert_eq!(view.state().total_count, 4);
        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_storm_is_absorbed() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(Timestamp(0)));
        let history = Arc::new(FakeHistory::new());
        let refresher = ViewRefresher::new(view_over(history, clock.clone(), "c"));
        let (runtime, transport) = runtime_with(refresher.clone(), clock);
        runtime.set_channels(&[ChannelId::new("c")]).unwrap();

        let mut feed = ChaosFeed::new(ChaosConfig::duplicating(0.3), 11);
        let events = feed.scramble(event_stream("c", &[SubEventKind::MessageSent], 30));
        transport.emit_all(events);
        tokio::time::sleep(Duration::from_millis(500)).await;

        let stats = runtime.intake_stats();
        assert_eq!(stats.skipped as usize, feed.stats().duplicated);
        assert_eq!(stats.processed, 30);
        assert_eq!(stats.batches, 3);
        assert_eq!(refresher.count(RefreshAction::Messages), 3);
        runtime.shutdown().await;
    }

    /// Batch plans for `events` when they all arrive at one instant
    fn replay_plans(events: &[RawEvent]) -> Vec<RefreshPlan> {
        let clock = ManualClock::new(Timestamp(0));
        let mut pipeline = IntakePipeline::new(BatchConfig::default(), Arc::new(clock));
        let mut plans: Vec<RefreshPlan> = events
            .iter()
            .filter_map(|e| pipeline.push(e.clone()))
            .map(|d| d.plan)
            .collect();
        plans.extend(pipeline.flush().map(|d| d.plan));
        plans
    }

    #[tokio::test(start_paused = true)]
    async fn test_hostile_feed_dispatches_latest_refresh_per_batch() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(Timestamp(0)));
        let history = Arc::new(FakeHistory::new());
        let refresher = ViewRefresher::new(view_over(history, clock.clone(), "c"));
        let (runtime, transport) = runtime_with(refresher.clone(), clock);
        runtime.set_channels(&[ChannelId::new("c")]).unwrap();

        let kinds = [
            SubEventKind::MessageSent,
            SubEventKind::ChannelCreated,
            SubEventKind::DmCreated,
            SubEventKind::ChannelJoined,
        ];
        let mut feed = ChaosFeed::new(ChaosConfig::hostile(), 99);
        let events = feed.scramble(event_stream("c", &kinds, 40));
        let plans = replay_plans(&events);
        let batches_with = |action| plans.iter().filter(|p| p.contains(action)).count();

        transport.emit_all(events);
        tokio::time::sleep(Duration::from_secs(3)).await;

        let stats = runtime.intake_stats();
        assert_eq!(stats.batches as usize, plans.len());
        assert_eq!(stats.processed, 40);
        assert_eq!(stats.coalesced as usize, 40 - plans.len());

        // immediate actions run once per batch whose latest refresh names them
        assert_eq!(refresher.count(RefreshAction::Messages), batches_with(RefreshAction::Messages));
        assert_eq!(refresher.count(RefreshAction::Members), batches_with(RefreshAction::Members));
        // roster refreshes collapse into one per quiet period
        for roster in [RefreshAction::Channels, RefreshAction::Dms] {
            let expected = usize::from(batches_with(roster) > 0);
            assert_eq!(refresher.count(roster), expected);
        }
        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_churn_and_teardown() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(Timestamp(0)));
        let refresher = ViewRefresher::new(view_over(Arc::new(FakeHistory::new()), clock.clone(), "a"));
        let (runtime, transport) = runtime_with(refresher.clone(), clock);
        let ids = |names: &[&str]| names.iter().map(|n| ChannelId::new(*n)).collect::<Vec<_>>();

        runtime.set_channels(&ids(&["A", "B"])).unwrap();
        transport.take_calls();
        runtime.set_channels(&ids(&["B", "C"])).unwrap();

        assert_eq!(
            transport.take_calls(),
            vec![
                TransportCall::Unsubscribe(ChannelId::new("A")),
                TransportCall::Subscribe(ChannelId::new("C")),
            ]
        );
        assert!(transport.calls_for(&ChannelId::new("B")).is_empty());
        assert_eq!(runtime.subscription_count(), 2);
        assert_eq!(runtime.subscribed_channels(), ids(&["B", "C"]));

        runtime.shutdown().await;
        assert!(transport.active_channels().is_empty());
        assert_eq!(refresher.total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_from_failed_on_first_event() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(Timestamp(0)));
        let refresher = ViewRefresher::new(view_over(Arc::new(FakeHistory::new()), clock.clone(), "a"));
        let (runtime, transport) = runtime_with(refresher, clock);
        runtime.set_channels(&[ChannelId::new("a")]).unwrap();

        // misses at 90s and 120s, five attempts, give up at the next check
        tokio::time::sleep(Duration::from_secs(400)).await;
        let status = runtime.health();
        assert_eq!(status.state, HealthState::Failed);
        assert_eq!(status.reconnect_attempts, 5);
        assert!(!runtime.is_connected());

        // the transport kept the subscription; a late event proves liveness
        transport.emit(RawEvent::state_mutation("a", &[SubEventKind::ChatJoined]));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(runtime.health().state, HealthState::Healthy);
        runtime.shutdown().await;
    }
}
