//! KESTREL sync runtime
//!
//! Wires the sans-IO state machines to tokio. Two background tasks run per
//! runtime:
//!
//! - the intake loop receives raw events from the transport callback, feeds
//!   them through the [`IntakePipeline`] and executes the resulting refresh
//!   plans, debouncing roster refreshes;
//! - the health loop wakes at the [`HealthMonitor`]'s deadlines, runs the
//!   staleness check and performs reconnects.
//!
//! All state lives behind one `parking_lot` mutex that is never held across
//! an await.

use std::sync::Arc;
use std::time::Duration;

use kestrel_core::{ChannelId, KestrelError, KestrelResult, RawEvent, Timestamp};
use kestrel_health::{HealthMonitor, HealthStatus};
use kestrel_intake::{
    is_relevant, priority, Dispatch, EventHub, EventTransport, IntakePipeline, IntakeStats,
    RefreshAction, SubscriptionDiff, SubscriptionSet,
};
use kestrel_time::{Clock, Debouncer};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::{RefreshHandler, SyncConfig};

struct Core {
    subscriptions: SubscriptionSet,
    pipeline: IntakePipeline,
    health: HealthMonitor,
    channels_debounce: Debouncer,
    dms_debounce: Debouncer,
    shut_down: bool,
}

impl Core {
    fn debouncer(&mut self, action: RefreshAction) -> Option<&mut Debouncer> {
        match action {
            RefreshAction::Channels => Some(&mut self.channels_debounce),
            RefreshAction::Dms => Some(&mut self.dms_debounce),
            _ => None,
        }
    }

    fn intake_deadline(&self) -> Option<Timestamp> {
        [
            self.pipeline.next_deadline(),
            self.channels_debounce.deadline(),
            self.dms_debounce.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn cancel_timers(&mut self) {
        let dropped = self.pipeline.cancel();
        if dropped > 0 {
            debug!(dropped, "dropping pending events on shutdown");
        }
        self.channels_debounce.cancel();
        self.dms_debounce.cancel();
        self.health.cancel_timers();
    }
}

struct Shared {
    core: Mutex<Core>,
    clock: Arc<dyn Clock>,
    handler: Arc<dyn RefreshHandler>,
}

impl Shared {
    fn is_shut_down(&self) -> bool {
        self.core.lock().shut_down
    }

    /// Health bookkeeping plus pipeline intake for one delivered event
    fn accept(&self, event: RawEvent) -> Option<Dispatch> {
        let mut core = self.core.lock();
        if core.shut_down {
            return None;
        }
        core.health.record_event();

        if !is_relevant(&event) {
            trace!(channel = %event.context_id, kind = event.event_type.as_str(), "ignoring irrelevant event");
            return None;
        }
        trace!(
            channel = %event.context_id,
            priority = priority(&event),
            "event accepted"
        );
        core.pipeline.push(event)
    }

    async fn execute(&self, dispatch: Dispatch) {
        let started = self.clock.now();
        let immediate: Vec<RefreshAction> = {
            let mut core = self.core.lock();
            if core.shut_down {
                return;
            }
            let mut immediate = Vec::new();
            for action in dispatch.plan.iter() {
                match core.debouncer(action) {
                    Some(debouncer) => debouncer.trigger(started),
                    None => immediate.push(action),
                }
            }
            immediate
        };

        debug!(
            received = dispatch.received,
            coalesced = dispatch.coalesced(),
            actions = dispatch.plan.len(),
            "dispatching batch"
        );
        for action in immediate {
            self.run_action(action).await;
        }

        let elapsed = self.clock.now() - started;
        self.core
            .lock()
            .pipeline
            .complete_batch(elapsed, dispatch.received);
    }

    async fn run_action(&self, action: RefreshAction) {
        if self.is_shut_down() {
            return;
        }
        if let Err(e) = self.handler.refresh(action).await {
            warn!(action = ?action, error = %e, "refresh failed");
        }
    }

    async fn on_intake_timer(&self) {
        let now = self.clock.now();
        let (dispatch, due) = {
            let mut core = self.core.lock();
            if core.shut_down {
                return;
            }
            let dispatch = core.pipeline.poll();
            let mut due = Vec::new();
            if core.channels_debounce.poll(now) {
                due.push(RefreshAction::Channels);
            }
            if core.dms_debounce.poll(now) {
                due.push(RefreshAction::Dms);
            }
            (dispatch, due)
        };

        if let Some(dispatch) = dispatch {
            self.execute(dispatch).await;
        }
        for action in due {
            self.run_action(action).await;
        }
    }

    /// Returns true when a reconnect was performed
    fn on_health_timer(&self) -> bool {
        let mut core = self.core.lock();
        if core.shut_down {
            return false;
        }
        core.health.poll_check();
        let Some(attempt) = core.health.poll_reconnect() else {
            return false;
        };
        info!(attempt, channels = core.subscriptions.count(), "reconnecting");
        match core.subscriptions.resubscribe_all() {
            Ok(count) => debug!(count, "resubscribed"),
            Err(e) => warn!(error = %e, "resubscribe failed"),
        }
        true
    }

    /// Time until the next deadline, `None` when nothing is armed
    fn wait_for(&self, deadline: Option<Timestamp>) -> Option<Duration> {
        deadline.map(|at| at - self.clock.now())
    }
}

/// Background event intake, health monitoring and subscription management
/// for one client session
pub struct SyncRuntime {
    shared: Arc<Shared>,
    hub: Arc<EventHub>,
    config: SyncConfig,
    stop: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncRuntime {
    /// Start the background tasks. Must be called within a tokio runtime.
    pub fn spawn(
        config: SyncConfig,
        transport: Arc<dyn EventTransport>,
        handler: Arc<dyn RefreshHandler>,
        clock: Arc<dyn Clock>,
    ) -> KestrelResult<Self> {
        config.validate()?;

        let subscriptions = SubscriptionSet::new(transport);
        let hub = Arc::new(EventHub::new());
        let (events_tx, events_rx) = mpsc::channel::<RawEvent>(config.event_buffer);

        hub.add_listener(Arc::new(move |event: &RawEvent| -> KestrelResult<()> {
            events_tx.try_send(event.clone()).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    KestrelError::Transport("intake queue full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => KestrelError::Shutdown,
            })
        }));
        let publish_hub = hub.clone();
        subscriptions.set_callback(Arc::new(move |event: RawEvent| {
            publish_hub.publish(&event);
        }));

        let core = Core {
            subscriptions,
            pipeline: IntakePipeline::new(config.batch.clone(), clock.clone()),
            health: HealthMonitor::new(config.health.clone(), clock.clone()),
            channels_debounce: Debouncer::new(config.roster_debounce),
            dms_debounce: Debouncer::new(config.roster_debounce),
            shut_down: false,
        };
        let shared = Arc::new(Shared {
            core: Mutex::new(core),
            clock,
            handler,
        });

        let (stop, stop_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(intake_loop(shared.clone(), events_rx, stop_rx.clone())),
            tokio::spawn(health_loop(shared.clone(), stop_rx)),
        ];

        info!("sync runtime started");
        Ok(SyncRuntime {
            shared,
            hub,
            config,
            stop,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Listener fan-out for raw events, e.g. for a live message feed
    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    /// Subscribe to exactly `desired`, touching only the delta
    pub fn set_channels(&self, desired: &[ChannelId]) -> KestrelResult<SubscriptionDiff> {
        self.shared.core.lock().subscriptions.reconcile(desired)
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.core.lock().subscriptions.count()
    }

    pub fn subscribed_channels(&self) -> Vec<ChannelId> {
        self.shared.core.lock().subscriptions.channels()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.core.lock().health.is_connected()
    }

    pub fn health(&self) -> HealthStatus {
        self.shared.core.lock().health.status()
    }

    pub fn intake_stats(&self) -> IntakeStats {
        self.shared.core.lock().pipeline.stats()
    }

    pub fn reset_intake_stats(&self) {
        self.shared.core.lock().pipeline.reset_stats();
    }

    /// User-initiated reconnect: clears a `Failed` monitor and resubscribes
    /// every channel immediately
    pub fn reconnect_now(&self) -> KestrelResult<usize> {
        let mut core = self.shared.core.lock();
        if core.shut_down {
            return Err(KestrelError::Shutdown);
        }
        core.health.reset();
        let count = core.subscriptions.resubscribe_all()?;
        info!(count, "manual reconnect");
        Ok(count)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.is_shut_down()
    }

    /// Cancel every timer, unsubscribe all channels and stop the background
    /// tasks. Idempotent.
    pub async fn shutdown(&self) {
        self.teardown();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "background task ended abnormally");
                }
            }
        }
    }

    fn teardown(&self) {
        {
            let mut core = self.shared.core.lock();
            if core.shut_down {
                return;
            }
            core.shut_down = true;
            core.cancel_timers();
            core.subscriptions.shutdown();
        }
        let _ = self.stop.send(true);
        info!("sync runtime shut down");
    }
}

impl Drop for SyncRuntime {
    fn drop(&mut self) {
        self.teardown();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for SyncRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRuntime")
            .field("subscriptions", &self.subscription_count())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

async fn sleep_or_park(wait: Option<Duration>) {
    match wait {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}

async fn intake_loop(
    shared: Arc<Shared>,
    mut events: mpsc::Receiver<RawEvent>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let wait = {
            let core = shared.core.lock();
            if core.shut_down {
                break;
            }
            shared.wait_for(core.intake_deadline())
        };

        tokio::select! {
            _ = stop.changed() => break,
            received = events.recv() => match received {
                Some(event) => {
                    if let Some(dispatch) = shared.accept(event) {
                        shared.execute(dispatch).await;
                    }
                }
                None => break,
            },
            _ = sleep_or_park(wait) => shared.on_intake_timer().await,
        }
    }
    debug!("intake loop stopped");
}

async fn health_loop(shared: Arc<Shared>, mut stop: watch::Receiver<bool>) {
    loop {
        let wait = {
            let core = shared.core.lock();
            if core.shut_down {
                break;
            }
            shared.wait_for(core.health.next_deadline())
        };

        tokio::select! {
            _ = stop.changed() => break,
            _ = sleep_or_park(wait) => {
                if shared.on_health_timer() {
                    // catch up on whatever was missed while disconnected
                    shared.run_action(RefreshAction::Messages).await;
                }
            }
        }
    }
    debug!("health loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TokioClock;
    use async_trait::async_trait;
    use kestrel_core::{EventType, SubEventKind};
    use kestrel_health::HealthState;
    use kestrel_intake::EventSink;
    use std::collections::HashMap;

    #[derive(Default)]
    struct LoopbackTransport {
        sinks: Mutex<HashMap<ChannelId, EventSink>>,
        subscribe_calls: Mutex<Vec<ChannelId>>,
        unsubscribe_calls: Mutex<Vec<ChannelId>>,
    }

    impl LoopbackTransport {
        fn emit(&self, event: RawEvent) {
            let sink = self.sinks.lock().get(&event.context_id).cloned();
            if let Some(sink) = sink {
                sink.deliver(event);
            }
        }
    }

    impl EventTransport for LoopbackTransport {
        fn subscribe(&self, channels: &[ChannelId], sink: EventSink) -> KestrelResult<()> {
            for id in channels {
                self.subscribe_calls.lock().push(id.clone());
                self.sinks.lock().insert(id.clone(), sink.clone());
            }
            Ok(())
        }

        fn unsubscribe(&self, channels: &[ChannelId]) -> KestrelResult<()> {
            for id in channels {
                self.unsubscribe_calls.lock().push(id.clone());
                self.sinks.lock().remove(id);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        actions: Mutex<Vec<(RefreshAction, Timestamp)>>,
        clock: Mutex<Option<Arc<dyn Clock>>>,
    }

    impl RecordingHandler {
        fn actions(&self) -> Vec<RefreshAction> {
            self.actions.lock().iter().map(|(a, _)| *a).collect()
        }
    }

    #[async_trait]
    impl RefreshHandler for RecordingHandler {
        async fn refresh(&self, action: RefreshAction) -> KestrelResult<()> {
            let now = self
                .clock
                .lock()
                .as_ref()
                .map(|c| c.now())
                .unwrap_or_default();
            self.actions.lock().push((action, now));
            Ok(())
        }
    }

    fn start(
        config: SyncConfig,
    ) -> (SyncRuntime, Arc<LoopbackTransport>, Arc<RecordingHandler>, Arc<dyn Clock>) {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(Timestamp(1_000_000)));
        let transport = Arc::new(LoopbackTransport::default());
        let handler = Arc::new(RecordingHandler::default());
        *handler.clock.lock() = Some(clock.clone());
        let runtime =
            SyncRuntime::spawn(config, transport.clone(), handler.clone(), clock.clone()).unwrap();
        (runtime, transport, handler, clock)
    }

    fn chan(id: &str) -> ChannelId {
        ChannelId::new(id)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_burst_dispatches_one_refresh() {
        let (runtime, transport, handler, _) = start(SyncConfig::default());
        runtime.set_channels(&[chan("general")]).unwrap();

        for i in 0..5 {
            transport.emit(
                RawEvent::state_mutation("general", &[SubEventKind::MessageSent])
                    .with_data_timestamp(100 + i),
            );
        }
        settle().await;
        assert!(handler.actions().is_empty(), "batch should wait for the deadline");

        tokio::time::sleep(Duration::from_millis(150)).await;
        settle().await;
        assert_eq!(handler.actions(), vec![RefreshAction::Messages]);

        let stats = runtime.intake_stats();
        assert_eq!(stats.processed, 5);
        assert_eq!(stats.coalesced, 4);
        assert_eq!(stats.batches, 1);
        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_roster_refresh_is_debounced() {
        let (runtime, transport, handler, clock) = start(SyncConfig::default());
        runtime.set_channels(&[chan("general")]).unwrap();
        let started = clock.now();

        for i in 0..3 {
            transport.emit(
                RawEvent::state_mutation("general", &[SubEventKind::ChannelCreated])
                    .with_data_timestamp(i),
            );
            tokio::time::sleep(Duration::from_millis(400)).await;
        }
        assert!(handler.actions().is_empty());

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        settle().await;
        let actions = handler.actions.lock().clone();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].0, RefreshAction::Channels);
        // last trigger at ~900ms (batch flush) plus 1s quiet period
        assert!(actions[0].1 >= started + Duration::from_millis(1_900));
        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_delivery_is_skipped() {
        let (runtime, transport, _, _) = start(SyncConfig::default());
        runtime.set_channels(&[chan("general")]).unwrap();

        let event = RawEvent::state_mutation("general", &[SubEventKind::MessageReceived])
            .with_data_timestamp(42);
        transport.emit(event.clone());
        transport.emit(event);
        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;

        let stats = runtime.intake_stats();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.processed, 1);
        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_triggers_reconnect_and_resubscribe() {
        let (runtime, transport, handler, _) = start(SyncConfig::default());
        runtime.set_channels(&[chan("a"), chan("b")]).unwrap();
        transport.subscribe_calls.lock().clear();

        // 90s: first miss; 120s: second miss schedules reconnect at +1s
        tokio::time::sleep(Duration::from_secs(122)).await;
        settle().await;

        assert_eq!(runtime.health().state, HealthState::Reconnecting);
        assert_eq!(runtime.health().reconnect_attempts, 1);
        assert_eq!(*transport.subscribe_calls.lock(), vec![chan("a"), chan("b")]);
        assert!(handler.actions().contains(&RefreshAction::Messages));
        assert!(!runtime.is_connected());

        transport.emit(RawEvent::new("a", EventType::ExecutionEvent));
        settle().await;
        assert_eq!(runtime.health().state, HealthState::Healthy);
        assert!(runtime.is_connected());
        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_now_clears_failed() {
        let mut config = SyncConfig::default();
        config.health.max_reconnect_attempts = 1;
        let (runtime, _, _, _) = start(config);
        runtime.set_channels(&[chan("a")]).unwrap();

        tokio::time::sleep(Duration::from_secs(200)).await;
        settle().await;
        assert_eq!(runtime.health().state, HealthState::Failed);

        assert_eq!(runtime.reconnect_now().unwrap(), 1);
        assert_eq!(runtime.health().state, HealthState::Healthy);
        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_work() {
        let (runtime, transport, handler, _) = start(SyncConfig::default());
        runtime.set_channels(&[chan("a"), chan("b")]).unwrap();

        transport.emit(RawEvent::state_mutation("a", &[SubEventKind::MessageSent]).with_data_timestamp(1));
        settle().await;
        runtime.shutdown().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        assert!(handler.actions().is_empty());
        assert_eq!(runtime.subscription_count(), 0);
        assert_eq!(transport.unsubscribe_calls.lock().len(), 2);
        assert_eq!(runtime.set_channels(&[chan("c")]), Err(KestrelError::Shutdown));
        assert_eq!(runtime.reconnect_now(), Err(KestrelError::Shutdown));

        // second shutdown is a no-op
        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbatched_events_dispatch_immediately() {
        let mut config = SyncConfig::default();
        config.batch.enable_batching = false;
        let (runtime, transport, handler, _) = start(config);
        runtime.set_channels(&[chan("a")]).unwrap();

        transport.emit(
            RawEvent::state_mutation("a", &[SubEventKind::ChannelJoined]).with_data_timestamp(7),
        );
        settle().await;
        assert_eq!(handler.actions(), vec![RefreshAction::Members]);
        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_extra_listener_sees_raw_events() {
        let (runtime, transport, _, _) = start(SyncConfig::default());
        runtime.set_channels(&[chan("a")]).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        runtime.hub().add_listener(Arc::new(move |e: &RawEvent| -> KestrelResult<()> {
            s.lock().push(e.context_id.clone());
            Ok(())
        }));

        transport.emit(RawEvent::new("a", EventType::ExecutionEvent));
        assert_eq!(*seen.lock(), vec![chan("a")]);
        runtime.shutdown().await;
    }
}
