//! Tests for the BeaconEventRouter module

use super::*;
use crate::domain::event::{BeaconEvent, RegionEvent};
use crate::domain::sample::Proximity;
use crate::io::EventBus;
use crate::services::notifier::{
    LocalNotification, NotificationFormatter, NotificationSink, TemplateFormatter,
};
use crate::services::provider::MockRangingProvider;
use parking_lot::Mutex;

const UUID: &str = "e2c56db5-dffb-48d2-b060-d0f5a71096e0";

/// Test harness that keeps the event receiver alive so `try_send` succeeds
struct TestRouter {
    router: BeaconEventRouter,
    events_rx: mpsc::Receiver<BeaconEvent>,
    provider: Arc<MockRangingProvider>,
    notifications: Arc<CollectingSink>,
    t0: Instant,
}

impl std::ops::Deref for TestRouter {
    type Target = BeaconEventRouter;
    fn deref(&self) -> &Self::Target {
        &self.router
    }
}

impl std::ops::DerefMut for TestRouter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.router
    }
}

impl TestRouter {
    /// Instant `secs` seconds after the harness was created
    fn at(&self, secs: u64) -> Instant {
        self.t0 + Duration::from_secs(secs)
    }

    fn at_ms(&self, ms: u64) -> Instant {
        self.t0 + Duration::from_millis(ms)
    }

    /// Everything emitted since the last drain
    fn drain(&mut self) -> Vec<BeaconEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn monitor(&mut self, identifier: &str, interval_secs: u64) {
        self.router
            .start_monitoring(identifier, identity(None, None), Duration::from_secs(interval_secs))
            .unwrap();
    }

    fn signal(&mut self, identifier: &str, state: RegionState, secs: u64) {
        let at = self.at(secs);
        self.router.on_raw_region_signal(identifier, state, at);
    }

    fn posted(&self) -> Vec<LocalNotification> {
        self.notifications.posted.lock().clone()
    }
}

#[derive(Default)]
struct CollectingSink {
    posted: Mutex<Vec<LocalNotification>>,
}

impl NotificationSink for CollectingSink {
    fn post(&self, notification: LocalNotification) {
        self.posted.lock().push(notification);
    }
}

/// Formatter that never produces a message
struct Silent;

impl NotificationFormatter for Silent {
    fn format(&self, _region: &RegionWatch, _event: RegionEvent) -> Option<String> {
        None
    }
}

fn create_test_router() -> TestRouter {
    create_test_router_with(false, Arc::new(TemplateFormatter::default()))
}

fn create_test_router_with(
    notifications: bool,
    formatter: Arc<dyn NotificationFormatter>,
) -> TestRouter {
    let metrics = Arc::new(Metrics::new());
    let mut bus = EventBus::new(metrics.clone());
    let events_rx = bus.subscribe("test", 256);
    let provider = Arc::new(MockRangingProvider::new());
    let sink = Arc::new(CollectingSink::default());
    let notifier = Notifier::new(notifications, formatter, sink.clone(), metrics.clone());
    let router = BeaconEventRouter::new(provider.clone(), bus.into_sender(), metrics)
        .with_notifier(notifier);
    TestRouter { router, events_rx, provider, notifications: sink, t0: Instant::now() }
}

fn identity(major: Option<u16>, minor: Option<u16>) -> BeaconIdentity {
    BeaconIdentity { uuid: crate::domain::identity::parse_uuid(UUID).unwrap(), major, minor }
}

fn beacon(minor: u16) -> BeaconIdentity {
    identity(Some(1), Some(minor))
}

fn sample(minor: u16, proximity: Proximity, accuracy: f64, rssi: i32) -> BeaconSample {
    BeaconSample::new(beacon(minor), rssi, proximity, accuracy, Instant::now())
}

fn entered(id: &str) -> BeaconEvent {
    BeaconEvent::RegionEntered { identifier: id.to_string() }
}

fn exited(id: &str) -> BeaconEvent {
    BeaconEvent::RegionExited { identifier: id.to_string() }
}

// ============================================================================
// Monitoring lifecycle
// ============================================================================

#[test]
fn test_start_monitoring_starts_outside() {
    let mut t = create_test_router();
    t.monitor("lobby", 5);

    let regions = t.regions();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].identifier, "lobby");
    assert_eq!(regions[0].state, RegionState::Outside);
    assert_eq!(regions[0].nearest, None);
    assert_eq!(t.provider.watched().len(), 1);
    assert_eq!(t.metrics.active_regions(), 1);
    assert!(t.drain().is_empty());
}

#[test]
fn test_duplicate_identifier_is_rejected() {
    let mut t = create_test_router();
    t.monitor("lobby", 5);

    let err = t.start_monitoring("lobby", beacon(3), Duration::ZERO).unwrap_err();
    assert_eq!(err, BeaconError::DuplicateIdentifier("lobby".to_string()));
    assert_eq!(t.provider.watched().len(), 1);
}

#[test]
fn test_minor_without_major_is_invalid() {
    let mut t = create_test_router();

    let err = t.start_monitoring("lobby", identity(None, Some(4)), Duration::ZERO).unwrap_err();
    assert!(matches!(err, BeaconError::InvalidIdentity(_)));
    assert!(err.is_caller_error());

    let err = t.start_monitoring_uuid("lobby", UUID, None, Some(4), Duration::ZERO).unwrap_err();
    assert_eq!(err.error_code(), "INVALID_BEACON_REGION");

    assert!(t.regions().is_empty());
    assert!(t.provider.watched().is_empty());
}

#[test]
fn test_malformed_uuid_is_invalid() {
    let mut t = create_test_router();

    let err = t.start_monitoring_uuid("lobby", "not-a-uuid", None, None, Duration::ZERO).unwrap_err();
    assert_eq!(err.error_code(), "INVALID_UUID");
    assert!(t.regions().is_empty());
}

#[test]
fn test_start_monitoring_uuid_accepts_uppercase() {
    let mut t = create_test_router();

    t.start_monitoring_uuid("lobby", &UUID.to_uppercase(), Some(1), None, Duration::ZERO)
        .unwrap();
    assert_eq!(t.regions()[0].identity, format!("{UUID}/1/*"));
}

#[test]
fn test_provider_refusal_is_propagated() {
    let mut t = create_test_router();

    t.provider.refuse_with(Some(ProviderError::AuthorizationDenied));
    let err = t.start_monitoring("lobby", beacon(1), Duration::ZERO).unwrap_err();
    assert_eq!(err, BeaconError::AuthorizationDenied);
    assert!(err.is_authorization_error());

    t.provider.refuse_with(Some(ProviderError::CannotMonitor));
    let err = t.start_monitoring("lobby", beacon(1), Duration::ZERO).unwrap_err();
    assert!(matches!(err, BeaconError::ProviderUnavailable(_)));

    assert!(t.regions().is_empty());
    assert_eq!(t.metrics.active_regions(), 0);

    // Not retried: a later start succeeds only when called again
    t.provider.refuse_with(None);
    assert!(t.start_monitoring("lobby", beacon(1), Duration::ZERO).is_ok());
}

#[test]
fn test_stop_unknown_returns_false() {
    let mut t = create_test_router();
    assert!(!t.stop_monitoring("nowhere"));
}

#[test]
fn test_stop_releases_provider_subscription() {
    let mut t = create_test_router();
    t.monitor("lobby", 5);

    assert!(t.stop_monitoring("lobby"));
    assert!(!t.stop_monitoring("lobby"));
    assert_eq!(t.provider.unwatched().len(), 1);
    assert_eq!(t.provider.unwatched()[0].identifier, "lobby");
    assert!(t.regions().is_empty());
    assert_eq!(t.metrics.active_regions(), 0);
}

#[test]
fn test_restart_after_stop_starts_fresh() {
    let mut t = create_test_router();
    t.monitor("lobby", 0);
    t.signal("lobby", RegionState::Inside, 0);
    t.stop_monitoring("lobby");
    t.drain();

    t.monitor("lobby", 0);
    assert_eq!(t.regions()[0].state, RegionState::Outside);
    t.signal("lobby", RegionState::Inside, 1);
    assert_eq!(t.drain(), vec![entered("lobby")]);
}

// ============================================================================
// Debouncing
// ============================================================================

#[test]
fn test_zero_interval_emits_every_change_once() {
    let mut t = create_test_router();
    t.monitor("lobby", 0);

    t.signal("lobby", RegionState::Inside, 0);
    t.signal("lobby", RegionState::Inside, 0);
    t.signal("lobby", RegionState::Outside, 0);
    t.signal("lobby", RegionState::Outside, 1);
    t.signal("lobby", RegionState::Inside, 1);

    assert_eq!(t.drain(), vec![entered("lobby"), exited("lobby"), entered("lobby")]);
    assert!(t.next_deadline().is_none());
}

#[test]
fn test_initial_exit_signal_is_noop() {
    let mut t = create_test_router();
    t.monitor("lobby", 5);

    t.signal("lobby", RegionState::Outside, 0);

    assert!(t.drain().is_empty());
    assert!(t.next_deadline().is_none());
}

#[test]
fn test_flap_back_to_current_state_emits_nothing() {
    let mut t = create_test_router();
    t.monitor("lobby", 5);

    t.signal("lobby", RegionState::Inside, 0);
    assert_eq!(t.drain(), vec![entered("lobby")]);

    t.signal("lobby", RegionState::Outside, 2);
    assert!(t.drain().is_empty());
    assert_eq!(t.next_deadline(), Some(t.at(5)));
    assert_eq!(t.regions()[0].pending, Some(RegionState::Outside));

    // Back inside: the pending target follows, the deadline does not move
    t.signal("lobby", RegionState::Inside, 3);
    assert_eq!(t.next_deadline(), Some(t.at(5)));
    assert_eq!(t.regions()[0].pending, Some(RegionState::Inside));

    let at = t.at(5);
    t.fire_due_timers(at);
    assert!(t.drain().is_empty());
    assert!(t.next_deadline().is_none());
    assert_eq!(t.regions()[0].state, RegionState::Inside);
    assert_eq!(t.regions()[0].pending, None);
}

#[test]
fn test_flapping_settles_to_final_state() {
    let mut t = create_test_router();
    t.monitor("lobby", 5);

    t.signal("lobby", RegionState::Inside, 0);
    t.signal("lobby", RegionState::Outside, 1);
    t.signal("lobby", RegionState::Inside, 2);
    t.signal("lobby", RegionState::Outside, 3);
    assert_eq!(t.drain(), vec![entered("lobby")]);

    let at = t.at(5);
    t.fire_due_timers(at);
    assert_eq!(t.drain(), vec![exited("lobby")]);
    assert_eq!(t.regions()[0].state, RegionState::Outside);
    assert_eq!(t.watches["lobby"].last_transition_at, Some(t.at(5)));
}

#[test]
fn test_timer_not_due_does_not_fire() {
    let mut t = create_test_router();
    t.monitor("lobby", 5);
    t.signal("lobby", RegionState::Inside, 0);
    t.signal("lobby", RegionState::Outside, 2);
    t.drain();

    let early = t.at_ms(4999);
    t.fire_due_timers(early);
    assert!(t.drain().is_empty());
    assert_eq!(t.next_deadline(), Some(t.at(5)));
}

#[test]
fn test_change_after_quiet_interval_emits_immediately() {
    let mut t = create_test_router();
    t.monitor("lobby", 5);

    t.signal("lobby", RegionState::Inside, 0);
    t.signal("lobby", RegionState::Outside, 7);

    assert_eq!(t.drain(), vec![entered("lobby"), exited("lobby")]);
    assert!(t.next_deadline().is_none());
}

#[test]
fn test_overdue_timer_settles_before_next_signal() {
    let mut t = create_test_router();
    t.monitor("lobby", 5);

    t.signal("lobby", RegionState::Inside, 0);
    t.signal("lobby", RegionState::Outside, 2);
    // The deadline at 5 passed without a tick; the signal at 6 sees it first
    t.signal("lobby", RegionState::Inside, 6);

    assert_eq!(t.drain(), vec![entered("lobby"), exited("lobby")]);
    // Re-entry is deferred relative to the exit that just settled
    assert_eq!(t.next_deadline(), Some(t.at(11)));
}

#[test]
fn test_stop_cancels_pending_transition() {
    let mut t = create_test_router();
    t.monitor("lobby", 5);
    t.signal("lobby", RegionState::Inside, 0);
    t.signal("lobby", RegionState::Outside, 2);
    t.drain();

    assert!(t.stop_monitoring("lobby"));
    assert!(t.next_deadline().is_none());

    let at = t.at(10);
    t.fire_due_timers(at);
    t.signal("lobby", RegionState::Inside, 11);
    assert!(t.drain().is_empty());
}

#[test]
fn test_regions_debounce_independently() {
    let mut t = create_test_router();
    t.monitor("a", 5);
    t.monitor("b", 0);

    t.signal("a", RegionState::Inside, 0);
    t.signal("b", RegionState::Inside, 0);
    t.signal("a", RegionState::Outside, 1);
    t.signal("b", RegionState::Outside, 1);

    assert_eq!(t.drain(), vec![entered("a"), entered("b"), exited("b")]);

    let at = t.at(5);
    t.fire_due_timers(at);
    assert_eq!(t.drain(), vec![exited("a")]);
}

#[test]
fn test_unknown_identifier_signals_are_ignored() {
    let mut t = create_test_router();

    t.signal("ghost", RegionState::Inside, 0);
    let at = t.at(0);
    t.on_raw_ranging_update("ghost", vec![sample(1, Proximity::Near, 1.0, -60)], at);
    t.on_ranging_failed("ghost", ProviderError::CannotRange);

    assert!(t.drain().is_empty());
    assert_eq!(t.metrics.report().unknown_region_signals, 3);
}

// ============================================================================
// Ranging
// ============================================================================

#[test]
fn test_ranging_forwards_samples_then_nearest_change() {
    let mut t = create_test_router();
    t.monitor("lobby", 0);

    let near = sample(1, Proximity::Near, 1.0, -60);
    let immediate = sample(2, Proximity::Immediate, 0.5, -70);
    let at = t.at(0);
    t.on_raw_ranging_update("lobby", vec![near.clone(), immediate.clone()], at);

    assert_eq!(
        t.drain(),
        vec![
            BeaconEvent::BeaconRanged { identifier: "lobby".into(), sample: near },
            BeaconEvent::BeaconRanged { identifier: "lobby".into(), sample: immediate },
            BeaconEvent::NearestBeaconChanged { identifier: "lobby".into(), identity: beacon(2) },
        ]
    );
    assert_eq!(t.regions()[0].nearest, Some(beacon(2).to_string()));
}

#[test]
fn test_same_nearest_is_not_a_change() {
    let mut t = create_test_router();
    t.monitor("lobby", 0);

    let at = t.at(0);
    t.on_raw_ranging_update("lobby", vec![sample(2, Proximity::Near, 1.0, -60)], at);
    t.drain();

    let at = t.at(1);
    t.on_raw_ranging_update("lobby", vec![sample(2, Proximity::Immediate, 0.2, -41)], at);
    let events = t.drain();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], BeaconEvent::BeaconRanged { .. }));
}

#[test]
fn test_empty_ranging_keeps_nearest() {
    let mut t = create_test_router();
    t.monitor("lobby", 0);

    let at = t.at(0);
    t.on_raw_ranging_update("lobby", vec![sample(2, Proximity::Near, 1.0, -60)], at);
    t.drain();

    let at = t.at(1);
    t.on_raw_ranging_update("lobby", Vec::new(), at);
    assert!(t.drain().is_empty());
    assert_eq!(t.regions()[0].nearest, Some(beacon(2).to_string()));
}

#[test]
fn test_ranging_does_not_affect_region_state() {
    let mut t = create_test_router();
    t.monitor("lobby", 0);

    let at = t.at(0);
    t.on_raw_ranging_update("lobby", vec![sample(2, Proximity::Immediate, 0.1, -40)], at);

    assert_eq!(t.regions()[0].state, RegionState::Outside);
    assert!(!t.drain().iter().any(|e| e.region_event().is_some()));
}

#[test]
fn test_stop_discards_nearest() {
    let mut t = create_test_router();
    t.monitor("lobby", 0);
    let at = t.at(0);
    t.on_raw_ranging_update("lobby", vec![sample(2, Proximity::Near, 1.0, -60)], at);
    t.stop_monitoring("lobby");
    t.drain();

    t.monitor("lobby", 0);
    let at = t.at(1);
    t.on_raw_ranging_update("lobby", vec![sample(2, Proximity::Near, 1.0, -60)], at);
    let events = t.drain();
    assert!(events
        .iter()
        .any(|e| matches!(e, BeaconEvent::NearestBeaconChanged { identity, .. } if *identity == beacon(2))));
}

#[test]
fn test_ranging_failure_keeps_watch() {
    let mut t = create_test_router();
    t.monitor("lobby", 0);

    t.on_ranging_failed("lobby", ProviderError::CannotRange);
    assert_eq!(
        t.drain(),
        vec![BeaconEvent::RangingFailed {
            identifier: "lobby".into(),
            error: ProviderError::CannotRange
        }]
    );

    t.signal("lobby", RegionState::Inside, 0);
    assert_eq!(t.drain(), vec![entered("lobby")]);
}

// ============================================================================
// Notifications
// ============================================================================

#[test]
fn test_notifications_disabled_by_default() {
    let mut t = create_test_router();
    t.monitor("lobby", 0);
    t.signal("lobby", RegionState::Inside, 0);

    assert!(t.posted().is_empty());
}

#[test]
fn test_notifications_follow_emitted_transitions() {
    let mut t = create_test_router_with(true, Arc::new(TemplateFormatter::default()));
    t.monitor("lobby", 5);

    t.signal("lobby", RegionState::Inside, 0);
    t.signal("lobby", RegionState::Outside, 1);
    let at = t.at(5);
    t.fire_due_timers(at);

    let posted = t.posted();
    assert_eq!(posted.len(), 2);
    assert_eq!(posted[0].message, "Entered lobby");
    assert_eq!(posted[0].event, "enter");
    assert_eq!(posted[1].message, "Exited lobby");
    assert_eq!(posted[1].event, "exit");
    assert_eq!(posted[1].region.identifier, "lobby");
    assert_eq!(posted[1].region.uuid, UUID);
}

#[test]
fn test_silent_formatter_keeps_events() {
    let mut t = create_test_router_with(true, Arc::new(Silent));
    t.monitor("lobby", 0);

    t.signal("lobby", RegionState::Inside, 0);

    assert_eq!(t.drain(), vec![entered("lobby")]);
    assert!(t.posted().is_empty());
    assert_eq!(t.metrics.report().notifications_skipped, 1);
}

#[test]
fn test_toggle_notifications_at_runtime() {
    let mut t = create_test_router();
    t.monitor("lobby", 0);

    t.handle_command(RouterCommand::SetNotifications { enabled: true });
    t.signal("lobby", RegionState::Inside, 0);
    assert_eq!(t.posted().len(), 1);

    t.handle_command(RouterCommand::SetNotifications { enabled: false });
    t.signal("lobby", RegionState::Outside, 1);
    assert_eq!(t.posted().len(), 1);
}

// ============================================================================
// Command loop
// ============================================================================

#[tokio::test]
async fn test_handle_command_replies() {
    let mut t = create_test_router();

    let (tx, rx) = oneshot::channel();
    t.handle_command(RouterCommand::Start {
        identifier: "lobby".into(),
        identity: beacon(1),
        interval: Duration::ZERO,
        reply: tx,
    });
    assert_eq!(rx.await.unwrap(), Ok(()));

    let (tx, rx) = oneshot::channel();
    t.handle_command(RouterCommand::ListRegions { reply: tx });
    assert_eq!(rx.await.unwrap().len(), 1);

    let (tx, rx) = oneshot::channel();
    t.handle_command(RouterCommand::Stop { identifier: "lobby".into(), reply: tx });
    assert!(rx.await.unwrap());
    assert!(t.metrics.commands_total() >= 3);
}

#[tokio::test(start_paused = true)]
async fn test_run_fires_deferred_transition() {
    let TestRouter { mut router, mut events_rx, .. } = create_test_router();
    let (tx, rx) = mpsc::channel(16);
    let (_signals_tx, signals_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move { router.run(rx, signals_rx).await });

    let (reply, started) = oneshot::channel();
    tx.send(RouterCommand::Start {
        identifier: "lobby".into(),
        identity: beacon(1),
        interval: Duration::from_secs(5),
        reply,
    })
    .await
    .unwrap();
    started.await.unwrap().unwrap();

    let t0 = clock_now();
    tx.send(RouterCommand::RegionSignal {
        identifier: "lobby".into(),
        state: RegionState::Inside,
        at: t0,
    })
    .await
    .unwrap();
    assert_eq!(events_rx.recv().await, Some(entered("lobby")));

    tokio::time::advance(Duration::from_secs(1)).await;
    tx.send(RouterCommand::RegionSignal {
        identifier: "lobby".into(),
        state: RegionState::Outside,
        at: clock_now(),
    })
    .await
    .unwrap();

    // Nothing until the interval elapses
    tokio::time::advance(Duration::from_secs(3)).await;
    assert!(events_rx.try_recv().is_err());

    assert_eq!(events_rx.recv().await, Some(exited("lobby")));
    assert!(clock_now() >= t0 + Duration::from_secs(5));

    drop(tx);
    task.await.unwrap();
}
