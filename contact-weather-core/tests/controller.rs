//! End-to-end behaviour of the contact weather controller against in-memory services.

use async_trait::async_trait;
use contact_weather_core::{
    ContactWeather, ControllerConfig, DisplayZone, HostReload, ListenerPhase, Notification,
    Notifier, RecordId, RefreshOutcome, RefreshPolicy, RefreshService, ServiceError, Services,
    Severity, Snapshot,
    backend::{MemoryChangeBus, MemorySnapshots},
    controller::DEFAULT_CHANNEL,
    model::{CapturedAt, ChangeEvent, RefreshRequest},
};
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::sync::{Notify, watch};

const RECORD: &str = "003000000000001";

#[derive(Debug, Clone, PartialEq)]
enum HostEvent {
    Notified(Notification),
    Reloaded,
}

#[derive(Debug, Default)]
struct RecordingHost {
    log: Mutex<Vec<HostEvent>>,
}

impl RecordingHost {
    fn notifications(&self) -> Vec<Notification> {
        self.log
            .lock()
            .iter()
            .filter_map(|e| match e {
                HostEvent::Notified(n) => Some(n.clone()),
                HostEvent::Reloaded => None,
            })
            .collect()
    }

    fn reloads(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|e| **e == HostEvent::Reloaded)
            .count()
    }
}

impl Notifier for RecordingHost {
    fn notify(&self, notification: Notification) {
        self.log.lock().push(HostEvent::Notified(notification));
    }
}

impl HostReload for RecordingHost {
    fn reload(&self) {
        self.log.lock().push(HostEvent::Reloaded);
    }
}

#[derive(Debug, Default)]
struct ScriptedRefresh {
    reject_with: Mutex<Option<String>>,
    calls: Mutex<Vec<RefreshRequest>>,
    busy: Mutex<Option<watch::Receiver<usize>>>,
    busy_seen: Mutex<Vec<usize>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedRefresh {
    fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    fn reject(&self, message: &str) {
        *self.reject_with.lock() = Some(message.to_string());
    }

    fn observe(&self, busy: watch::Receiver<usize>) {
        *self.busy.lock() = Some(busy);
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl RefreshService for ScriptedRefresh {
    async fn request_refresh(&self, request: &RefreshRequest) -> Result<(), ServiceError> {
        self.calls.lock().push(request.clone());
        if let Some(busy) = self.busy.lock().as_ref() {
            self.busy_seen.lock().push(*busy.borrow());
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        match self.reject_with.lock().clone() {
            Some(message) => Err(ServiceError::with_message(message)),
            None => Ok(()),
        }
    }
}

struct Harness {
    snapshots: Arc<MemorySnapshots>,
    bus: Arc<MemoryChangeBus>,
    refresh: Arc<ScriptedRefresh>,
    host: Arc<RecordingHost>,
}

impl Harness {
    fn new() -> Self {
        Self::with_refresh(ScriptedRefresh::default())
    }

    fn with_refresh(refresh: ScriptedRefresh) -> Self {
        Self {
            snapshots: Arc::new(MemorySnapshots::new()),
            bus: Arc::new(MemoryChangeBus::new()),
            refresh: Arc::new(refresh),
            host: Arc::new(RecordingHost::default()),
        }
    }

    fn services(&self) -> Services {
        Services {
            snapshots: self.snapshots.clone(),
            refresh: self.refresh.clone(),
            changes: self.bus.clone(),
            notifier: self.host.clone(),
            host: self.host.clone(),
        }
    }

    fn controller(&self, config: ControllerConfig) -> ContactWeather {
        ContactWeather::new(RECORD, self.services(), config)
    }
}

fn utc_config() -> ControllerConfig {
    ControllerConfig {
        display_zone: DisplayZone::utc(),
        ..Default::default()
    }
}

fn listening_config() -> ControllerConfig {
    ControllerConfig {
        change_events_enabled: true,
        channel_debug: true,
        ..utc_config()
    }
}

fn reading(temp: f64, status: u16) -> Snapshot {
    Snapshot {
        temperature_c: Some(temp),
        captured_at: Some(CapturedAt::Text("2024-01-01T00:00:00Z".to_string())),
        provider_response: Some(status),
    }
}

async fn wait_revision(ctrl: &ContactWeather, at_least: u64) {
    let mut rx = ctrl.revision_watch();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|rev| *rev >= at_least))
        .await
        .expect("controller processed deliveries in time")
        .expect("revision channel open");
}

#[tokio::test]
async fn null_then_ok_snapshot_updates_display_silently() {
    let h = Harness::new();
    let id = RecordId::new(RECORD);
    let mut ctrl = h.controller(utc_config());

    ctrl.mount().await;
    wait_revision(&ctrl, 1).await;
    assert_eq!(ctrl.temperature(), "");
    assert_eq!(ctrl.captured_at(), "");

    h.snapshots.publish(&id, reading(18.0, 200));
    wait_revision(&ctrl, 2).await;

    assert_eq!(ctrl.temperature(), "18 °C");
    assert_eq!(ctrl.captured_at(), "1/1/2024, 12:00:00 AM");
    assert!(h.host.notifications().is_empty());
}

#[tokio::test]
async fn degraded_snapshot_is_displayed_and_reported() {
    let h = Harness::new();
    let id = RecordId::new(RECORD);
    h.snapshots.publish(&id, reading(9.0, 503));

    let mut ctrl = h.controller(utc_config());
    ctrl.mount().await;
    wait_revision(&ctrl, 1).await;

    assert_eq!(ctrl.temperature(), "9 °C");
    assert_eq!(ctrl.snapshot(), Some(reading(9.0, 503)));

    let notes = h.host.notifications();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].severity, Severity::Error);
    assert!(notes[0].message.contains("503"));
}

#[tokio::test]
async fn query_error_reports_once_and_keeps_snapshot() {
    let h = Harness::new();
    let id = RecordId::new(RECORD);
    h.snapshots.publish(&id, reading(14.0, 200));

    let mut ctrl = h.controller(utc_config());
    ctrl.mount().await;
    wait_revision(&ctrl, 1).await;

    h.snapshots.fail(&id, "insufficient access");
    wait_revision(&ctrl, 2).await;

    assert_eq!(ctrl.snapshot(), Some(reading(14.0, 200)));
    let notes = h.host.notifications();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].severity, Severity::Error);
    assert_eq!(notes[0].title, "Error loading weather");
    assert_eq!(notes[0].message, "insufficient access");
}

#[tokio::test]
async fn refresh_success_notifies_and_reloads_before_returning() {
    let h = Harness::new();
    let mut ctrl = h.controller(utc_config());
    ctrl.mount().await;
    h.refresh.observe(ctrl.busy_watch());

    assert!(!ctrl.is_busy());
    let outcome = ctrl.refresh().await;

    assert_eq!(outcome, RefreshOutcome::Requested);
    assert!(!ctrl.is_busy());
    assert_eq!(*h.refresh.busy_seen.lock(), vec![1]);
    assert_eq!(
        h.refresh.calls.lock()[0],
        RefreshRequest {
            contact_id: RECORD.to_string()
        }
    );

    let log = h.host.log.lock().clone();
    assert_eq!(
        log,
        vec![
            HostEvent::Notified(Notification::success(
                "Requested",
                "Weather refresh requested."
            )),
            HostEvent::Reloaded,
        ]
    );
}

#[tokio::test]
async fn refresh_rejection_is_reported_not_raised() {
    let h = Harness::new();
    h.refresh.reject("quota exceeded");
    let id = RecordId::new(RECORD);
    h.snapshots.publish(&id, reading(5.0, 200));

    let mut ctrl = h.controller(utc_config());
    ctrl.mount().await;
    wait_revision(&ctrl, 1).await;
    h.refresh.observe(ctrl.busy_watch());

    let outcome = ctrl.refresh().await;

    assert_eq!(
        outcome,
        RefreshOutcome::Failed {
            message: "quota exceeded".to_string()
        }
    );
    assert!(!ctrl.is_busy());
    assert_eq!(*h.refresh.busy_seen.lock(), vec![1]);
    assert_eq!(h.host.reloads(), 0);
    assert_eq!(
        h.host.notifications(),
        vec![Notification::error("Error", "quota exceeded")]
    );
    assert_eq!(ctrl.snapshot(), Some(reading(5.0, 200)));
}

#[tokio::test]
async fn second_refresh_while_busy_is_skipped() {
    let gate = Arc::new(Notify::new());
    let h = Harness::with_refresh(ScriptedRefresh::gated(gate.clone()));
    let ctrl = h.controller(utc_config());

    let (first, second, ()) = tokio::join!(ctrl.refresh(), ctrl.refresh(), async {
        tokio::task::yield_now().await;
        assert!(ctrl.is_busy());
        gate.notify_one();
    });

    assert_eq!(first, RefreshOutcome::Requested);
    assert_eq!(second, RefreshOutcome::Skipped);
    assert_eq!(h.refresh.call_count(), 1);
    assert_eq!(h.host.reloads(), 1);
    assert!(!ctrl.is_busy());
}

#[tokio::test]
async fn concurrent_policy_keeps_busy_until_last_settles() {
    let gate = Arc::new(Notify::new());
    let h = Harness::with_refresh(ScriptedRefresh::gated(gate.clone()));
    let ctrl = h.controller(ControllerConfig {
        refresh_policy: RefreshPolicy::AllowConcurrent,
        ..utc_config()
    });
    h.refresh.observe(ctrl.busy_watch());

    let (first, second, ()) = tokio::join!(ctrl.refresh(), ctrl.refresh(), async {
        tokio::task::yield_now().await;
        assert_eq!(*ctrl.busy_watch().borrow(), 2);
        gate.notify_one();
        tokio::task::yield_now().await;
        assert!(ctrl.is_busy());
        gate.notify_one();
    });

    assert_eq!(first, RefreshOutcome::Requested);
    assert_eq!(second, RefreshOutcome::Requested);
    assert_eq!(*h.refresh.busy_seen.lock(), vec![1, 2]);
    assert_eq!(h.host.reloads(), 2);
    assert!(!ctrl.is_busy());
}

#[tokio::test]
async fn rekey_drops_old_snapshot_and_ignores_old_record() {
    let h = Harness::new();
    let a = RecordId::new(RECORD);
    let b = RecordId::new("003000000000002");
    h.snapshots.publish(&a, reading(10.0, 200));

    let mut ctrl = h.controller(utc_config());
    ctrl.mount().await;
    wait_revision(&ctrl, 1).await;
    assert_eq!(ctrl.temperature(), "10 °C");

    ctrl.set_record_id(b.clone());
    assert_eq!(ctrl.record_id(), b);
    assert_eq!(ctrl.temperature(), "");
    wait_revision(&ctrl, 3).await;

    h.snapshots.publish(&a, reading(11.0, 503));
    h.snapshots.publish(&b, reading(20.0, 200));
    wait_revision(&ctrl, 4).await;

    assert_eq!(ctrl.temperature(), "20 °C");
    assert!(h.host.notifications().is_empty());
}

#[tokio::test]
async fn refresh_targets_current_record_after_rekey() {
    let h = Harness::new();
    let mut ctrl = h.controller(utc_config());
    ctrl.mount().await;

    ctrl.set_record_id("003000000000009");
    ctrl.refresh().await;

    assert_eq!(h.refresh.calls.lock()[0].contact_id, "003000000000009");
}

#[tokio::test]
async fn unmount_stops_deliveries() {
    let h = Harness::new();
    let id = RecordId::new(RECORD);
    let mut ctrl = h.controller(utc_config());
    ctrl.mount().await;
    wait_revision(&ctrl, 1).await;

    ctrl.unmount();
    assert!(!ctrl.is_mounted());
    h.snapshots.publish(&id, reading(30.0, 503));
    tokio::task::yield_now().await;

    assert_eq!(ctrl.temperature(), "");
    assert!(h.host.notifications().is_empty());
}

#[tokio::test]
async fn listener_subscribes_once_and_filters_by_record() {
    let h = Harness::new();
    let mut ctrl = h.controller(listening_config());

    ctrl.mount().await;
    ctrl.mount().await;

    assert_eq!(ctrl.listener_phase(), ListenerPhase::Subscribed);
    assert_eq!(h.bus.active_subscriptions(), 1);
    assert!(h.bus.debug_enabled());
    assert_eq!(h.bus.error_handler_count(), 1);

    let mine = ChangeEvent::for_contact(&RecordId::new(RECORD));
    let other = ChangeEvent::for_contact(&RecordId::new("003000000000002"));
    let mut headerless = mine.clone();
    if let Some(data) = headerless.data.as_mut() {
        data.change_event_header = None;
    }

    assert_eq!(h.bus.publish(DEFAULT_CHANNEL, mine), 1);
    h.bus.publish(DEFAULT_CHANNEL, other);
    h.bus.publish(DEFAULT_CHANNEL, headerless);
    h.bus.publish(DEFAULT_CHANNEL, ChangeEvent::default());

    assert_eq!(ctrl.relevant_changes(), 1);
    assert!(ctrl.snapshot().is_none());
    assert!(h.host.notifications().is_empty());
    assert_eq!(h.host.reloads(), 0);
}

#[tokio::test]
async fn listener_filter_follows_record_id() {
    let h = Harness::new();
    let mut ctrl = h.controller(listening_config());
    ctrl.mount().await;

    let next = RecordId::new("003000000000002");
    ctrl.set_record_id(next.clone());

    h.bus
        .publish(DEFAULT_CHANNEL, ChangeEvent::for_contact(&RecordId::new(RECORD)));
    h.bus.publish(DEFAULT_CHANNEL, ChangeEvent::for_contact(&next));

    assert_eq!(ctrl.relevant_changes(), 1);
    assert_eq!(h.bus.active_subscriptions(), 1);
}

#[tokio::test]
async fn channel_errors_are_swallowed() {
    let h = Harness::new();
    let mut ctrl = h.controller(listening_config());
    ctrl.mount().await;

    h.bus.raise(&ServiceError::Transport("handshake lost".into()));

    assert!(h.host.notifications().is_empty());
    assert_eq!(ctrl.listener_phase(), ListenerPhase::Subscribed);
}

#[tokio::test]
async fn unmount_and_drop_release_subscription() {
    let h = Harness::new();
    let mut ctrl = h.controller(listening_config());

    ctrl.mount().await;
    ctrl.unmount();
    assert_eq!(h.bus.active_subscriptions(), 0);
    assert_eq!(h.bus.error_handler_count(), 0);
    assert_eq!(ctrl.listener_phase(), ListenerPhase::Unsubscribed);

    ctrl.mount().await;
    assert_eq!(h.bus.active_subscriptions(), 1);
    assert_eq!(h.bus.error_handler_count(), 1);

    drop(ctrl);
    assert_eq!(h.bus.active_subscriptions(), 0);
    assert_eq!(h.bus.error_handler_count(), 0);
}

#[tokio::test]
async fn repeated_mount_cycles_hold_at_most_one_error_handler() {
    let h = Harness::new();
    let mut ctrl = h.controller(listening_config());

    for _ in 0..5 {
        ctrl.mount().await;
        assert_eq!(h.bus.error_handler_count(), 1);
        ctrl.unmount();
    }
    assert_eq!(h.bus.error_handler_count(), 0);

    ctrl.mount().await;
    drop(ctrl);
    assert_eq!(h.bus.active_subscriptions(), 0);
    assert_eq!(h.bus.error_handler_count(), 0);
}

#[tokio::test]
async fn unmount_publishes_the_cleared_view() {
    let h = Harness::new();
    h.snapshots.publish(&RecordId::new(RECORD), reading(9.0, 200));
    let mut ctrl = h.controller(utc_config());
    ctrl.mount().await;
    wait_revision(&ctrl, 1).await;

    let before = *ctrl.revision_watch().borrow();
    ctrl.unmount();

    assert_eq!(*ctrl.revision_watch().borrow(), before + 1);
    assert_eq!(ctrl.temperature(), "");
}

#[tokio::test]
async fn disabled_listener_never_subscribes() {
    let h = Harness::new();
    let mut ctrl = h.controller(utc_config());
    ctrl.mount().await;

    assert_eq!(ctrl.listener_phase(), ListenerPhase::Unsubscribed);
    assert_eq!(h.bus.active_subscriptions(), 0);
    assert_eq!(h.bus.error_handler_count(), 0);
}

#[tokio::test]
async fn failed_handshake_is_silent_and_binding_still_works() {
    let h = Harness::new();
    h.bus.reject_subscriptions(true);
    let id = RecordId::new(RECORD);
    h.snapshots.publish(&id, reading(2.5, 200));

    let mut ctrl = h.controller(listening_config());
    ctrl.mount().await;
    wait_revision(&ctrl, 1).await;

    assert_eq!(ctrl.listener_phase(), ListenerPhase::Unsubscribed);
    assert_eq!(h.bus.error_handler_count(), 0);
    assert!(h.host.notifications().is_empty());
    assert_eq!(ctrl.temperature(), "2.5 °C");
}
