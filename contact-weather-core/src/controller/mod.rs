//! The contact weather controller.
//!
//! A [`ContactWeather`] is created unmounted. [`ContactWeather::mount`] binds it
//! to the snapshot query for its record and, when enabled, subscribes to the
//! change channel. Both bindings are released by [`ContactWeather::unmount`] or
//! by dropping the controller.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::{
    display::{DisplayZone, format_captured_at, format_temperature},
    model::{RecordId, Snapshot},
    service::{ReplayPosition, Services},
};

mod binder;
mod listener;
mod refresh;

use binder::{BinderTask, SnapshotBinder};

pub use listener::{ChangeSignal, ListenerPhase, Subscription, classify};
pub use refresh::{RefreshOutcome, RefreshPolicy};

/// Change channel carrying weather snapshot record changes.
pub const DEFAULT_CHANNEL: &str = "/data/Weather_Snapshot__ChangeEvent";

/// Settings injected at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Whether the change channel integration is available at all.
    pub change_events_enabled: bool,
    pub channel: String,
    pub channel_debug: bool,
    pub replay: ReplayPosition,
    pub display_zone: DisplayZone,
    pub refresh_policy: RefreshPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            change_events_enabled: false,
            channel: DEFAULT_CHANNEL.to_string(),
            channel_debug: false,
            replay: ReplayPosition::Newest,
            display_zone: DisplayZone::Local,
            refresh_policy: RefreshPolicy::SkipWhileBusy,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ViewState {
    pub(crate) record_id: RecordId,
    pub(crate) snapshot: Option<Snapshot>,
    /// Bumped whenever the binding is torn down or re-keyed.
    pub(crate) generation: u64,
    pub(crate) relevant_changes: u64,
}

impl ViewState {
    pub(crate) fn new(record_id: RecordId) -> Self {
        Self {
            record_id,
            snapshot: None,
            generation: 0,
            relevant_changes: 0,
        }
    }

    fn invalidate(&mut self) {
        self.snapshot = None;
        self.generation += 1;
    }
}

pub(crate) type SharedView = Arc<Mutex<ViewState>>;

#[derive(Debug)]
pub struct ContactWeather {
    services: Services,
    config: ControllerConfig,
    view: SharedView,
    revision: Arc<watch::Sender<u64>>,
    in_flight: watch::Sender<usize>,
    phase: watch::Sender<ListenerPhase>,
    binder: Option<BinderTask>,
    subscription: Option<Subscription>,
    mounted: bool,
}

impl ContactWeather {
    pub fn new(record_id: impl Into<RecordId>, services: Services, config: ControllerConfig) -> Self {
        Self {
            services,
            config,
            view: Arc::new(Mutex::new(ViewState::new(record_id.into()))),
            revision: Arc::new(watch::Sender::new(0)),
            in_flight: watch::Sender::new(0),
            phase: watch::Sender::new(ListenerPhase::Unsubscribed),
            binder: None,
            subscription: None,
            mounted: false,
        }
    }

    /// Starts the snapshot binding and, if enabled, the change subscription.
    ///
    /// Mounting an already mounted controller does nothing. A failed change
    /// subscription is logged and otherwise ignored.
    pub async fn mount(&mut self) {
        if self.mounted {
            return;
        }
        self.mounted = true;
        info!(record_id = %self.record_id(), "mounting contact weather");

        self.bind();

        if self.config.change_events_enabled {
            self.subscription = listener::subscribe(
                &self.services.changes,
                &self.config,
                &self.view,
                &self.phase,
            )
            .await;
        }
    }

    /// Releases both bindings and forgets the displayed snapshot.
    pub fn unmount(&mut self) {
        if !self.mounted {
            return;
        }
        info!(record_id = %self.record_id(), "unmounting contact weather");

        self.binder = None;
        self.subscription = None;
        self.phase.send_replace(ListenerPhase::Unsubscribed);
        self.view.lock().invalidate();
        self.revision.send_modify(|rev| *rev += 1);
        self.mounted = false;
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Re-keys the controller. The old snapshot is dropped immediately and
    /// deliveries for the previous record are discarded.
    ///
    /// Must be called from within a tokio runtime when mounted.
    pub fn set_record_id(&mut self, record_id: impl Into<RecordId>) {
        let record_id = record_id.into();
        {
            let mut view = self.view.lock();
            if view.record_id == record_id {
                return;
            }
            view.record_id = record_id;
            view.invalidate();
        }
        self.revision.send_modify(|rev| *rev += 1);

        if self.mounted {
            self.bind();
        }
    }

    pub fn record_id(&self) -> RecordId {
        self.view.lock().record_id.clone()
    }

    fn bind(&mut self) {
        let (record_id, generation) = {
            let view = self.view.lock();
            (view.record_id.clone(), view.generation)
        };

        // Drop the previous task first so it cannot race the new one.
        self.binder = None;

        let feed = self.services.snapshots.watch(&record_id);
        let binder = SnapshotBinder::new(
            self.view.clone(),
            self.services.notifier.clone(),
            self.revision.clone(),
            generation,
        );
        self.binder = Some(BinderTask::spawn(binder, feed));
    }

    /// Asks the refresh service to fetch a new reading for the bound record.
    ///
    /// Never fails: the result is reported through the notifier, and on success
    /// the host is asked to reload before this returns.
    pub async fn refresh(&self) -> RefreshOutcome {
        let record_id = self.record_id();
        refresh::run_refresh(
            &self.services,
            &record_id,
            &self.in_flight,
            self.config.refresh_policy,
        )
        .await
    }

    /// Latest temperature, e.g. `"18 °C"`, or empty.
    pub fn temperature(&self) -> String {
        format_temperature(self.view.lock().snapshot.as_ref())
    }

    /// Capture time of the latest snapshot in the display zone, or empty.
    pub fn captured_at(&self) -> String {
        format_captured_at(self.view.lock().snapshot.as_ref(), self.config.display_zone)
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.view.lock().snapshot.clone()
    }

    pub fn is_busy(&self) -> bool {
        *self.in_flight.borrow() > 0
    }

    /// Number of refreshes currently in flight.
    pub fn busy_watch(&self) -> watch::Receiver<usize> {
        self.in_flight.subscribe()
    }

    /// Bumped after every processed delivery, every re-key and every unmount.
    pub fn revision_watch(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn listener_phase(&self) -> ListenerPhase {
        *self.phase.borrow()
    }

    pub fn listener_watch(&self) -> watch::Receiver<ListenerPhase> {
        self.phase.subscribe()
    }

    /// Change events seen for the bound record since construction.
    pub fn relevant_changes(&self) -> u64 {
        self.view.lock().relevant_changes
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }
}
