//! Seams to the collaborators the controller does not own.

use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc};
use tokio::sync::mpsc;

use crate::{
    error::ServiceError,
    model::{ChangeEvent, Notification, RecordId, RefreshRequest, Snapshot},
};

/// One push from the snapshot query: the latest snapshot (or none) or an error.
pub type Delivery = Result<Option<Snapshot>, ServiceError>;

/// Stream of deliveries for one key. Closing the sender ends the binding.
pub type SnapshotFeed = mpsc::UnboundedReceiver<Delivery>;

pub type EventHandler = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

pub type ErrorHandler = Arc<dyn Fn(&ServiceError) + Send + Sync>;

/// Reactive read of the latest snapshot for a record.
pub trait SnapshotQuery: Send + Sync + Debug {
    /// Opens a feed that emits whenever the backing data for `record_id` changes.
    fn watch(&self, record_id: &RecordId) -> SnapshotFeed;
}

/// Enqueues a provider call for a record; does not wait for the new snapshot.
#[async_trait]
pub trait RefreshService: Send + Sync + Debug {
    async fn request_refresh(&self, request: &RefreshRequest) -> Result<(), ServiceError>;
}

/// Where a new subscription starts reading the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayPosition {
    /// Only events published after the subscription is established.
    #[default]
    Newest,
    /// Every event the channel still retains.
    AllRetained,
    /// Events after the given replay id.
    After(i64),
}

impl ReplayPosition {
    pub fn as_i64(&self) -> i64 {
        match self {
            ReplayPosition::Newest => -1,
            ReplayPosition::AllRetained => -2,
            ReplayPosition::After(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Handle for an installed [`ErrorHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorHandlerId(pub u64);

/// Record-change event stream.
#[async_trait]
pub trait ChangeChannel: Send + Sync + Debug {
    /// Transport-level tracing toggle; no effect on delivered events.
    fn set_debug(&self, enabled: bool);

    /// Installs a handler for channel-level failures. It stays installed until
    /// [`ChangeChannel::remove_error_handler`] is called with the returned id.
    fn on_error(&self, handler: ErrorHandler) -> ErrorHandlerId;

    /// Uninstalls an error handler. Unknown ids are ignored.
    fn remove_error_handler(&self, id: ErrorHandlerId);

    /// Completes once the subscribe handshake has been acknowledged.
    async fn subscribe(
        &self,
        channel: &str,
        replay: ReplayPosition,
        on_event: EventHandler,
    ) -> Result<SubscriptionId, ServiceError>;

    /// Releases a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Notification surface of the host.
pub trait Notifier: Send + Sync + Debug {
    fn notify(&self, notification: Notification);
}

/// Asks the host to rebuild its context, re-establishing every binding.
pub trait HostReload: Send + Sync + Debug {
    fn reload(&self);
}

/// Everything a controller needs from the outside world.
#[derive(Debug, Clone)]
pub struct Services {
    pub snapshots: Arc<dyn SnapshotQuery>,
    pub refresh: Arc<dyn RefreshService>,
    pub changes: Arc<dyn ChangeChannel>,
    pub notifier: Arc<dyn Notifier>,
    pub host: Arc<dyn HostReload>,
}
