//! In-process backends for hosts without a server, and for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    error::ServiceError,
    model::{ChangeEvent, RecordId, Snapshot},
    service::{
        ChangeChannel, Delivery, ErrorHandler, ErrorHandlerId, EventHandler, ReplayPosition,
        SnapshotFeed, SnapshotQuery, SubscriptionId,
    },
};

/// Latest snapshot per record, pushed to every open feed on change.
#[derive(Debug, Default)]
pub struct MemorySnapshots {
    inner: Mutex<SnapshotTable>,
}

#[derive(Debug, Default)]
struct SnapshotTable {
    latest: HashMap<RecordId, Snapshot>,
    watchers: HashMap<RecordId, Vec<mpsc::UnboundedSender<Delivery>>>,
}

impl MemorySnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `snapshot` as the latest for `record_id` and pushes it to watchers.
    pub fn publish(&self, record_id: &RecordId, snapshot: Snapshot) {
        let mut table = self.inner.lock();
        table.latest.insert(record_id.clone(), snapshot.clone());
        push(&mut table, record_id, || Ok(Some(snapshot.clone())));
    }

    /// Pushes a query failure to watchers without touching the stored snapshot.
    pub fn fail(&self, record_id: &RecordId, message: &str) {
        let mut table = self.inner.lock();
        push(&mut table, record_id, || Err(ServiceError::with_message(message)));
    }

    pub fn latest(&self, record_id: &RecordId) -> Option<Snapshot> {
        self.inner.lock().latest.get(record_id).cloned()
    }

    /// Open feeds for `record_id`.
    pub fn watcher_count(&self, record_id: &RecordId) -> usize {
        let mut table = self.inner.lock();
        match table.watchers.get_mut(record_id) {
            Some(list) => {
                list.retain(|tx| !tx.is_closed());
                list.len()
            }
            None => 0,
        }
    }
}

fn push(table: &mut SnapshotTable, record_id: &RecordId, delivery: impl Fn() -> Delivery) {
    if let Some(list) = table.watchers.get_mut(record_id) {
        list.retain(|tx| tx.send(delivery()).is_ok());
    }
}

impl SnapshotQuery for MemorySnapshots {
    fn watch(&self, record_id: &RecordId) -> SnapshotFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut table = self.inner.lock();

        // A fresh binding always resolves once, to the stored snapshot or to none.
        let current = table.latest.get(record_id).cloned();
        if tx.send(Ok(current)).is_ok() {
            table.watchers.entry(record_id.clone()).or_default().push(tx);
        }
        rx
    }
}

/// A local change channel keyed by channel name.
#[derive(Default)]
pub struct MemoryChangeBus {
    subscriptions: Mutex<HashMap<SubscriptionId, (String, EventHandler)>>,
    error_handlers: Mutex<Vec<(ErrorHandlerId, ErrorHandler)>>,
    next_id: AtomicU64,
    debug: AtomicBool,
    reject_subscribe: AtomicBool,
}

impl std::fmt::Debug for MemoryChangeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChangeBus")
            .field("subscriptions", &self.active_subscriptions())
            .field("error_handlers", &self.error_handler_count())
            .field("debug", &self.debug_enabled())
            .finish()
    }
}

impl MemoryChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to every subscriber of `channel`; returns how many received it.
    pub fn publish(&self, channel: &str, event: ChangeEvent) -> usize {
        let handlers: Vec<EventHandler> = self
            .subscriptions
            .lock()
            .values()
            .filter(|(name, _)| name == channel)
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in &handlers {
            handler(event.clone());
        }
        handlers.len()
    }

    /// Reports a channel-level failure to the installed error handlers.
    pub fn raise(&self, err: &ServiceError) {
        let handlers: Vec<ErrorHandler> = self
            .error_handlers
            .lock()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(err);
        }
    }

    /// Makes subsequent subscribe handshakes fail.
    pub fn reject_subscriptions(&self, reject: bool) {
        self.reject_subscribe.store(reject, Ordering::SeqCst);
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug.load(Ordering::SeqCst)
    }

    pub fn error_handler_count(&self) -> usize {
        self.error_handlers.lock().len()
    }
}

#[async_trait]
impl ChangeChannel for MemoryChangeBus {
    fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::SeqCst);
    }

    fn on_error(&self, handler: ErrorHandler) -> ErrorHandlerId {
        let id = ErrorHandlerId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.error_handlers.lock().push((id, handler));
        id
    }

    fn remove_error_handler(&self, id: ErrorHandlerId) {
        self.error_handlers.lock().retain(|(installed, _)| *installed != id);
    }

    async fn subscribe(
        &self,
        channel: &str,
        replay: ReplayPosition,
        on_event: EventHandler,
    ) -> Result<SubscriptionId, ServiceError> {
        if self.reject_subscribe.load(Ordering::SeqCst) {
            return Err(ServiceError::Transport(format!(
                "subscription to {channel} refused"
            )));
        }

        // Nothing is retained, so every replay position starts at the newest event.
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        debug!(channel, replay = replay.as_i64(), subscription = %id, "memory subscription opened");
        self.subscriptions
            .lock()
            .insert(id, (channel.to_string(), on_event));
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.lock().remove(&id);
    }
}
