use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::debug;

use crate::{
    error::extract_message,
    model::Notification,
    service::{Delivery, Notifier, SnapshotFeed},
};

use super::SharedView;

/// What a single delivery did to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Applied {
    Stored { degraded: bool },
    Empty,
    Failed,
    /// Delivery belonged to a binding that has since been replaced.
    Stale,
}

/// Applies snapshot deliveries for one binding generation.
#[derive(Debug)]
pub(crate) struct SnapshotBinder {
    view: SharedView,
    notifier: Arc<dyn Notifier>,
    revision: Arc<watch::Sender<u64>>,
    generation: u64,
}

impl SnapshotBinder {
    pub(crate) fn new(
        view: SharedView,
        notifier: Arc<dyn Notifier>,
        revision: Arc<watch::Sender<u64>>,
        generation: u64,
    ) -> Self {
        Self {
            view,
            notifier,
            revision,
            generation,
        }
    }

    pub(crate) fn apply(&self, delivery: Delivery) -> Applied {
        let applied = {
            let mut view = self.view.lock();
            if view.generation != self.generation {
                return Applied::Stale;
            }

            match delivery {
                Ok(Some(snapshot)) => {
                    let degraded = snapshot.provider_response.filter(|_| snapshot.is_degraded());
                    view.snapshot = Some(snapshot);
                    debug!(record_id = %view.record_id, "stored weather snapshot");

                    // Notify with the lock released; hosts may read the view back.
                    drop(view);
                    if let Some(code) = degraded {
                        self.notifier
                            .notify(Notification::error("Weather Error", format!("Status {code}")));
                    }
                    Applied::Stored {
                        degraded: degraded.is_some(),
                    }
                }
                Ok(None) => {
                    debug!(record_id = %view.record_id, "no weather snapshot for record");
                    Applied::Empty
                }
                Err(err) => {
                    debug!(record_id = %view.record_id, error = %err, "weather snapshot query failed");
                    drop(view);
                    self.notifier.notify(Notification::error(
                        "Error loading weather",
                        extract_message(&err),
                    ));
                    Applied::Failed
                }
            }
        };

        self.revision.send_modify(|rev| *rev += 1);
        applied
    }

    pub(crate) async fn run(self, mut feed: SnapshotFeed) {
        while let Some(delivery) = feed.recv().await {
            match self.apply(delivery) {
                Applied::Stale => break,
                Applied::Stored { degraded: true } => debug!("displaying degraded snapshot"),
                _ => {}
            }
        }
        debug!(generation = self.generation, "snapshot feed closed");
    }
}

/// Binder task that is aborted when its owner lets go of it.
#[derive(Debug)]
pub(crate) struct BinderTask(JoinHandle<()>);

impl BinderTask {
    pub(crate) fn spawn(binder: SnapshotBinder, feed: SnapshotFeed) -> Self {
        Self(tokio::spawn(binder.run(feed)))
    }
}

impl Drop for BinderTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        controller::ViewState,
        error::ServiceError,
        model::{RecordId, Severity, Snapshot},
    };
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct Collect(Mutex<Vec<Notification>>);

    impl Notifier for Collect {
        fn notify(&self, notification: Notification) {
            self.0.lock().push(notification);
        }
    }

    fn binder(generation: u64) -> (SnapshotBinder, SharedView, Arc<Collect>, watch::Receiver<u64>) {
        let view = Arc::new(Mutex::new(ViewState::new(RecordId::new("003A"))));
        let notes = Arc::new(Collect::default());
        let (revision, rx) = watch::channel(0);
        let binder = SnapshotBinder::new(view.clone(), notes.clone(), Arc::new(revision), generation);
        (binder, view, notes, rx)
    }

    fn reading(temp: f64, status: u16) -> Snapshot {
        Snapshot {
            temperature_c: Some(temp),
            captured_at: None,
            provider_response: Some(status),
        }
    }

    #[test]
    fn ok_snapshot_is_stored_silently() {
        let (binder, view, notes, rx) = binder(0);

        let applied = binder.apply(Ok(Some(reading(18.0, 200))));

        assert_eq!(applied, Applied::Stored { degraded: false });
        assert_eq!(view.lock().snapshot, Some(reading(18.0, 200)));
        assert!(notes.0.lock().is_empty());
        assert_eq!(*rx.borrow(), 1);
    }

    #[test]
    fn degraded_snapshot_is_stored_and_flagged() {
        let (binder, view, notes, _rx) = binder(0);

        let applied = binder.apply(Ok(Some(reading(7.0, 503))));

        assert_eq!(applied, Applied::Stored { degraded: true });
        assert_eq!(view.lock().snapshot, Some(reading(7.0, 503)));
        let notes = notes.0.lock();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].severity, Severity::Error);
        assert_eq!(notes[0].title, "Weather Error");
        assert!(notes[0].message.contains("503"));
    }

    #[test]
    fn error_keeps_previous_snapshot() {
        let (binder, view, notes, _rx) = binder(0);
        binder.apply(Ok(Some(reading(12.0, 200))));

        let applied = binder.apply(Err(ServiceError::with_message("insufficient access")));

        assert_eq!(applied, Applied::Failed);
        assert_eq!(view.lock().snapshot, Some(reading(12.0, 200)));
        let notes = notes.0.lock();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "Error loading weather");
        assert_eq!(notes[0].message, "insufficient access");
    }

    #[test]
    fn empty_delivery_changes_nothing() {
        let (binder, view, notes, rx) = binder(0);
        binder.apply(Ok(Some(reading(12.0, 200))));

        assert_eq!(binder.apply(Ok(None)), Applied::Empty);
        assert_eq!(view.lock().snapshot, Some(reading(12.0, 200)));
        assert!(notes.0.lock().is_empty());
        assert_eq!(*rx.borrow(), 2);
    }

    #[test]
    fn stale_generation_is_discarded() {
        let (binder, view, notes, rx) = binder(0);
        view.lock().generation = 1;

        assert_eq!(binder.apply(Ok(Some(reading(30.0, 503)))), Applied::Stale);
        assert_eq!(view.lock().snapshot, None);
        assert!(notes.0.lock().is_empty());
        assert_eq!(*rx.borrow(), 0);
    }

    #[tokio::test]
    async fn run_applies_feed_in_order() {
        let (binder, view, _notes, mut rx) = binder(0);
        let (tx, feed) = tokio::sync::mpsc::unbounded_channel();
        tx.send(Ok(Some(reading(1.0, 200)))).unwrap();
        tx.send(Ok(Some(reading(2.0, 200)))).unwrap();
        drop(tx);

        binder.run(feed).await;

        rx.wait_for(|rev| *rev == 2).await.unwrap();
        assert_eq!(view.lock().snapshot, Some(reading(2.0, 200)));
    }
}
