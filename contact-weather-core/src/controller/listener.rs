use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::{
    error::ServiceError,
    model::{ChangeEvent, RecordId},
    service::{ChangeChannel, ErrorHandler, ErrorHandlerId, EventHandler, SubscriptionId},
};

use super::{ControllerConfig, SharedView, ViewState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerPhase {
    #[default]
    Unsubscribed,
    Subscribing,
    Subscribed,
}

/// Verdict on one change event for a bound record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSignal {
    Relevant,
    MissingHeader,
    MissingContact,
    OtherRecord,
}

pub fn classify(event: &ChangeEvent, record_id: &RecordId) -> ChangeSignal {
    if event.header().is_none() {
        return ChangeSignal::MissingHeader;
    }
    match event.contact() {
        None => ChangeSignal::MissingContact,
        Some(contact) if contact == record_id.as_str() => ChangeSignal::Relevant,
        Some(_) => ChangeSignal::OtherRecord,
    }
}

/// A live change-channel subscription and its error handler, both released on drop.
#[derive(Debug)]
pub struct Subscription {
    channel: Arc<dyn ChangeChannel>,
    id: SubscriptionId,
    error_handler: ErrorHandlerId,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!(subscription = %self.id, "releasing change subscription");
        self.channel.unsubscribe(self.id);
        self.channel.remove_error_handler(self.error_handler);
    }
}

// Holds only a weak view: the channel owns the handler and must not keep the controller alive.
fn event_handler(view: Weak<parking_lot::Mutex<ViewState>>) -> EventHandler {
    Arc::new(move |event: ChangeEvent| {
        let Some(view) = view.upgrade() else {
            return;
        };
        let mut view = view.lock();

        match classify(&event, &view.record_id) {
            // Counted only; new data arrives through the host reload.
            ChangeSignal::Relevant => {
                view.relevant_changes += 1;
                debug!(record_id = %view.record_id, "weather snapshot changed upstream");
            }
            ignored => trace!(record_id = %view.record_id, ?ignored, "ignoring change event"),
        }
    })
}

/// Runs the subscribe handshake, moving `phase` through its states.
pub(crate) async fn subscribe(
    channel: &Arc<dyn ChangeChannel>,
    config: &ControllerConfig,
    view: &SharedView,
    phase: &watch::Sender<ListenerPhase>,
) -> Option<Subscription> {
    channel.set_debug(config.channel_debug);
    let swallow: ErrorHandler = Arc::new(|err: &ServiceError| trace!(error = %err, "change channel error"));
    let error_handler = channel.on_error(swallow);

    phase.send_replace(ListenerPhase::Subscribing);
    let handler = event_handler(Arc::downgrade(view));

    match channel.subscribe(&config.channel, config.replay, handler).await {
        Ok(id) => {
            debug!(channel = %config.channel, subscription = %id, "subscribed to change events");
            phase.send_replace(ListenerPhase::Subscribed);
            Some(Subscription {
                channel: channel.clone(),
                id,
                error_handler,
            })
        }
        Err(err) => {
            warn!(channel = %config.channel, error = %err, "change channel subscribe failed");
            channel.remove_error_handler(error_handler);
            phase.send_replace(ListenerPhase::Unsubscribed);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChangeEventData, ChangeEventHeader, ChangePayload};

    fn event(header: bool, contact: Option<&str>) -> ChangeEvent {
        ChangeEvent {
            data: Some(ChangeEventData {
                change_event_header: header.then(ChangeEventHeader::default),
                payload: Some(ChangePayload {
                    contact: contact.map(str::to_string),
                }),
            }),
        }
    }

    #[test]
    fn classify_filters_by_header_and_contact() {
        let id = RecordId::new("003A");

        assert_eq!(classify(&event(true, Some("003A")), &id), ChangeSignal::Relevant);
        assert_eq!(classify(&event(true, Some("003B")), &id), ChangeSignal::OtherRecord);
        assert_eq!(classify(&event(true, None), &id), ChangeSignal::MissingContact);
        assert_eq!(classify(&event(false, Some("003A")), &id), ChangeSignal::MissingHeader);
        assert_eq!(classify(&ChangeEvent::default(), &id), ChangeSignal::MissingHeader);
    }

    #[test]
    fn handler_outliving_view_is_inert() {
        let view = Arc::new(parking_lot::Mutex::new(ViewState::new(RecordId::new("003A"))));
        let handler = event_handler(Arc::downgrade(&view));
        drop(view);

        handler(ChangeEvent::for_contact(&RecordId::new("003A")));
    }
}
