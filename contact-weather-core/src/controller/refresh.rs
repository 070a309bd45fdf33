use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    error::extract_message,
    model::{Notification, RecordId, RefreshRequest},
    service::Services,
};

/// How a `refresh()` issued while another is in flight is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    /// The second call returns [`RefreshOutcome::Skipped`] without touching the service.
    #[default]
    SkipWhileBusy,
    /// Calls overlap; busy stays set until the last one settles.
    AllowConcurrent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The service accepted the request and a reload was requested.
    Requested,
    /// The service rejected the request; `message` was shown to the user.
    Failed { message: String },
    /// Another refresh was in flight.
    Skipped,
}

/// Holds one slot of the in-flight counter; releases it on drop.
#[derive(Debug)]
pub(crate) struct BusyGuard<'a> {
    in_flight: &'a watch::Sender<usize>,
}

impl<'a> BusyGuard<'a> {
    pub(crate) fn acquire(in_flight: &'a watch::Sender<usize>, policy: RefreshPolicy) -> Option<Self> {
        let mut acquired = false;
        in_flight.send_if_modified(|count| {
            if *count > 0 && policy == RefreshPolicy::SkipWhileBusy {
                return false;
            }
            *count += 1;
            acquired = true;
            true
        });
        acquired.then_some(Self { in_flight })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.send_modify(|count| *count = count.saturating_sub(1));
    }
}

pub(crate) async fn run_refresh(
    services: &Services,
    record_id: &RecordId,
    in_flight: &watch::Sender<usize>,
    policy: RefreshPolicy,
) -> RefreshOutcome {
    let Some(_busy) = BusyGuard::acquire(in_flight, policy) else {
        debug!(record_id = %record_id, "refresh already in flight; skipping");
        return RefreshOutcome::Skipped;
    };

    let request = RefreshRequest::for_record(record_id);
    match services.refresh.request_refresh(&request).await {
        Ok(()) => {
            info!(record_id = %record_id, "weather refresh requested");
            services
                .notifier
                .notify(Notification::success("Requested", "Weather refresh requested."));
            services.host.reload();
            RefreshOutcome::Requested
        }
        Err(err) => {
            let message = extract_message(&err);
            warn!(record_id = %record_id, error = %err, "weather refresh failed");
            services
                .notifier
                .notify(Notification::error("Error", message.clone()));
            RefreshOutcome::Failed { message }
        }
    }
}
