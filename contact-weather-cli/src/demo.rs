//! Offline walkthrough of mount, refresh and reload using in-memory services.

use async_trait::async_trait;
use chrono::Utc;
use contact_weather_core::{
    ChangeEvent, ControllerConfig, RecordId, RefreshService, ServiceError, Snapshot,
    backend::{MemoryChangeBus, MemorySnapshots},
    model::RefreshRequest,
};
use std::sync::Arc;

/// Plays the backend job: each refresh stores a warmer reading and announces it.
#[derive(Debug)]
pub struct SimulatedRefresh {
    pub snapshots: Arc<MemorySnapshots>,
    pub bus: Arc<MemoryChangeBus>,
    pub channel: String,
}

#[async_trait]
impl RefreshService for SimulatedRefresh {
    async fn request_refresh(&self, request: &RefreshRequest) -> Result<(), ServiceError> {
        let record_id = RecordId::new(request.contact_id.clone());
        if record_id.as_str().is_empty() {
            return Err(ServiceError::with_message("Contact id is required."));
        }

        let previous = self
            .snapshots
            .latest(&record_id)
            .and_then(|s| s.temperature_c)
            .unwrap_or(15.0);

        self.snapshots.publish(
            &record_id,
            Snapshot {
                temperature_c: Some(previous + 1.5),
                captured_at: Some(Utc::now().into()),
                provider_response: Some(200),
            },
        );
        self.bus
            .publish(&self.channel, ChangeEvent::for_contact(&record_id));
        Ok(())
    }
}

pub fn demo_config(base: ControllerConfig) -> ControllerConfig {
    ControllerConfig {
        change_events_enabled: true,
        ..base
    }
}
