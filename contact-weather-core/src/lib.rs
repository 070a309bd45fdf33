//! Core library for the `contact-weather` host.
//!
//! This crate defines:
//! - The contact weather controller (snapshot binding, refresh, change listening)
//! - Service traits for the collaborators the controller consumes
//! - Shared domain models and display formatting
//! - Configuration handling and HTTP / in-memory backends
//!
//! It is used by `contact-weather-cli`, but any host that can implement
//! [`Notifier`] and [`HostReload`] can embed the controller.

pub mod backend;
pub mod config;
pub mod controller;
pub mod display;
pub mod error;
pub mod model;
pub mod service;

pub use config::{BackendConfig, Config};
pub use controller::{
    ContactWeather, ControllerConfig, ListenerPhase, RefreshOutcome, RefreshPolicy,
};
pub use display::DisplayZone;
pub use error::{ErrorBody, ServiceError, extract_message};
pub use model::{CapturedAt, ChangeEvent, Notification, RecordId, Severity, Snapshot};
pub use service::{
    ChangeChannel, HostReload, Notifier, RefreshService, ReplayPosition, Services, SnapshotQuery,
};
