use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use contact_weather_core::{
    Config, ContactWeather, ControllerConfig, RecordId, RefreshOutcome, Services, Snapshot,
    backend::{HttpBackend, MemoryChangeBus, MemorySnapshots},
    model::CapturedAt,
};
use inquire::{Confirm, Password, Text};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::debug;

use crate::{
    demo::{SimulatedRefresh, demo_config},
    host::{TerminalHost, print_view},
};

const FIRST_DELIVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "contact-weather", version, about = "Weather for a contact record")]
pub struct Cli {
    /// Use this config file instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure the backend and display settings.
    Configure,

    /// Show the latest weather snapshot for a contact.
    Show {
        /// Contact record id, e.g. "003000000000001".
        record_id: String,
    },

    /// Request a weather refresh for a contact and show the reloaded snapshot.
    Refresh {
        /// Contact record id.
        record_id: String,
    },

    /// Run the mount / refresh / reload cycle against in-memory services.
    Demo {
        #[arg(long, default_value = "003000000000001")]
        record_id: String,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };

        match self.command {
            Command::Configure => configure(config, self.config),
            Command::Show { record_id } => {
                let host = Arc::new(TerminalHost::default());
                let services = http_services(&config, host.clone())?;
                let ctrl = mounted(record_id.into(), services, config.controller_config()?).await?;
                print_view(&ctrl);
                Ok(())
            }
            Command::Refresh { record_id } => {
                let host = Arc::new(TerminalHost::default());
                let services = http_services(&config, host.clone())?;
                refresh_cycle(record_id.into(), services, config.controller_config()?, &host).await
            }
            Command::Demo { record_id } => {
                let host = Arc::new(TerminalHost::default());
                let controller_config = demo_config(config.controller_config()?);
                let record_id = RecordId::from(record_id);

                let snapshots = Arc::new(MemorySnapshots::new());
                let bus = Arc::new(MemoryChangeBus::new());
                snapshots.publish(
                    &record_id,
                    Snapshot {
                        temperature_c: Some(15.0),
                        captured_at: Some(CapturedAt::from(chrono::Utc::now())),
                        provider_response: Some(200),
                    },
                );

                let services = Services {
                    snapshots: snapshots.clone(),
                    refresh: Arc::new(SimulatedRefresh {
                        snapshots: snapshots.clone(),
                        bus: bus.clone(),
                        channel: controller_config.channel.clone(),
                    }),
                    changes: bus,
                    notifier: host.clone(),
                    host: host.clone(),
                };
                refresh_cycle(record_id, services, controller_config, &host).await
            }
        }
    }
}

fn http_services(config: &Config, host: Arc<TerminalHost>) -> Result<Services> {
    let backend = Arc::new(HttpBackend::from_config(config.backend()?));
    Ok(Services {
        snapshots: backend.clone(),
        refresh: backend.clone(),
        changes: backend,
        notifier: host.clone(),
        host,
    })
}

/// Mounts a controller and waits until its first delivery has been applied.
async fn mounted(
    record_id: RecordId,
    services: Services,
    config: ControllerConfig,
) -> Result<ContactWeather> {
    let mut ctrl = ContactWeather::new(record_id, services, config);
    ctrl.mount().await;

    let mut revision = ctrl.revision_watch();
    tokio::time::timeout(FIRST_DELIVERY_TIMEOUT, revision.wait_for(|rev| *rev >= 1))
        .await
        .map_err(|_| anyhow!("Timed out waiting for the weather snapshot"))?
        .context("Snapshot binding closed before delivering")?;

    Ok(ctrl)
}

async fn refresh_cycle(
    record_id: RecordId,
    services: Services,
    config: ControllerConfig,
    host: &TerminalHost,
) -> Result<()> {
    let ctrl = mounted(record_id.clone(), services.clone(), config.clone()).await?;
    print_view(&ctrl);

    let outcome = ctrl.refresh().await;
    debug!(?outcome, "refresh settled");

    if host.take_reload() {
        // A reload rebuilds the controller from scratch, like a page reload.
        drop(ctrl);
        let ctrl = mounted(record_id, services, config).await?;
        println!();
        print_view(&ctrl);
    }

    match outcome {
        RefreshOutcome::Failed { message } => Err(anyhow!("Weather refresh failed: {message}")),
        RefreshOutcome::Requested | RefreshOutcome::Skipped => Ok(()),
    }
}

fn configure(mut config: Config, path: Option<PathBuf>) -> Result<()> {
    let current_url = config
        .backend
        .as_ref()
        .map(|b| b.base_url.clone())
        .unwrap_or_default();

    let base_url = Text::new("Backend base URL:")
        .with_initial_value(&current_url)
        .prompt()
        .context("Failed to read backend URL")?;
    if base_url.trim().is_empty() {
        return Err(anyhow!("Backend base URL must not be empty."));
    }

    let token = Password::new("Access token (leave empty for none):")
        .without_confirmation()
        .prompt()
        .context("Failed to read access token")?;
    let token = (!token.trim().is_empty()).then(|| token.trim().to_string());

    let enabled = Confirm::new("Enable real-time change events?")
        .with_default(config.change_events.enabled)
        .prompt()
        .context("Failed to read change events choice")?;

    let offset = Text::new("Display UTC offset in minutes (empty for local time):")
        .prompt()
        .context("Failed to read display offset")?;
    let offset = match offset.trim() {
        "" => None,
        raw => Some(
            raw.parse::<i32>()
                .with_context(|| format!("Invalid offset '{raw}': expected whole minutes"))?,
        ),
    };

    config.set_backend(base_url.trim().to_string(), token);
    config.change_events.enabled = enabled;
    config.display.utc_offset_minutes = offset;
    config.display_zone()?;

    match &path {
        Some(path) => config.save_to(path)?,
        None => config.save()?,
    }

    let shown = match path {
        Some(path) => path,
        None => Config::config_file_path()?,
    };
    println!("Saved configuration to {}", shown.display());
    Ok(())
}
