use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    controller::{ControllerConfig, DEFAULT_CHANNEL, RefreshPolicy},
    display::DisplayZone,
    service::ReplayPosition,
};

/// Where the snapshot, refresh and change-event endpoints live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeEventsConfig {
    /// Whether real-time change notifications are available in this environment.
    pub enabled: bool,
    pub channel: String,
    pub debug: bool,
}

impl Default for ChangeEventsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel: DEFAULT_CHANNEL.to_string(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Fixed offset east of UTC for capture times; local time when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub allow_concurrent: bool,
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// [backend]
/// base_url = "https://example.my.site.com/services/apexrest/weather"
///
/// [change_events]
/// enabled = true
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendConfig>,
    #[serde(default)]
    pub change_events: ChangeEventsConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

impl Config {
    /// Backend settings, or an error telling the user how to provide them.
    pub fn backend(&self) -> Result<&BackendConfig> {
        self.backend.as_ref().ok_or_else(|| {
            anyhow!(
                "No backend configured.\n\
                 Hint: run `contact-weather configure` and enter the service URL."
            )
        })
    }

    pub fn set_backend(&mut self, base_url: String, access_token: Option<String>) {
        self.backend = Some(BackendConfig {
            base_url,
            access_token,
        });
    }

    pub fn display_zone(&self) -> Result<DisplayZone> {
        match self.display.utc_offset_minutes {
            None => Ok(DisplayZone::Local),
            Some(minutes) => DisplayZone::from_offset_minutes(minutes).ok_or_else(|| {
                anyhow!("Invalid display.utc_offset_minutes {minutes}: must be within +/- 1439.")
            }),
        }
    }

    /// Settings handed to every controller built from this configuration.
    pub fn controller_config(&self) -> Result<ControllerConfig> {
        Ok(ControllerConfig {
            change_events_enabled: self.change_events.enabled,
            channel: self.change_events.channel.clone(),
            channel_debug: self.change_events.debug,
            replay: ReplayPosition::Newest,
            display_zone: self.display_zone()?,
            refresh_policy: if self.refresh.allow_concurrent {
                RefreshPolicy::AllowConcurrent
            } else {
                RefreshPolicy::SkipWhileBusy
            },
        })
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "contact-weather", "contact-weather")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }
}
