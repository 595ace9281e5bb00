//! Global shiftmirror configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer};

use crate::constants::{
    DEFAULT_FALLBACK_TITLE, DEFAULT_FETCH_TIMEOUT, DEFAULT_RELOAD_INTERVAL,
    DEFAULT_WINDOW_FUTURE_MONTHS, DEFAULT_WINDOW_PAST_MONTHS,
};
use crate::error::{MirrorError, MirrorResult};

static DEFAULT_DATA_DIR: &str = "~/.local/share/shiftmirror";
static DEFAULT_LISTEN: &str = "127.0.0.1:4097";

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_fetch_timeout() -> Duration {
    DEFAULT_FETCH_TIMEOUT
}

fn default_reload_interval() -> Duration {
    DEFAULT_RELOAD_INTERVAL
}

fn default_window_past_months() -> u32 {
    DEFAULT_WINDOW_PAST_MONTHS
}

fn default_window_future_months() -> u32 {
    DEFAULT_WINDOW_FUTURE_MONTHS
}

fn default_display_timezone() -> String {
    "UTC".to_string()
}

fn default_fallback_title() -> String {
    DEFAULT_FALLBACK_TITLE.to_string()
}

/// Accepts humantime strings such as `"10s"` or `"5m"`.
fn human_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// Configuration at ~/.config/shiftmirror/config.toml, overridable with `SHIFTMIRROR_*`
/// environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct MirrorConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_fetch_timeout", deserialize_with = "human_duration")]
    pub fetch_timeout: Duration,

    #[serde(default = "default_reload_interval", deserialize_with = "human_duration")]
    pub reload_interval: Duration,

    #[serde(default = "default_window_past_months")]
    pub window_past_months: u32,

    #[serde(default = "default_window_future_months")]
    pub window_future_months: u32,

    #[serde(default = "default_display_timezone")]
    pub display_timezone: String,

    #[serde(default = "default_fallback_title")]
    pub fallback_title: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        MirrorConfig {
            data_dir: default_data_dir(),
            listen: default_listen(),
            log_level: default_log_level(),
            fetch_timeout: default_fetch_timeout(),
            reload_interval: default_reload_interval(),
            window_past_months: default_window_past_months(),
            window_future_months: default_window_future_months(),
            display_timezone: default_display_timezone(),
            fallback_title: default_fallback_title(),
        }
    }
}

impl MirrorConfig {
    pub fn config_path() -> MirrorResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| MirrorError::Config("Could not determine config directory".into()))?
            .join("shiftmirror");

        Ok(config_dir.join("config.toml"))
    }

    pub fn load() -> MirrorResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> MirrorResult<Self> {
        let config: MirrorConfig = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(Environment::with_prefix("SHIFTMIRROR"))
            .build()
            .map_err(|e| MirrorError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| MirrorError::Config(e.to_string()))?;

        // Fail at startup rather than on the first sync.
        config.display_tz()?;

        Ok(config)
    }

    pub fn data_path(&self) -> PathBuf {
        let full_path_str = shellexpand::tilde(&self.data_dir.to_string_lossy()).into_owned();

        PathBuf::from(full_path_str)
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_path().join("store.json")
    }

    pub fn display_tz(&self) -> MirrorResult<Tz> {
        self.display_timezone.parse::<Tz>().map_err(|_| {
            MirrorError::Config(format!(
                "Unknown display_timezone '{}'",
                self.display_timezone
            ))
        })
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> MirrorResult<()> {
        let contents = format!(
            "\
# shiftmirror configuration

# Where mirrored calendars are stored:
# data_dir = \"{DEFAULT_DATA_DIR}\"

# Address the HTTP server binds to:
# listen = \"{DEFAULT_LISTEN}\"

# log_level = \"info\"

# Upper bound for a single feed download:
# fetch_timeout = \"10s\"

# How often the scheduler re-reads feed settings:
# reload_interval = \"5m\"

# Mirrored window relative to now:
# window_past_months = {DEFAULT_WINDOW_PAST_MONTHS}
# window_future_months = {DEFAULT_WINDOW_FUTURE_MONTHS}

# Time zone UTC event times are shown in:
# display_timezone = \"UTC\"
"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MirrorError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| MirrorError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }
}
