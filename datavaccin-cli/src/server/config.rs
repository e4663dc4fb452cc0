use std::env;
use std::time::Duration;

use datavaccin_lib::remote::DEFAULT_BASE_URL;
use datavaccin_lib::{DuplicatePolicy, WeekId, DATASET_ID};
use serde::Deserialize;
use tracing::warn;

use super::scheduler::MAX_INTERVAL;

pub const DEFAULT_CONFIG_PATH: &str = "datavaccin.toml";

/// Top-level datavaccin.toml configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct DvConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_file")]
    pub data_file: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub write_tokens: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefreshConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_start_week")]
    pub start_week: WeekId,
    #[serde(default)]
    pub duplicates: DuplicatePolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_dataset")]
    pub dataset: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// ── Default value functions ──────────────────────────

fn default_hostname() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_file() -> String {
    "data.json".to_string()
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_start_week() -> WeekId {
    WeekId::new(2022, 9).expect("2022-09 is a valid week")
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_dataset() -> String {
    DATASET_ID.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: default_port(),
            data_file: default_data_file(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_secs: default_interval_secs(),
            start_week: default_start_week(),
            duplicates: DuplicatePolicy::default(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            dataset: default_dataset(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RefreshConfig {
    /// Tick period, between one second and [`MAX_INTERVAL`].
    pub fn interval(&self) -> Duration {
        let interval = Duration::from_secs(self.interval_secs.max(1));
        if interval > MAX_INTERVAL {
            warn!(
                interval_secs = self.interval_secs,
                max_secs = MAX_INTERVAL.as_secs(),
                "refresh interval too long, capping it"
            );
            return MAX_INTERVAL;
        }
        interval
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DvConfig {
    /// Load configuration from a TOML file, falling back to defaults if the file
    /// doesn't exist or cannot be parsed.
    pub fn load(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                warn!(path, error = %e, "failed to parse config, using defaults");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("DV_HOSTNAME") {
            self.server.hostname = val;
        }

        if let Some(val) = lookup("DV_PORT") {
            match val.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(value = %val, "ignoring invalid DV_PORT"),
            }
        }

        if let Some(val) = lookup("DV_DATA_FILE") {
            self.server.data_file = val;
        }

        // DV_WRITE_TOKENS, comma separated
        if let Some(val) = lookup("DV_WRITE_TOKENS") {
            self.auth.write_tokens = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Some(val) = lookup("DV_REFRESH_ENABLED") {
            match val.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.refresh.enabled = true,
                "0" | "false" | "no" | "off" => self.refresh.enabled = false,
                other => warn!(value = other, "ignoring invalid DV_REFRESH_ENABLED"),
            }
        }

        if let Some(val) = lookup("DV_REFRESH_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => self.refresh.interval_secs = secs,
                Err(_) => warn!(value = %val, "ignoring invalid DV_REFRESH_INTERVAL_SECS"),
            }
        }

        if let Some(val) = lookup("DV_REFRESH_START_WEEK") {
            match val.parse::<WeekId>() {
                Ok(week) => self.refresh.start_week = week,
                Err(e) => warn!(error = %e, "ignoring invalid DV_REFRESH_START_WEEK"),
            }
        }

        if let Some(val) = lookup("DV_REMOTE_URL") {
            self.remote.base_url = val;
        }
    }
}
