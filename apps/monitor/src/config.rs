//! Monitor configuration.
//!
//! Read from `$WATTLINK_CONFIG`, or `~/.config/wattlink/monitor.json` when
//! unset. `WATTLINK_ENDPOINT` and `WATTLINK_TOKEN` override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use wattlink_realtime::{ConfigError, ConnectionConfig};

const DEFAULT_EVENTS: [&str; 4] = ["device_telemetry", "device_status", "alert", "system_metrics"];

/// On-disk shape of `monitor.json`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonitorFile {
    #[serde(default)]
    connection: Option<ConnectionConfig>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    events: Vec<String>,
    #[serde(default)]
    stats_interval_secs: Option<u64>,
}

#[derive(Clone)]
pub struct MonitorConfig {
    pub connection: ConnectionConfig,
    /// Credential for the event server. Never logged.
    pub token: Option<String>,
    /// Event names to subscribe to.
    pub events: Vec<String>,
    /// How often connection health is logged.
    pub stats_interval: Duration,
}

impl std::fmt::Debug for MonitorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorConfig")
            .field("connection", &self.connection)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("events", &self.events)
            .field("stats_interval", &self.stats_interval)
            .finish()
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            token: None,
            events: DEFAULT_EVENTS.iter().map(|e| e.to_string()).collect(),
            stats_interval: Duration::from_secs(30),
        }
    }
}

impl MonitorConfig {
    /// Loads the config file (if any) and applies environment overrides.
    ///
    /// A missing or unreadable file falls back to defaults; an invalid
    /// resulting connection config is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match config_path() {
            Ok(path) => read_file(&path),
            Err(e) => {
                tracing::warn!("cannot locate monitor config ({e}), using defaults");
                None
            }
        };
        Self::resolve(
            file,
            std::env::var("WATTLINK_ENDPOINT").ok(),
            std::env::var("WATTLINK_TOKEN").ok(),
        )
    }

    fn resolve(
        file: Option<MonitorFile>,
        endpoint: Option<String>,
        token: Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = MonitorConfig::default();
        if let Some(file) = file {
            config.apply_file(file);
        }
        config.apply_env(endpoint, token);
        config.connection.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: MonitorFile) {
        if let Some(connection) = file.connection {
            self.connection = connection;
        }
        if file.token.as_deref().is_some_and(|t| !t.is_empty()) {
            self.token = file.token;
        }
        if !file.events.is_empty() {
            self.events = file.events;
        }
        if let Some(secs) = file.stats_interval_secs.filter(|s| *s > 0) {
            self.stats_interval = Duration::from_secs(secs);
        }
    }

    fn apply_env(&mut self, endpoint: Option<String>, token: Option<String>) {
        if let Some(endpoint) = endpoint.filter(|e| !e.is_empty()) {
            self.connection.endpoint = endpoint;
        }
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.token = Some(token);
        }
    }
}

fn read_file(path: &Path) -> Option<MonitorFile> {
    if !path.exists() {
        return None;
    }
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(path = %path.display(), "failed to read monitor config ({e}), using defaults");
            return None;
        }
    };
    match serde_json::from_str::<MonitorFile>(&content) {
        Ok(file) => Some(file),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                "failed to parse monitor config ({e}), using defaults"
            );
            None
        }
    }
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("WATTLINK_CONFIG")
        && !path.is_empty()
    {
        return Ok(PathBuf::from(path));
    }
    Ok(config_base_dir()?.join("wattlink").join("monitor.json"))
}

fn config_base_dir() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA")
            .map_err(|_| anyhow::anyhow!("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home).join(".config"))
    }
}
