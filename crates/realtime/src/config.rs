//! Connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use wattlink_protocol::constants::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL};

/// Errors from [`ConnectionConfig::validate`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("endpoint is empty")]
    EmptyEndpoint,

    #[error("endpoint must use ws:// or wss:// (got {0})")]
    UnsupportedScheme(String),

    #[error("base reconnection delay must be greater than zero")]
    ZeroBaseDelay,

    #[error("maximum reconnection delay ({max:?}) is below the base delay ({base:?})")]
    MaxBelowBase { base: Duration, max: Duration },

    #[error("backoff factor must be >= 1.0 (got {0})")]
    BackoffFactor(f64),

    #[error("jitter must be within [0.0, 1.0] (got {0})")]
    Jitter(f64),

    #[error("heartbeat interval must be greater than zero")]
    ZeroHeartbeat,
}

/// Immutable settings for one [`ConnectionManager`](crate::ConnectionManager).
///
/// Durations are (de)serialized as integer milliseconds
/// (`baseDelayMs`, `maxDelayMs`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    /// Event server URL (`ws://` or `wss://`).
    pub endpoint: String,
    /// Retry automatically after an unexpected disconnection.
    pub reconnection_enabled: bool,
    /// Retry ceiling; the attempt after this one reports exhaustion.
    pub max_reconnection_attempts: u32,
    /// Delay before the first retry.
    #[serde(rename = "baseDelayMs", with = "duration_ms")]
    pub base_delay: Duration,
    /// Upper bound for any single retry delay.
    #[serde(rename = "maxDelayMs", with = "duration_ms")]
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Relative jitter applied to each delay, 0.0 disables it.
    pub jitter: f64,
    #[serde(rename = "heartbeatIntervalMs", with = "duration_ms")]
    pub heartbeat_interval: Duration,
    #[serde(rename = "handshakeTimeoutMs", with = "duration_ms")]
    pub handshake_timeout: Duration,
    /// Whether a disconnect requested by the server is followed by
    /// automatic reconnection. Client `disconnect()` never is.
    pub reconnect_on_server_disconnect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:3001/realtime".into(),
            reconnection_enabled: true,
            max_reconnection_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter: 0.0,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            reconnect_on_server_disconnect: true,
        }
    }
}

impl ConnectionConfig {
    /// Creates a configuration for `endpoint` with default settings.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_reconnection(mut self, enabled: bool) -> Self {
        self.reconnection_enabled = enabled;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnection_attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration, factor: f64) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self.backoff_factor = factor;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_reconnect_on_server_disconnect(mut self, enabled: bool) -> Self {
        self.reconnect_on_server_disconnect = enabled;
        self
    }

    /// Checks the configuration for values the manager cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ConfigError::EmptyEndpoint);
        }
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            let scheme = endpoint.split("://").next().unwrap_or(endpoint);
            return Err(ConfigError::UnsupportedScheme(scheme.to_string()));
        }
        if self.base_delay.is_zero() {
            return Err(ConfigError::ZeroBaseDelay);
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::MaxBelowBase {
                base: self.base_delay,
                max: self.max_delay,
            });
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::BackoffFactor(self.backoff_factor));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Jitter(self.jitter));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroHeartbeat);
        }
        Ok(())
    }
}

/// Serde module for `Duration` stored as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ConnectionConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.reconnection_enabled);
        assert_eq!(config.max_reconnection_attempts, 5);
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn rejects_bad_endpoints() {
        assert_eq!(
            ConnectionConfig::new("  ").validate(),
            Err(ConfigError::EmptyEndpoint)
        );
        assert_eq!(
            ConnectionConfig::new("http://host/socket").validate(),
            Err(ConfigError::UnsupportedScheme("http".into()))
        );
        assert!(ConnectionConfig::new("wss://grid.example/rt").validate().is_ok());
    }

    #[test]
    fn rejects_bad_backoff() {
        let config = ConnectionConfig::default().with_backoff(Duration::ZERO, Duration::ZERO, 2.0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroBaseDelay));

        let config = ConnectionConfig::default().with_backoff(
            Duration::from_secs(5),
            Duration::from_secs(1),
            2.0,
        );
        assert!(matches!(config.validate(), Err(ConfigError::MaxBelowBase { .. })));

        let config = ConnectionConfig::default().with_backoff(
            Duration::from_secs(1),
            Duration::from_secs(2),
            0.5,
        );
        assert_eq!(config.validate(), Err(ConfigError::BackoffFactor(0.5)));

        let config = ConnectionConfig::default().with_jitter(1.5);
        assert_eq!(config.validate(), Err(ConfigError::Jitter(1.5)));
    }

    #[test]
    fn rejects_zero_heartbeat() {
        let config = ConnectionConfig::default().with_heartbeat(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroHeartbeat));
    }

    #[test]
    fn deserializes_millisecond_durations() {
        let json = r#"{
            "endpoint": "wss://grid.example/rt",
            "maxReconnectionAttempts": 3,
            "baseDelayMs": 500,
            "maxDelayMs": 4000
        }"#;
        let config: ConnectionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.endpoint, "wss://grid.example/rt");
        assert_eq!(config.max_reconnection_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(4));
        // Unspecified fields fall back to defaults.
        assert!(config.reconnection_enabled);
        assert_eq!(config.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
    }

    #[test]
    fn serializes_durations_as_millis() {
        let json = serde_json::to_value(ConnectionConfig::default()).unwrap();
        assert_eq!(json["baseDelayMs"], 1000);
        assert_eq!(json["maxDelayMs"], 10_000);
    }
}
