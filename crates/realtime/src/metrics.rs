//! Connection counters and timings exposed through `ConnectionManager::metrics`.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Cumulative connection counters for diagnostics views.
///
/// Lives as long as the manager; never reset.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetrics {
    pub events_received: u64,
    pub events_sent: u64,
    /// Inbound events dropped because their payload failed validation.
    pub invalid_payloads: u64,
    /// Listener or observer invocations that panicked.
    pub listener_failures: u64,
    /// Successful handshakes, including reconnections.
    pub connections: u64,
    /// Successful handshakes that followed a lost connection.
    pub reconnections: u64,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_disconnected_at: Option<DateTime<Utc>>,
    /// Total time spent connected, including the current session.
    pub connected_ms: u64,
    pub last_error: Option<String>,
    #[serde(skip)]
    session_started: Option<Instant>,
}

impl ConnectionMetrics {
    pub(crate) fn record_connected(&mut self, reconnected: bool) {
        self.connections += 1;
        if reconnected {
            self.reconnections += 1;
        }
        self.last_connected_at = Some(Utc::now());
        self.session_started = Some(Instant::now());
    }

    pub(crate) fn record_disconnected(&mut self) {
        if let Some(started) = self.session_started.take() {
            self.connected_ms = self.connected_ms.saturating_add(millis(started.elapsed()));
            self.last_disconnected_at = Some(Utc::now());
        }
    }

    pub(crate) fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    /// Copy with the running session folded into `connected_ms`.
    pub fn snapshot(&self) -> ConnectionMetrics {
        let mut snap = self.clone();
        if let Some(started) = self.session_started {
            snap.connected_ms = snap.connected_ms.saturating_add(millis(started.elapsed()));
        }
        snap
    }

    /// Whether a connected session is currently being timed.
    pub fn is_timing_session(&self) -> bool {
        self.session_started.is_some()
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
