//! Typed catalog of domain events routed by the channel.
//!
//! Each known event name maps to one payload type with its own validation.
//! Unknown names pass through untouched as raw JSON so new server events
//! reach subscribers without a protocol release.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::PayloadError;

/// Known domain event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    DeviceTelemetry,
    DeviceStatus,
    Alert,
    SystemMetrics,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::DeviceTelemetry,
        EventKind::DeviceStatus,
        EventKind::Alert,
        EventKind::SystemMetrics,
    ];

    /// Wire name of the event.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::DeviceTelemetry => "device_telemetry",
            EventKind::DeviceStatus => "device_status",
            EventKind::Alert => "alert",
            EventKind::SystemMetrics => "system_metrics",
        }
    }

    /// Looks up a known event by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Electrical readings for one metering device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTelemetry {
    pub device_id: String,
    /// Volts.
    pub voltage: f64,
    /// Amperes.
    pub current: f64,
    /// Watts.
    pub power: f64,
    /// Kilowatt-hours.
    #[serde(default)]
    pub energy: f64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Connectivity of a device as seen by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Online,
    Offline,
    Fault,
    #[serde(other)]
    Unknown,
}

/// Connection-status change for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusUpdate {
    pub device_id: String,
    pub status: DeviceState,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// Alert raised (or resolved) by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertNotification {
    pub id: String,
    pub severity: AlertSeverity,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub resolved: bool,
    pub timestamp: i64,
}

/// Aggregate figures across the whole installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    #[serde(default)]
    pub active_devices: u32,
    #[serde(default)]
    pub total_power: f64,
    #[serde(default)]
    pub total_energy: f64,
    #[serde(default)]
    pub active_alerts: u32,
    pub timestamp: i64,
}

/// Validated payload of an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    DeviceTelemetry(DeviceTelemetry),
    DeviceStatus(DeviceStatusUpdate),
    Alert(AlertNotification),
    SystemMetrics(SystemMetrics),
    /// Event name outside the catalog; delivered as-is.
    Raw(serde_json::Value),
}

impl EventPayload {
    /// Returns the catalog entry, or `None` for raw payloads.
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            EventPayload::DeviceTelemetry(_) => Some(EventKind::DeviceTelemetry),
            EventPayload::DeviceStatus(_) => Some(EventKind::DeviceStatus),
            EventPayload::Alert(_) => Some(EventKind::Alert),
            EventPayload::SystemMetrics(_) => Some(EventKind::SystemMetrics),
            EventPayload::Raw(_) => None,
        }
    }
}

/// An inbound event after validation at the dispatch boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub payload: EventPayload,
}

impl Event {
    /// Validates `data` against the schema registered for `name`.
    ///
    /// Names outside the catalog are accepted as [`EventPayload::Raw`].
    pub fn decode(name: &str, data: serde_json::Value) -> Result<Self, PayloadError> {
        let payload = match EventKind::from_name(name) {
            Some(EventKind::DeviceTelemetry) => {
                let t: DeviceTelemetry = parse(EventKind::DeviceTelemetry, data)?;
                validate_telemetry(&t)?;
                EventPayload::DeviceTelemetry(t)
            }
            Some(EventKind::DeviceStatus) => {
                let s: DeviceStatusUpdate = parse(EventKind::DeviceStatus, data)?;
                require_non_empty(EventKind::DeviceStatus, "deviceId", &s.device_id)?;
                EventPayload::DeviceStatus(s)
            }
            Some(EventKind::Alert) => {
                let a: AlertNotification = parse(EventKind::Alert, data)?;
                require_non_empty(EventKind::Alert, "id", &a.id)?;
                require_non_empty(EventKind::Alert, "title", &a.title)?;
                EventPayload::Alert(a)
            }
            Some(EventKind::SystemMetrics) => {
                let m: SystemMetrics = parse(EventKind::SystemMetrics, data)?;
                require_finite(EventKind::SystemMetrics, "totalPower", m.total_power)?;
                require_finite(EventKind::SystemMetrics, "totalEnergy", m.total_energy)?;
                EventPayload::SystemMetrics(m)
            }
            None => EventPayload::Raw(data),
        };
        Ok(Self {
            name: name.to_string(),
            payload,
        })
    }

    /// Typed telemetry payload, if this is a `device_telemetry` event.
    pub fn as_telemetry(&self) -> Option<&DeviceTelemetry> {
        match &self.payload {
            EventPayload::DeviceTelemetry(t) => Some(t),
            _ => None,
        }
    }

    /// Typed alert payload, if this is an `alert` event.
    pub fn as_alert(&self) -> Option<&AlertNotification> {
        match &self.payload {
            EventPayload::Alert(a) => Some(a),
            _ => None,
        }
    }
}

fn parse<T: DeserializeOwned>(kind: EventKind, data: serde_json::Value) -> Result<T, PayloadError> {
    serde_json::from_value(data).map_err(|source| PayloadError::Malformed {
        event: kind.as_str(),
        source,
    })
}

fn require_non_empty(kind: EventKind, field: &str, value: &str) -> Result<(), PayloadError> {
    if value.trim().is_empty() {
        return Err(PayloadError::invalid(kind.as_str(), format!("{field} is empty")));
    }
    Ok(())
}

fn require_finite(kind: EventKind, field: &str, value: f64) -> Result<(), PayloadError> {
    if !value.is_finite() {
        return Err(PayloadError::invalid(kind.as_str(), format!("{field} is not finite")));
    }
    Ok(())
}

fn validate_telemetry(t: &DeviceTelemetry) -> Result<(), PayloadError> {
    let kind = EventKind::DeviceTelemetry;
    require_non_empty(kind, "deviceId", &t.device_id)?;
    require_finite(kind, "voltage", t.voltage)?;
    require_finite(kind, "current", t.current)?;
    require_finite(kind, "power", t.power)?;
    require_finite(kind, "energy", t.energy)?;
    if t.voltage < 0.0 {
        return Err(PayloadError::invalid(kind.as_str(), "voltage is negative"));
    }
    Ok(())
}
