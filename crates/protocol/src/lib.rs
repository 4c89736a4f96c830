//! Wire protocol for the wattlink real-time channel.
//!
//! Defines the JSON frame envelope exchanged with the event server, the
//! reserved lifecycle event names, and the typed catalog of domain events
//! (device telemetry, device status, alerts, system metrics).

pub mod constants;
pub mod error;
pub mod events;
pub mod frame;

// Re-export primary types for convenience.
pub use constants::LifecycleEvent;
pub use error::{PayloadError, ProtocolError};
pub use events::{
    AlertNotification, AlertSeverity, DeviceState, DeviceStatusUpdate, DeviceTelemetry, Event,
    EventKind, EventPayload, SystemMetrics,
};
pub use frame::{AuthPayload, ConnectErrorPayload, ConnectedPayload, Frame};
