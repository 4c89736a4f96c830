//! Real-time connection manager for the wattlink dashboard.
//!
//! Keeps one persistent, authenticated event channel per session: owns the
//! connection state machine, reconnects with exponential backoff, routes
//! inbound events to registered listeners and guarantees that teardown
//! leaves no listener or timer behind.

pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;
pub(crate) mod reconnection;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod transport;

pub use config::{ConfigError, ConnectionConfig};
pub use error::{RealtimeError, TransportError};
pub use manager::ConnectionManager;
pub use metrics::ConnectionMetrics;
pub use registry::{Listener, MemoryStats, SubscriptionId};
pub use scheduler::ReconnectScheduler;
pub use state::{ConnectionState, StateChange, StateObserver, StateReason};
pub use transport::memory::{HandshakeOutcome, MemoryConnector, MemoryServer};
pub use transport::ws::{WsConnector, WsLink};
pub use transport::{Connector, Credential, DisconnectReason, TransportEvent, TransportLink};

pub use wattlink_protocol::{Event, EventKind, EventPayload};
