//! Transport abstraction between the manager and the wire.
//!
//! A [`Connector`] opens authenticated [`TransportLink`]s. Inbound traffic
//! and the end of a link are reported through an [`EventSink`] from the
//! task that read them, so state changes and dispatch happen in the same
//! task that detected the transport event.

pub mod memory;
pub mod ws;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Serialize;

use wattlink_protocol::Frame;

use crate::error::TransportError;

/// Authentication token supplied to `connect()`.
///
/// The token is only kept in memory for the session that uses it and is
/// never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the handshake only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// Why a link ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The client closed the link.
    ClientRequested,
    /// The server ended the session on purpose.
    ServerRequested,
    /// The server revoked the credential; retrying cannot succeed.
    CredentialRevoked,
    /// The stream ended without a close handshake.
    TransportClosed,
    /// A read or write failed.
    TransportError(String),
    /// Nothing arrived within the heartbeat deadline.
    HeartbeatTimeout,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::ClientRequested => f.write_str("client requested"),
            DisconnectReason::ServerRequested => f.write_str("server requested"),
            DisconnectReason::CredentialRevoked => f.write_str("credential revoked"),
            DisconnectReason::TransportClosed => f.write_str("transport closed"),
            DisconnectReason::TransportError(e) => write!(f, "transport error: {e}"),
            DisconnectReason::HeartbeatTimeout => f.write_str("heartbeat timeout"),
        }
    }
}

/// Something a link observed.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A domain event for an attached name.
    Inbound {
        event: String,
        data: serde_json::Value,
    },
    /// The link is gone. Reported at most once per link.
    Closed(DisconnectReason),
}

/// Receives [`TransportEvent`]s from a link.
pub type EventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Event names with at least one subscriber: the transport-level listeners.
///
/// Shared by the listener registry (which attaches and detaches names) and
/// every link of the manager (which drops inbound events for names that
/// are not attached).
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    names: Arc<Mutex<HashSet<String>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `event`; returns `false` if it was already attached.
    pub fn attach(&self, event: &str) -> bool {
        self.lock().insert(event.to_string())
    }

    /// Detaches `event`; returns `false` if it was not attached.
    pub fn detach(&self, event: &str) -> bool {
        self.lock().remove(event)
    }

    /// Detaches everything and returns how many names were attached.
    pub fn detach_all(&self) -> usize {
        let mut names = self.lock();
        let count = names.len();
        names.clear();
        count
    }

    pub fn is_attached(&self, event: &str) -> bool {
        self.lock().contains(event)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.names.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything a connector needs to open one link.
#[derive(Clone)]
pub struct OpenRequest {
    pub endpoint: String,
    pub credential: Credential,
    pub heartbeat_interval: Duration,
    pub handshake_timeout: Duration,
    pub routes: RouteTable,
    pub sink: EventSink,
}

/// An open, authenticated link.
pub trait TransportLink: Send + Sync {
    /// Queues a frame for sending without waiting.
    fn emit(&self, frame: Frame) -> Result<(), TransportError>;

    /// Closes the link. Idempotent.
    fn close(&self);

    /// Server-assigned session id, if the handshake returned one.
    fn session_id(&self) -> Option<String> {
        None
    }
}

/// Opens links to the event server.
pub trait Connector: Send + Sync + 'static {
    /// Connects and authenticates. Resolves once the server accepted
    /// (`connect`) or rejected (`connect_error`) the handshake.
    fn open(
        &self,
        request: OpenRequest,
    ) -> BoxFuture<'static, Result<Box<dyn TransportLink>, TransportError>>;
}
