use std::time::Duration;

/// Maximum accepted size of a single text frame in bytes (1 MiB).
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Default interval between keepalive pings.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Read deadline as a multiple of the heartbeat interval.
///
/// If nothing at all arrives (no pong, no event) within
/// `heartbeat_interval * HEARTBEAT_TIMEOUT_FACTOR`, the link is dead.
pub const HEARTBEAT_TIMEOUT_FACTOR: u32 = 3;

/// Default bound on the auth handshake of a single connection attempt.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

/// Close code sent by the server when the session credential is revoked.
pub const CLOSE_CREDENTIAL_REVOKED: u16 = 4001;

/// Close code sent by the server when it shuts a session down on purpose.
pub const CLOSE_SERVER_SHUTDOWN: u16 = 4000;

/// Lifecycle events reserved by the channel itself.
///
/// These names never reach domain subscribers and cannot be emitted by
/// application code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Client → server: carries the credential.
    Auth,
    /// Server → client: handshake accepted.
    Connect,
    /// Server → client: handshake rejected.
    ConnectError,
    /// Either direction: orderly end of the session.
    Disconnect,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 4] = [
        LifecycleEvent::Auth,
        LifecycleEvent::Connect,
        LifecycleEvent::ConnectError,
        LifecycleEvent::Disconnect,
    ];

    /// Wire name of the lifecycle event.
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleEvent::Auth => "auth",
            LifecycleEvent::Connect => "connect",
            LifecycleEvent::ConnectError => "connect_error",
            LifecycleEvent::Disconnect => "disconnect",
        }
    }

    /// Looks up a lifecycle event by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == name)
    }
}

/// Returns `true` if `name` is reserved for the channel lifecycle.
pub fn is_reserved(name: &str) -> bool {
    LifecycleEvent::from_name(name).is_some()
}
