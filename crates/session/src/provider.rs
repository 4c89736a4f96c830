//! Provider and per-session context.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use wattlink_realtime::{
    ConfigError, ConnectionConfig, ConnectionManager, ConnectionState, Connector, Credential,
    Event, RealtimeError, StateChange, WsConnector,
};

use crate::hooks::{ConnectionStatusHook, EventHook, StateHook};

/// Creates connection managers for sessions.
///
/// Holds no connection itself; every [`open_session`] call builds a fresh
/// manager, so sessions never share listeners, timers or credentials.
///
/// [`open_session`]: RealtimeProvider::open_session
#[derive(Clone)]
pub struct RealtimeProvider {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
}

impl RealtimeProvider {
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, connector })
    }

    /// Provider whose sessions connect over WebSocket.
    pub fn websocket(config: ConnectionConfig) -> Result<Self, ConfigError> {
        Self::new(config, Arc::new(WsConnector::default()))
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Starts a new, disconnected session.
    pub fn open_session(&self) -> Result<SessionContext, ConfigError> {
        let manager = ConnectionManager::new(self.config.clone(), self.connector.clone())?;
        let id = uuid::Uuid::new_v4().to_string();
        debug!(session = %id, "session opened");
        Ok(SessionContext {
            inner: Arc::new(SessionInner { id, manager }),
        })
    }
}

struct SessionInner {
    id: String,
    manager: ConnectionManager,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        debug!(session = %self.id, "session dropped, disconnecting");
        self.manager.disconnect();
    }
}

/// One user session. Clones share the session; the connection is torn
/// down when the last clone is dropped or [`end`](SessionContext::end) is
/// called.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.inner.id)
            .field("manager", &self.inner.manager)
            .finish()
    }
}

impl SessionContext {
    /// Local id of this session (not the server session id).
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The session's manager, for anything the hooks do not cover.
    pub fn manager(&self) -> &ConnectionManager {
        &self.inner.manager
    }

    /// Connects with the user's credential (login).
    pub async fn start(&self, credential: impl Into<Credential>) -> Result<(), RealtimeError> {
        info!(session = %self.inner.id, "starting realtime session");
        self.inner.manager.connect(credential).await
    }

    /// Disconnects and releases every subscription (logout).
    pub fn end(&self) {
        info!(session = %self.inner.id, "ending realtime session");
        self.inner.manager.disconnect();
    }

    /// Subscribes to `event` until the returned hook is dropped.
    pub fn use_event<F>(&self, event: &str, callback: F) -> EventHook
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.inner.manager.listen(event, callback);
        EventHook::new(self.inner.manager.clone(), event, id)
    }

    /// Current connection state plus change notifications.
    pub fn use_connection_status(&self) -> ConnectionStatusHook {
        ConnectionStatusHook::new(self.inner.manager.state_changes())
    }

    /// Observes every transition until the returned hook is dropped.
    pub fn use_state_observer<F>(&self, callback: F) -> StateHook
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        let id = format!("hook-{}", uuid::Uuid::new_v4());
        self.inner.manager.subscribe_to_state(id.clone(), callback);
        StateHook::new(self.inner.manager.clone(), id)
    }

    pub fn emit<T: Serialize>(&self, event: &str, payload: &T) -> Result<(), RealtimeError> {
        self.inner.manager.emit(event, payload)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.manager.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.manager.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wattlink_realtime::{DisconnectReason, MemoryServer};

    use super::*;

    fn provider(server: &MemoryServer) -> RealtimeProvider {
        RealtimeProvider::new(ConnectionConfig::default(), Arc::new(server.connector())).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_get_independent_managers() {
        let server = MemoryServer::new();
        let provider = provider(&server);
        let a = provider.open_session().unwrap();
        let b = provider.open_session().unwrap();
        assert_ne!(a.id(), b.id());

        a.manager().listen("alert", |_| {});
        assert_eq!(a.manager().memory_stats().total_listeners, 1);
        assert_eq!(b.manager().memory_stats().total_listeners, 0);

        a.start("valid-token").await.unwrap();
        assert!(a.is_connected());
        assert!(!b.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_last_clone_ends_session() {
        let server = MemoryServer::new();
        let session = provider(&server).open_session().unwrap();
        let manager = session.manager().clone();
        let clone = session.clone();
        session.start("valid-token").await.unwrap();

        drop(session);
        assert!(manager.is_connected());
        drop(clone);
        assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
        assert!(!server.has_live_link());
    }

    #[tokio::test(start_paused = true)]
    async fn end_releases_everything() {
        let server = MemoryServer::new();
        let session = provider(&server).open_session().unwrap();
        let _alerts = session.use_event("alert", |_| {});
        session.start("valid-token").await.unwrap();
        server.drop_link(DisconnectReason::TransportClosed);

        session.end();
        assert!(session.manager().memory_stats().is_drained());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(server.attempts(), 1);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let server = MemoryServer::new();
        let config = ConnectionConfig::default().with_heartbeat(Duration::ZERO);
        assert!(RealtimeProvider::new(config, Arc::new(server.connector())).is_err());
    }
}
