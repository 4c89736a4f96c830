//! In-process transport for tests and offline demos.
//!
//! A [`MemoryServer`] plays the event server: it scripts handshake
//! outcomes, pushes events to the current link, drops links on demand and
//! records every frame the client emits.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use tracing::{debug, trace};

use wattlink_protocol::Frame;

use crate::error::TransportError;
use crate::transport::{
    Connector, DisconnectReason, EventSink, OpenRequest, RouteTable, TransportEvent, TransportLink,
};

/// How the server answers one handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Accept,
    /// `connect_error` with kind `auth`.
    RejectAuth(String),
    /// Transient failure, e.g. the server is unreachable.
    Fail(String),
    /// Never answers.
    Hang,
}

struct LiveLink {
    id: u64,
    routes: RouteTable,
    sink: EventSink,
    closed: Arc<AtomicBool>,
}

struct ServerState {
    default_outcome: HandshakeOutcome,
    scripted: VecDeque<HandshakeOutcome>,
    denied_tokens: HashSet<String>,
    attempts: u32,
    next_link: u64,
    live: Option<LiveLink>,
    emitted: Vec<(String, serde_json::Value)>,
}

/// Fake event server. Clones share state.
#[derive(Clone)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServer {
    /// A server that accepts every handshake.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState {
                default_outcome: HandshakeOutcome::Accept,
                scripted: VecDeque::new(),
                denied_tokens: HashSet::new(),
                attempts: 0,
                next_link: 0,
                live: None,
                emitted: Vec::new(),
            })),
        }
    }

    /// Connector that opens links to this server.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            state: self.state.clone(),
        }
    }

    /// Outcome used once the scripted queue is empty.
    pub fn set_default_outcome(&self, outcome: HandshakeOutcome) {
        self.lock().default_outcome = outcome;
    }

    /// Queues the outcome of the next unscripted handshake.
    pub fn script(&self, outcome: HandshakeOutcome) {
        self.lock().scripted.push_back(outcome);
    }

    /// Rejects every handshake presenting `token` as an auth failure.
    pub fn deny_token(&self, token: &str) {
        self.lock().denied_tokens.insert(token.to_string());
    }

    /// Pushes an event to the live link. Returns `false` when there is no
    /// live link or nobody on it listens for `event`.
    pub fn push(&self, event: &str, data: serde_json::Value) -> bool {
        let sink = {
            let state = self.lock();
            match &state.live {
                Some(live) if live.routes.is_attached(event) => live.sink.clone(),
                Some(_) => {
                    trace!(event, "no transport listener, dropping push");
                    return false;
                }
                None => return false,
            }
        };
        sink(TransportEvent::Inbound {
            event: event.to_string(),
            data,
        });
        true
    }

    /// Ends the live link from the server side.
    pub fn drop_link(&self, reason: DisconnectReason) -> bool {
        let Some(live) = self.lock().live.take() else {
            return false;
        };
        live.closed.store(true, Ordering::SeqCst);
        debug!(link = live.id, %reason, "server dropping link");
        (live.sink)(TransportEvent::Closed(reason));
        true
    }

    /// `(event, data)` of every frame emitted by clients, oldest first.
    pub fn emitted(&self) -> Vec<(String, serde_json::Value)> {
        self.lock().emitted.clone()
    }

    /// Handshakes attempted so far.
    pub fn attempts(&self) -> u32 {
        self.lock().attempts
    }

    pub fn has_live_link(&self) -> bool {
        self.lock().live.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// [`Connector`] for a [`MemoryServer`].
#[derive(Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<ServerState>>,
}

impl Connector for MemoryConnector {
    fn open(
        &self,
        request: OpenRequest,
    ) -> BoxFuture<'static, Result<Box<dyn TransportLink>, TransportError>> {
        let state = self.state.clone();
        Box::pin(async move {
            let outcome = {
                let mut s = state.lock().unwrap_or_else(PoisonError::into_inner);
                s.attempts += 1;
                if s.denied_tokens.contains(request.credential.expose()) {
                    HandshakeOutcome::RejectAuth("invalid token".into())
                } else {
                    s.scripted
                        .pop_front()
                        .unwrap_or_else(|| s.default_outcome.clone())
                }
            };
            trace!(?outcome, "memory handshake");

            match outcome {
                HandshakeOutcome::Accept => {
                    let mut s = state.lock().unwrap_or_else(PoisonError::into_inner);
                    s.next_link += 1;
                    let id = s.next_link;
                    let closed = Arc::new(AtomicBool::new(false));
                    if let Some(previous) = s.live.replace(LiveLink {
                        id,
                        routes: request.routes,
                        sink: request.sink,
                        closed: closed.clone(),
                    }) {
                        previous.closed.store(true, Ordering::SeqCst);
                    }
                    drop(s);
                    Ok(Box::new(MemoryLink {
                        id,
                        state: state.clone(),
                        closed,
                    }) as Box<dyn TransportLink>)
                }
                HandshakeOutcome::RejectAuth(message) => Err(TransportError::Auth(message)),
                HandshakeOutcome::Fail(message) => Err(TransportError::Refused(message)),
                HandshakeOutcome::Hang => futures_util::future::pending().await,
            }
        })
    }
}

struct MemoryLink {
    id: u64,
    state: Arc<Mutex<ServerState>>,
    closed: Arc<AtomicBool>,
}

impl TransportLink for MemoryLink {
    fn emit(&self, frame: Frame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let data = frame
            .data_value()
            .map_err(wattlink_protocol::ProtocolError::from)?;
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .emitted
            .push((frame.event, data));
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut s = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if s.live.as_ref().is_some_and(|live| live.id == self.id) {
            s.live = None;
        }
    }

    fn session_id(&self) -> Option<String> {
        Some(format!("mem-{}", self.id))
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::transport::Credential;

    type Seen = Arc<Mutex<Vec<TransportEvent>>>;

    fn request(token: &str, routes: RouteTable) -> (Seen, OpenRequest) {
        let seen: Seen = Arc::default();
        let s = seen.clone();
        let request = OpenRequest {
            endpoint: "memory://".into(),
            credential: Credential::from(token),
            heartbeat_interval: Duration::from_secs(25),
            handshake_timeout: Duration::from_secs(5),
            routes,
            sink: Arc::new(move |event| s.lock().unwrap().push(event)),
        };
        (seen, request)
    }

    #[tokio::test]
    async fn scripted_outcomes_then_default() {
        let server = MemoryServer::new();
        server.script(HandshakeOutcome::Fail("down".into()));
        server.script(HandshakeOutcome::RejectAuth("expired".into()));
        let connector = server.connector();

        let err = connector.open(request("t", RouteTable::new()).1).await.err().unwrap();
        assert!(matches!(err, TransportError::Refused(_)));
        let err = connector.open(request("t", RouteTable::new()).1).await.err().unwrap();
        assert!(err.is_auth());
        assert!(connector.open(request("t", RouteTable::new()).1).await.is_ok());
        assert_eq!(server.attempts(), 3);
    }

    #[tokio::test]
    async fn denied_token_is_auth_failure() {
        let server = MemoryServer::new();
        server.deny_token("invalid-token");
        let err = server
            .connector()
            .open(request("invalid-token", RouteTable::new()).1)
            .await
            .err()
            .unwrap();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn push_respects_routes_and_drop_reports_reason() {
        let server = MemoryServer::new();
        let routes = RouteTable::new();
        routes.attach("alert");
        let (seen, req) = request("t", routes);
        let link = server.connector().open(req).await.unwrap();
        assert_eq!(link.session_id().as_deref(), Some("mem-1"));

        assert!(server.push("alert", serde_json::json!({"id": "a"})));
        assert!(!server.push("device_status", serde_json::json!({})));
        assert!(server.drop_link(DisconnectReason::TransportClosed));
        assert!(!server.drop_link(DisconnectReason::TransportClosed));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[1],
            TransportEvent::Closed(DisconnectReason::TransportClosed)
        );
        assert!(matches!(
            link.emit(Frame::new::<()>("x", None).unwrap()),
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn emit_records_and_close_detaches() {
        let server = MemoryServer::new();
        let link = server
            .connector()
            .open(request("t", RouteTable::new()).1)
            .await
            .unwrap();
        link.emit(Frame::new("ack", Some(&serde_json::json!({"id": 1}))).unwrap())
            .unwrap();
        assert_eq!(
            server.emitted(),
            [("ack".to_string(), serde_json::json!({"id": 1}))]
        );

        assert!(server.has_live_link());
        link.close();
        assert!(!server.has_live_link());
    }
}
