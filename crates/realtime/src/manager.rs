//! Connection manager facade.
//!
//! [`ConnectionManager`] is a cheap, cloneable handle. All clones share one
//! state machine, one listener registry and one reconnection scheduler.
//! The internal lock is never held across an await point or while user
//! callbacks run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use wattlink_protocol::{Event, Frame, constants};

use crate::config::{ConfigError, ConnectionConfig};
use crate::error::RealtimeError;
use crate::metrics::ConnectionMetrics;
use crate::reconnection;
use crate::registry::{self, ListenerRegistry, MemoryStats, SubscriptionId};
use crate::scheduler::ReconnectScheduler;
use crate::state::{
    ConnectionState, StateChange, StateMachine, StateObserver, StateObservers, StateReason,
};
use crate::transport::ws::WsConnector;
use crate::transport::{Connector, Credential, RouteTable, TransportLink};

/// How a pending `connect()` call ends.
#[derive(Debug, Clone)]
pub(crate) enum ConnectOutcome {
    Connected,
    AuthRejected(String),
    Failed(String),
    Exhausted(u32),
    Cancelled,
}

impl ConnectOutcome {
    fn into_result(self) -> Result<(), RealtimeError> {
        match self {
            ConnectOutcome::Connected => Ok(()),
            ConnectOutcome::AuthRejected(message) => Err(RealtimeError::Authentication(message)),
            ConnectOutcome::Failed(message) => Err(RealtimeError::Transport(message)),
            ConnectOutcome::Exhausted(attempts) => Err(RealtimeError::RetriesExhausted { attempts }),
            ConnectOutcome::Cancelled => Err(RealtimeError::Cancelled),
        }
    }
}

/// Everything guarded by the manager lock.
pub(crate) struct Inner {
    pub(crate) machine: StateMachine,
    /// Bumped whenever in-flight attempts and links must be ignored.
    pub(crate) generation: u64,
    pub(crate) credential: Option<Credential>,
    pub(crate) link: Option<Box<dyn TransportLink>>,
    pub(crate) session_id: Option<String>,
    pub(crate) registry: ListenerRegistry,
    pub(crate) scheduler: ReconnectScheduler,
    pub(crate) metrics: ConnectionMetrics,
    pub(crate) observers: StateObservers,
    pub(crate) waiters: Vec<oneshot::Sender<ConnectOutcome>>,
    notifying: bool,
}

impl Inner {
    fn add_waiter(&mut self) -> oneshot::Receiver<ConnectOutcome> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        rx
    }

    /// Resolves every pending `connect()` call.
    pub(crate) fn settle_waiters(&mut self, outcome: ConnectOutcome) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
    }
}

pub(crate) struct Shared {
    pub(crate) config: ConnectionConfig,
    pub(crate) connector: Arc<dyn Connector>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies a transition and publishes it on the watch channel.
    /// Observers are notified later by [`Shared::flush_notifications`].
    pub(crate) fn transition(
        &self,
        inner: &mut Inner,
        to: ConnectionState,
        reason: StateReason,
    ) -> bool {
        let changed = inner.machine.transition(to, reason);
        if changed {
            self.state_tx.send_replace(to);
        }
        changed
    }

    /// Delivers queued transitions to observers, outside the lock.
    ///
    /// Re-entrant calls (an observer calling back into the manager) only
    /// queue; the outermost call delivers everything in order.
    pub(crate) fn flush_notifications(&self) {
        {
            let mut inner = self.lock();
            if inner.notifying {
                return;
            }
            inner.notifying = true;
        }

        loop {
            let (change, observers) = {
                let mut inner = self.lock();
                match inner.machine.next_pending() {
                    Some(change) => (change, inner.observers.snapshot()),
                    None => {
                        inner.notifying = false;
                        return;
                    }
                }
            };

            let mut failures = 0u64;
            for (id, observer) in &observers {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| observer(&change))) {
                    failures += 1;
                    error!(
                        observer = %id,
                        panic = %registry::panic_message(payload.as_ref()),
                        "state observer panicked"
                    );
                }
            }
            if failures > 0 {
                self.lock().metrics.listener_failures += failures;
            }
        }
    }
}

/// Owns the lifecycle of one real-time connection.
///
/// Create one per user session. Every clone refers to the same connection;
/// dropping the last clone tears it down.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.shared.config.endpoint)
            .field("state", &self.connection_state())
            .finish()
    }
}

impl ConnectionManager {
    /// Creates a disconnected manager using `connector` for its links.
    pub fn new(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let routes = RouteTable::new();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Inner {
            machine: StateMachine::new(),
            generation: 0,
            credential: None,
            link: None,
            session_id: None,
            registry: ListenerRegistry::new(routes),
            scheduler: ReconnectScheduler::new(&config),
            metrics: ConnectionMetrics::default(),
            observers: StateObservers::default(),
            waiters: Vec::new(),
            notifying: false,
        };
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                connector,
                inner: Mutex::new(inner),
                state_tx,
            }),
        })
    }

    /// Creates a manager that connects over WebSocket.
    pub fn websocket(config: ConnectionConfig) -> Result<Self, ConfigError> {
        Self::new(config, Arc::new(WsConnector::default()))
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Opens the connection with `credential`.
    ///
    /// Resolves once connected. Calling it while already connected resolves
    /// immediately; calling it while an attempt is in flight joins that
    /// attempt instead of opening a second connection. A transient failure
    /// of the first attempt moves to `reconnecting` and keeps the call
    /// pending until a retry succeeds or the retries run out.
    pub async fn connect(&self, credential: impl Into<Credential>) -> Result<(), RealtimeError> {
        let shared = &self.shared;
        let rx = {
            let mut inner = shared.lock();
            match inner.machine.current() {
                ConnectionState::Connected => {
                    debug!("connect() while connected, nothing to do");
                    return Ok(());
                }
                ConnectionState::Connecting | ConnectionState::Reconnecting => {
                    debug!("connect() joins the in-flight attempt");
                    inner.add_waiter()
                }
                ConnectionState::Disconnected => {
                    inner.credential = Some(credential.into());
                    inner.generation += 1;
                    inner.scheduler.reset();
                    let generation = inner.generation;
                    shared.transition(
                        &mut inner,
                        ConnectionState::Connecting,
                        StateReason::ConnectRequested,
                    );
                    info!(endpoint = %shared.config.endpoint, "connecting");
                    let weak = Arc::downgrade(shared);
                    inner.scheduler.spawn(
                        Duration::ZERO,
                        reconnection::run_attempt(weak, generation),
                    );
                    inner.add_waiter()
                }
            }
        };
        shared.flush_notifications();

        rx.await
            .unwrap_or(ConnectOutcome::Cancelled)
            .into_result()
    }

    /// Closes the connection and releases every listener and timer.
    ///
    /// Synchronous and idempotent: a second call changes nothing and emits
    /// no transition. A pending `connect()` resolves with
    /// [`RealtimeError::Cancelled`].
    pub fn disconnect(&self) {
        let shared = &self.shared;
        {
            let mut guard = shared.lock();
            let inner = &mut *guard;
            inner.generation += 1;
            let timers = inner.scheduler.cancel_all();
            inner.scheduler.reset();
            let listeners = inner.registry.drain_all();
            if let Some(link) = inner.link.take() {
                link.close();
            }
            inner.credential = None;
            inner.session_id = None;
            inner.settle_waiters(ConnectOutcome::Cancelled);

            if inner.machine.current() != ConnectionState::Disconnected {
                inner.metrics.record_disconnected();
                shared.transition(
                    inner,
                    ConnectionState::Disconnected,
                    StateReason::ClientRequested,
                );
                info!(timers, listeners, "disconnected");
            } else if timers > 0 || listeners > 0 {
                debug!(timers, listeners, "released resources while disconnected");
            }
        }
        shared.flush_notifications();
    }

    /// Registers `callback` for `event`. Works before `connect()`; the
    /// transport listener is attached as soon as a link opens.
    pub fn listen<F>(&self, event: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        if constants::is_reserved(event) {
            warn!(event, "lifecycle events are not delivered to listeners; use subscribe_to_state");
        }
        let id = self.shared.lock().registry.listen(event, Arc::new(callback));
        debug!(event, %id, "listener registered");
        id
    }

    /// Removes one listener, or every listener for `event` when `id` is
    /// `None`. Returns how many were removed.
    pub fn unlisten(&self, event: &str, id: Option<SubscriptionId>) -> usize {
        let removed = self.shared.lock().registry.unlisten(event, id);
        debug!(event, removed, "listeners removed");
        removed
    }

    /// Sends `payload` as `event`.
    ///
    /// Only allowed while connected; otherwise the call is rejected with
    /// [`RealtimeError::NotConnected`] and nothing is buffered.
    pub fn emit<T: Serialize>(&self, event: &str, payload: &T) -> Result<(), RealtimeError> {
        if event.is_empty() {
            return Err(RealtimeError::EmptyEventName);
        }
        if constants::is_reserved(event) {
            return Err(RealtimeError::ReservedEvent(event.to_string()));
        }
        let frame = Frame::new(event, Some(payload))?;

        let mut guard = self.shared.lock();
        let inner = &mut *guard;
        let state = inner.machine.current();
        match (&inner.link, state) {
            (Some(link), ConnectionState::Connected) => {
                link.emit(frame)?;
                inner.metrics.events_sent += 1;
                Ok(())
            }
            _ => {
                warn!(event, %state, "emit rejected: not connected");
                Err(RealtimeError::NotConnected { state })
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock().machine.current()
    }

    /// Watch channel carrying the latest state. Intermediate states may be
    /// skipped by slow receivers; use [`subscribe_to_state`] to see every
    /// transition.
    ///
    /// [`subscribe_to_state`]: ConnectionManager::subscribe_to_state
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Registers an observer called on every transition, in order.
    /// Re-using `observer_id` replaces the previous observer.
    pub fn subscribe_to_state<F>(&self, observer_id: impl Into<String>, callback: F)
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        let observer: StateObserver = Arc::new(callback);
        self.shared.lock().observers.insert(observer_id.into(), observer);
    }

    pub fn unsubscribe_from_state(&self, observer_id: &str) -> bool {
        self.shared.lock().observers.remove(observer_id)
    }

    /// Retries made since the last established connection.
    pub fn reconnect_attempt(&self) -> u32 {
        self.shared.lock().scheduler.attempt()
    }

    /// Id of the current session: assigned by the server, or generated
    /// locally when the server sends none.
    pub fn session_id(&self) -> Option<String> {
        self.shared.lock().session_id.clone()
    }

    pub fn metrics(&self) -> ConnectionMetrics {
        self.shared.lock().metrics.snapshot()
    }

    /// Counts of live listeners, timers and observers.
    pub fn memory_stats(&self) -> MemoryStats {
        let mut inner = self.shared.lock();
        let mut stats = inner.registry.stats();
        stats.active_timers = inner.scheduler.pending();
        stats.state_observers = inner.observers.len();
        stats
    }
}
