//! Connection state machine and state observers.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::transport::DisconnectReason;

/// Connection state of one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Initial and terminal state.
    Disconnected,
    /// First handshake of a session in progress.
    Connecting,
    /// Handshake completed; events flow.
    Connected,
    /// Connection lost, waiting for or running a retry.
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }

    /// Returns `true` if `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connecting, Reconnecting)
                | (Connected, Disconnected)
                | (Connected, Reconnecting)
                | (Reconnecting, Connected)
                | (Reconnecting, Disconnected)
        )
    }

    /// `true` while a connection attempt is running or scheduled.
    pub fn is_pending(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Reconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a transition happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateReason {
    /// `connect()` was called.
    ConnectRequested,
    /// Handshake accepted.
    Established,
    /// The server rejected the credential during the handshake.
    AuthRejected { message: String },
    /// A connection attempt failed with a transient error.
    AttemptFailed { attempt: u32, message: String },
    /// The transport went away without a client request.
    TransportLost { reason: DisconnectReason },
    /// `max_reconnection_attempts` reached.
    RetriesExhausted { attempts: u32 },
    /// `disconnect()` was called.
    ClientRequested,
}

/// One state transition, delivered to every observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub reason: StateReason,
}

/// Callback invoked on every state transition.
pub type StateObserver = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Canonical connection state plus the queue of transitions not yet
/// delivered to observers.
#[derive(Debug)]
pub(crate) struct StateMachine {
    current: ConnectionState,
    pending: VecDeque<StateChange>,
}

impl StateMachine {
    pub(crate) fn new() -> Self {
        Self {
            current: ConnectionState::Disconnected,
            pending: VecDeque::new(),
        }
    }

    pub(crate) fn current(&self) -> ConnectionState {
        self.current
    }

    /// Applies a transition and queues its notification.
    ///
    /// Illegal transitions are refused and logged; the state is unchanged.
    pub(crate) fn transition(&mut self, to: ConnectionState, reason: StateReason) -> bool {
        let from = self.current;
        if !from.can_transition_to(to) {
            warn!(%from, %to, ?reason, "refusing illegal state transition");
            return false;
        }
        debug!(%from, %to, ?reason, "connection state changed");
        self.current = to;
        self.pending.push_back(StateChange { from, to, reason });
        true
    }

    /// Takes the oldest undelivered transition.
    pub(crate) fn next_pending(&mut self) -> Option<StateChange> {
        self.pending.pop_front()
    }
}

/// Ordered set of state observers keyed by caller-chosen id.
#[derive(Default)]
pub(crate) struct StateObservers {
    entries: Vec<(String, StateObserver)>,
}

impl StateObservers {
    /// Registers `observer` under `id`, replacing any previous observer
    /// with the same id while keeping its position.
    pub(crate) fn insert(&mut self, id: String, observer: StateObserver) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == id) {
            slot.1 = observer;
        } else {
            self.entries.push((id, observer));
        }
    }

    pub(crate) fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| k != id);
        self.entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Observers in subscription order.
    pub(crate) fn snapshot(&self) -> Vec<(String, StateObserver)> {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn legal_transitions() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Disconnected));
        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(Reconnecting.can_transition_to(Connected));
        assert!(Reconnecting.can_transition_to(Disconnected));
    }

    #[test]
    fn illegal_transitions() {
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Reconnecting));
        assert!(!Reconnecting.can_transition_to(Connecting));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Connected.can_transition_to(Connected));
    }

    #[test]
    fn machine_queues_changes_in_order() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.current(), Disconnected);
        assert!(sm.transition(Connecting, StateReason::ConnectRequested));
        assert!(sm.transition(Connected, StateReason::Established));

        let first = sm.next_pending().unwrap();
        assert_eq!((first.from, first.to), (Disconnected, Connecting));
        let second = sm.next_pending().unwrap();
        assert_eq!((second.from, second.to), (Connecting, Connected));
        assert!(sm.next_pending().is_none());
    }

    #[test]
    fn machine_refuses_illegal_transition() {
        let mut sm = StateMachine::new();
        assert!(!sm.transition(Connected, StateReason::Established));
        assert_eq!(sm.current(), Disconnected);
        assert!(sm.next_pending().is_none());
    }

    #[test]
    fn observers_keep_subscription_order() {
        let mut obs = StateObservers::default();
        let noop: StateObserver = Arc::new(|_| {});
        obs.insert("b".into(), noop.clone());
        obs.insert("a".into(), noop.clone());
        obs.insert("b".into(), noop);
        let ids: Vec<String> = obs.snapshot().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, ["b", "a"]);
        assert!(obs.remove("b"));
        assert!(!obs.remove("b"));
        assert_eq!(obs.len(), 1);
        assert_eq!(obs.snapshot()[0].0, "a");
    }

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Reconnecting).unwrap(), "\"reconnecting\"");
        assert_eq!(Connected.to_string(), "connected");
    }
}
