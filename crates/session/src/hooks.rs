//! RAII handles returned by [`SessionContext`](crate::SessionContext).

use tokio::sync::watch;
use tracing::trace;

use wattlink_realtime::{ConnectionManager, ConnectionState, SubscriptionId};

/// Listener registration; unlistens on drop.
#[must_use = "the listener is removed when the hook is dropped"]
pub struct EventHook {
    manager: ConnectionManager,
    event: String,
    id: SubscriptionId,
}

impl EventHook {
    pub(crate) fn new(manager: ConnectionManager, event: &str, id: SubscriptionId) -> Self {
        Self {
            manager,
            event: event.to_string(),
            id,
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for EventHook {
    fn drop(&mut self) {
        let removed = self.manager.unlisten(&self.event, Some(self.id));
        trace!(event = %self.event, id = %self.id, removed, "event hook dropped");
    }
}

/// Read-only view of the connection state.
#[derive(Clone)]
pub struct ConnectionStatusHook {
    rx: watch::Receiver<ConnectionState>,
}

impl ConnectionStatusHook {
    pub(crate) fn new(rx: watch::Receiver<ConnectionState>) -> Self {
        Self { rx }
    }

    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.current() == ConnectionState::Connected
    }

    /// Waits for the next state change. Returns `None` once the manager
    /// is gone.
    pub async fn changed(&mut self) -> Option<ConnectionState> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Waits until `state` is reached. Returns `false` if the manager went
    /// away first.
    pub async fn wait_for(&mut self, state: ConnectionState) -> bool {
        self.rx.wait_for(|s| *s == state).await.is_ok()
    }
}

/// State observer registration; unsubscribes on drop.
#[must_use = "the observer is removed when the hook is dropped"]
pub struct StateHook {
    manager: ConnectionManager,
    id: String,
}

impl StateHook {
    pub(crate) fn new(manager: ConnectionManager, id: String) -> Self {
        Self { manager, id }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for StateHook {
    fn drop(&mut self) {
        self.manager.unsubscribe_from_state(&self.id);
    }
}
