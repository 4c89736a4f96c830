//! Listener registry: the single arena for event subscriptions.
//!
//! Every `listen()` is recorded here under a [`SubscriptionId`], and this is
//! the only place that attaches or detaches transport-level routes. Nothing
//! relies on a closure being dropped elsewhere to stop receiving events.

use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, trace};

use wattlink_protocol::Event;

use crate::transport::RouteTable;

/// Handle returned by `listen()`, used to remove exactly that subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Callback invoked for every inbound event of a subscribed name.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Point-in-time resource counts for leak checks and diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_listeners: usize,
    pub active_timers: usize,
    pub transport_listeners: usize,
    pub state_observers: usize,
    pub listeners_by_event: BTreeMap<String, usize>,
}

impl MemoryStats {
    /// `true` when no subscription, route or timer is left.
    pub fn is_drained(&self) -> bool {
        self.total_listeners == 0 && self.active_timers == 0 && self.transport_listeners == 0
    }
}

/// Result of delivering one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub delivered: usize,
    pub failed: usize,
}

/// Subscriptions grouped by event name, in registration order.
pub struct ListenerRegistry {
    next_id: u64,
    by_event: HashMap<String, Vec<(SubscriptionId, Listener)>>,
    routes: RouteTable,
}

impl ListenerRegistry {
    pub fn new(routes: RouteTable) -> Self {
        Self {
            next_id: 1,
            by_event: HashMap::new(),
            routes,
        }
    }

    /// Registers `listener` for `event`. The first subscriber of a name
    /// attaches its transport route.
    pub fn listen(&mut self, event: &str, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        let subs = self.by_event.entry(event.to_string()).or_default();
        subs.push((id, listener));
        if subs.len() == 1 {
            self.routes.attach(event);
            debug!(event, "attached transport route");
        }
        trace!(event, %id, "listener registered");
        id
    }

    /// Removes one subscription (`Some(id)`) or all of them (`None`) for
    /// `event`. The route is detached once the last subscriber is gone.
    /// Returns how many subscriptions were removed.
    pub fn unlisten(&mut self, event: &str, id: Option<SubscriptionId>) -> usize {
        let Some(subs) = self.by_event.get_mut(event) else {
            return 0;
        };
        let before = subs.len();
        match id {
            Some(id) => subs.retain(|(sid, _)| *sid != id),
            None => subs.clear(),
        }
        let removed = before - subs.len();
        if subs.is_empty() {
            self.by_event.remove(event);
            self.routes.detach(event);
            debug!(event, "detached transport route");
        }
        removed
    }

    /// Removes every subscription and detaches every route.
    pub fn drain_all(&mut self) -> usize {
        let removed = self.total();
        self.by_event.clear();
        let routes = self.routes.detach_all();
        if removed > 0 || routes > 0 {
            debug!(removed, routes, "listener registry drained");
        }
        removed
    }

    /// Returns `true` if the subscription is still registered.
    pub fn contains(&self, event: &str, id: SubscriptionId) -> bool {
        self.by_event
            .get(event)
            .is_some_and(|subs| subs.iter().any(|(sid, _)| *sid == id))
    }

    /// Listeners for `event` in registration order.
    pub fn snapshot(&self, event: &str) -> Vec<(SubscriptionId, Listener)> {
        self.by_event.get(event).cloned().unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.by_event.values().map(Vec::len).sum()
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Counts by event name; timers and observers are filled in by the
    /// manager.
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            total_listeners: self.total(),
            transport_listeners: self.routes.len(),
            listeners_by_event: self
                .by_event
                .iter()
                .map(|(name, subs)| (name.clone(), subs.len()))
                .collect(),
            ..MemoryStats::default()
        }
    }

    /// Delivers `event` to its current subscribers.
    pub fn dispatch(&self, event: &Event) -> DispatchOutcome {
        let listeners = self.snapshot(&event.name);
        dispatch(event, &listeners, |id| self.contains(&event.name, id))
    }
}

/// Calls each listener in order, isolating panics.
///
/// `is_live` is consulted before each call so a subscription removed by an
/// earlier listener in the same dispatch is skipped.
pub(crate) fn dispatch(
    event: &Event,
    listeners: &[(SubscriptionId, Listener)],
    is_live: impl Fn(SubscriptionId) -> bool,
) -> DispatchOutcome {
    let mut outcome = DispatchOutcome::default();
    for (id, listener) in listeners {
        if !is_live(*id) {
            trace!(event = %event.name, %id, "skipping listener removed mid-dispatch");
            continue;
        }
        match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
            Ok(()) => outcome.delivered += 1,
            Err(payload) => {
                outcome.failed += 1;
                error!(
                    event = %event.name,
                    subscription = %id,
                    panic = %panic_message(payload.as_ref()),
                    "listener panicked; continuing with remaining listeners"
                );
            }
        }
    }
    outcome
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".into()
    }
}
