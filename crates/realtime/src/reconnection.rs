//! Connection attempts, retry scheduling and transport event handling.
//!
//! Attempts and links are tagged with the manager generation that started
//! them. `disconnect()` and every new attempt bump the generation, so
//! results and events from anything older are discarded.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use wattlink_protocol::Event;

use crate::error::TransportError;
use crate::manager::{ConnectOutcome, Inner, Shared};
use crate::registry;
use crate::state::{ConnectionState, StateReason};
use crate::transport::{
    DisconnectReason, EventSink, OpenRequest, TransportEvent, TransportLink,
};

/// Runs one connection attempt for `generation`.
///
/// The manager is only borrowed while preparing and applying the attempt,
/// never while the handshake is in flight.
pub(crate) async fn run_attempt(weak: Weak<Shared>, generation: u64) {
    let (connector, request) = {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        let inner = shared.lock();
        if inner.generation != generation || !inner.machine.current().is_pending() {
            trace!(generation, "attempt superseded before it started");
            return;
        }
        let Some(credential) = inner.credential.clone() else {
            return;
        };
        let request = OpenRequest {
            endpoint: shared.config.endpoint.clone(),
            credential,
            heartbeat_interval: shared.config.heartbeat_interval,
            handshake_timeout: shared.config.handshake_timeout,
            routes: inner.registry.routes().clone(),
            sink: event_sink(&shared, generation),
        };
        (shared.connector.clone(), request)
    };

    let result = match AssertUnwindSafe(async move { connector.open(request).await })
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => {
            let message = registry::panic_message(payload.as_ref());
            error!(generation, panic = %message, "connector panicked during connection attempt");
            Err(TransportError::ConnectorPanicked(message))
        }
    };

    let Some(shared) = weak.upgrade() else {
        debug!("manager dropped during connection attempt");
        return;
    };
    finish_attempt(&shared, generation, result);
    shared.flush_notifications();
}

fn finish_attempt(
    shared: &Arc<Shared>,
    generation: u64,
    result: Result<Box<dyn TransportLink>, TransportError>,
) {
    let mut guard = shared.lock();
    let inner = &mut *guard;
    if inner.generation != generation || !inner.machine.current().is_pending() {
        if let Ok(link) = result {
            debug!("closing link from a superseded attempt");
            link.close();
        }
        return;
    }

    match result {
        Ok(link) => {
            let reconnected = inner.machine.current() == ConnectionState::Reconnecting;
            let retries = inner.scheduler.attempt();
            let session_id = link
                .session_id()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            inner.link = Some(link);
            inner.session_id = Some(session_id.clone());
            inner.scheduler.reset();
            inner.metrics.record_connected(reconnected);
            shared.transition(inner, ConnectionState::Connected, StateReason::Established);
            inner.settle_waiters(ConnectOutcome::Connected);
            info!(session = %session_id, retries, "connected");
        }
        Err(e) if e.is_auth() => {
            let message = match e {
                TransportError::Auth(message) => message,
                other => other.to_string(),
            };
            warn!(%message, "authentication rejected, not retrying");
            inner.metrics.record_error(format!("authentication rejected: {message}"));
            inner.credential = None;
            shared.transition(
                inner,
                ConnectionState::Disconnected,
                StateReason::AuthRejected {
                    message: message.clone(),
                },
            );
            inner.settle_waiters(ConnectOutcome::AuthRejected(message));
        }
        Err(e) => {
            let message = e.to_string();
            let attempt = inner.scheduler.attempt();
            warn!(attempt, error = %message, "connection attempt failed");
            inner.metrics.record_error(message.clone());
            if shared.config.reconnection_enabled {
                schedule_retry(shared, inner, StateReason::AttemptFailed { attempt, message });
            } else {
                inner.credential = None;
                shared.transition(
                    inner,
                    ConnectionState::Disconnected,
                    StateReason::AttemptFailed {
                        attempt,
                        message: message.clone(),
                    },
                );
                inner.settle_waiters(ConnectOutcome::Failed(message));
            }
        }
    }
}

/// Schedules the next retry, or gives up when the ceiling is reached.
///
/// `reason` is recorded on the transition into `reconnecting`; retries that
/// fail while already reconnecting do not transition again.
pub(crate) fn schedule_retry(shared: &Arc<Shared>, inner: &mut Inner, reason: StateReason) {
    match inner.scheduler.next_attempt() {
        Some((attempt, delay)) => {
            if inner.machine.current() != ConnectionState::Reconnecting {
                shared.transition(inner, ConnectionState::Reconnecting, reason);
            }
            inner.generation += 1;
            let generation = inner.generation;
            info!(
                attempt,
                max = inner.scheduler.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                "scheduling reconnection"
            );
            let weak = Arc::downgrade(shared);
            inner.scheduler.spawn(delay, run_attempt(weak, generation));
        }
        None => {
            let attempts = inner.scheduler.attempt();
            warn!(attempts, "reconnection attempts exhausted, giving up");
            inner.generation += 1;
            inner.credential = None;
            inner.session_id = None;
            shared.transition(
                inner,
                ConnectionState::Disconnected,
                StateReason::RetriesExhausted { attempts },
            );
            inner.settle_waiters(ConnectOutcome::Exhausted(attempts));
        }
    }
}

/// Sink handed to links opened for `generation`.
fn event_sink(shared: &Arc<Shared>, generation: u64) -> EventSink {
    let weak = Arc::downgrade(shared);
    Arc::new(move |event| {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        match event {
            TransportEvent::Inbound { event, data } => {
                deliver_inbound(&shared, generation, &event, data);
            }
            TransportEvent::Closed(reason) => {
                handle_link_closed(&shared, generation, reason);
                shared.flush_notifications();
            }
        }
    })
}

fn deliver_inbound(shared: &Arc<Shared>, generation: u64, name: &str, data: serde_json::Value) {
    let listeners = {
        let mut inner = shared.lock();
        if inner.generation != generation || inner.machine.current() != ConnectionState::Connected
        {
            trace!(event = name, "dropping event from a stale link");
            return;
        }
        inner.metrics.events_received += 1;
        inner.registry.snapshot(name)
    };
    if listeners.is_empty() {
        return;
    }

    let event = match Event::decode(name, data) {
        Ok(event) => event,
        Err(e) => {
            warn!(event = name, "dropping invalid payload: {e}");
            shared.lock().metrics.invalid_payloads += 1;
            return;
        }
    };

    let outcome = registry::dispatch(&event, &listeners, |id| {
        shared.lock().registry.contains(name, id)
    });
    trace!(event = name, delivered = outcome.delivered, "dispatched");
    if outcome.failed > 0 {
        shared.lock().metrics.listener_failures += outcome.failed as u64;
    }
}

/// Applies the end of the current link: retry, or stop for good.
fn handle_link_closed(shared: &Arc<Shared>, generation: u64, reason: DisconnectReason) {
    let mut guard = shared.lock();
    let inner = &mut *guard;
    if inner.generation != generation || inner.machine.current() != ConnectionState::Connected {
        trace!(%reason, "ignoring close of a stale link");
        return;
    }

    if let Some(link) = inner.link.take() {
        link.close();
    }
    inner.session_id = None;
    inner.metrics.record_disconnected();

    let config = &shared.config;
    let retry = match &reason {
        DisconnectReason::ClientRequested | DisconnectReason::CredentialRevoked => false,
        DisconnectReason::ServerRequested => {
            config.reconnection_enabled && config.reconnect_on_server_disconnect
        }
        DisconnectReason::TransportClosed
        | DisconnectReason::TransportError(_)
        | DisconnectReason::HeartbeatTimeout => config.reconnection_enabled,
    };

    if !matches!(reason, DisconnectReason::ClientRequested) {
        inner.metrics.record_error(format!("connection lost: {reason}"));
    }
    warn!(%reason, retry, "connection lost");

    let lost = StateReason::TransportLost { reason };
    if retry {
        schedule_retry(shared, inner, lost);
    } else {
        inner.generation += 1;
        inner.credential = None;
        shared.transition(inner, ConnectionState::Disconnected, lost);
    }
}
