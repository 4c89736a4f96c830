//! WebSocket read pump: routes inbound frames to the manager.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use wattlink_protocol::constants::{CLOSE_CREDENTIAL_REVOKED, CLOSE_SERVER_SHUTDOWN};
use wattlink_protocol::{Frame, LifecycleEvent};

use crate::transport::{DisconnectReason, EventSink, RouteTable, TransportEvent};

/// Reads frames until the link ends, forwarding domain events whose name
/// is attached in `routes`, then reports the end of the link exactly once.
///
/// Any incoming message resets the `deadline`; if nothing arrives in time
/// the link is considered dead.
pub(crate) async fn read_pump<S>(
    mut read: S,
    routes: RouteTable,
    sink: EventSink,
    write_tx: mpsc::Sender<tungstenite::Message>,
    deadline: Duration,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let read_deadline = tokio::time::sleep(deadline);
    tokio::pin!(read_deadline);

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => break DisconnectReason::ClientRequested,

            () = &mut read_deadline => {
                warn!("no traffic within {deadline:?}, connection dead");
                break DisconnectReason::HeartbeatTimeout;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        read_deadline.as_mut().reset(tokio::time::Instant::now() + deadline);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                if let Some(reason) = handle_text_message(&text, &routes, &sink) {
                                    break reason;
                                }
                            }
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Pong(_) => {
                                trace!("received pong");
                            }
                            tungstenite::Message::Close(frame) => {
                                debug!("received close frame");
                                break close_reason(frame.as_ref());
                            }
                            _ => {} // Binary frames are not part of the protocol.
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break DisconnectReason::TransportError(e.to_string());
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break DisconnectReason::TransportClosed;
                    }
                }
            }
        }
    };

    sink(TransportEvent::Closed(reason));
}

/// Handles one text frame. Returns a reason when the frame ends the link.
fn handle_text_message(
    text: &str,
    routes: &RouteTable,
    sink: &EventSink,
) -> Option<DisconnectReason> {
    let frame = match Frame::decode(text) {
        Ok(f) => f,
        Err(e) => {
            warn!("dropping undecodable frame: {e}");
            return None;
        }
    };

    match frame.lifecycle_event() {
        Some(LifecycleEvent::Disconnect) => {
            debug!("server requested disconnect");
            return Some(DisconnectReason::ServerRequested);
        }
        Some(other) => {
            trace!(event = other.as_str(), "ignoring lifecycle frame after handshake");
            return None;
        }
        None => {}
    }

    if !routes.is_attached(&frame.event) {
        trace!(event = %frame.event, "no listeners attached, dropping");
        return None;
    }

    match frame.data_value() {
        Ok(data) => sink(TransportEvent::Inbound {
            event: frame.event,
            data,
        }),
        Err(e) => warn!(event = %frame.event, "dropping frame with unreadable data: {e}"),
    }
    None
}

fn close_reason(frame: Option<&CloseFrame>) -> DisconnectReason {
    let Some(frame) = frame else {
        return DisconnectReason::TransportClosed;
    };
    match u16::from(frame.code) {
        CLOSE_CREDENTIAL_REVOKED => {
            debug!("server revoked the credential (close code {CLOSE_CREDENTIAL_REVOKED})");
            DisconnectReason::CredentialRevoked
        }
        CLOSE_SERVER_SHUTDOWN => DisconnectReason::ServerRequested,
        code if code == u16::from(CloseCode::Normal) => DisconnectReason::ServerRequested,
        code => {
            debug!(code, reason = frame.reason.as_str(), "link closed by peer");
            DisconnectReason::TransportClosed
        }
    }
}
