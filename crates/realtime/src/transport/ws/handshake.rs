//! Authentication handshake on a freshly opened socket.
//!
//! The client sends `auth` with its token and waits for the server's
//! verdict: `connect` (accepted) or `connect_error` (rejected). Frames
//! other than the verdict are ignored until then.

use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite;
use tracing::{debug, trace};

use wattlink_protocol::constants::CLOSE_CREDENTIAL_REVOKED;
use wattlink_protocol::{
    AuthPayload, ConnectErrorPayload, ConnectedPayload, Frame, LifecycleEvent, ProtocolError,
};

use crate::error::TransportError;
use crate::transport::Credential;

/// Sends the credential and waits up to `timeout` for the verdict.
pub(crate) async fn perform_handshake<S>(
    stream: &mut S,
    credential: &Credential,
    timeout: Duration,
) -> Result<ConnectedPayload, TransportError>
where
    S: Stream<Item = Result<tungstenite::Message, tungstenite::Error>>
        + Sink<tungstenite::Message, Error = tungstenite::Error>
        + Unpin,
{
    let auth = AuthPayload {
        token: credential.expose().to_string(),
    };
    let frame = Frame::lifecycle(LifecycleEvent::Auth, Some(&auth)).map_err(ProtocolError::from)?;
    stream
        .send(tungstenite::Message::Text(frame.encode()?.into()))
        .await?;

    match tokio::time::timeout(timeout, await_verdict(stream)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::HandshakeTimeout),
    }
}

async fn await_verdict<S>(stream: &mut S) -> Result<ConnectedPayload, TransportError>
where
    S: Stream<Item = Result<tungstenite::Message, tungstenite::Error>>
        + Sink<tungstenite::Message, Error = tungstenite::Error>
        + Unpin,
{
    while let Some(msg) = stream.next().await {
        match msg? {
            tungstenite::Message::Text(text) => {
                let frame = Frame::decode(&text)?;
                match frame.lifecycle_event() {
                    Some(LifecycleEvent::Connect) => {
                        let connected = frame
                            .parse_data::<ConnectedPayload>()
                            .map_err(ProtocolError::from)?
                            .unwrap_or_default();
                        debug!(session = ?connected.session_id, "handshake accepted");
                        return Ok(connected);
                    }
                    Some(LifecycleEvent::ConnectError) => {
                        let rejected = frame
                            .parse_data::<ConnectErrorPayload>()
                            .map_err(ProtocolError::from)?
                            .unwrap_or_default();
                        debug!(message = %rejected.message, kind = ?rejected.kind, "handshake rejected");
                        return Err(if rejected.is_auth() {
                            TransportError::Auth(rejected.message)
                        } else {
                            TransportError::Refused(rejected.message)
                        });
                    }
                    _ => trace!(event = %frame.event, "ignoring frame before handshake verdict"),
                }
            }
            tungstenite::Message::Ping(data) => {
                stream.send(tungstenite::Message::Pong(data)).await?;
            }
            tungstenite::Message::Close(frame) => {
                if let Some(f) = frame
                    && u16::from(f.code) == CLOSE_CREDENTIAL_REVOKED
                {
                    return Err(TransportError::Auth(f.reason.as_str().to_string()));
                }
                return Err(TransportError::Closed);
            }
            _ => {}
        }
    }
    Err(TransportError::Closed)
}
