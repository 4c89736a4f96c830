//! An authenticated WebSocket link and its background pumps.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use wattlink_protocol::Frame;
use wattlink_protocol::constants::HEARTBEAT_TIMEOUT_FACTOR;

use super::handshake::perform_handshake;
use super::pumps;
use crate::error::TransportError;
use crate::transport::{OpenRequest, TransportLink};

/// One open WebSocket connection.
///
/// Dropping the link stops its pumps; the read pump then reports
/// [`DisconnectReason::ClientRequested`](crate::DisconnectReason).
pub struct WsLink {
    write_tx: mpsc::Sender<tungstenite::Message>,
    session_id: Option<String>,
    cancel: CancellationToken,
    _read_handle: JoinHandle<()>,
    _write_handle: JoinHandle<()>,
    _ping_handle: JoinHandle<()>,
}

impl WsLink {
    /// Connects, authenticates and starts the pumps.
    pub(crate) async fn establish(
        request: OpenRequest,
        max_message_size: usize,
        write_queue: usize,
    ) -> Result<Self, TransportError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(max_message_size);
        ws_config.max_frame_size = Some(max_message_size);

        let connecting = tokio_tungstenite::connect_async_with_config(
            request.endpoint.as_str(),
            Some(ws_config),
            false,
        );
        let (mut ws_stream, _) = match tokio::time::timeout(request.handshake_timeout, connecting)
            .await
        {
            Err(_) => return Err(TransportError::HandshakeTimeout),
            Ok(Err(tungstenite::Error::Http(resp)))
                if matches!(resp.status().as_u16(), 401 | 403) =>
            {
                return Err(TransportError::Auth(format!(
                    "upgrade refused with HTTP {}",
                    resp.status()
                )));
            }
            Ok(result) => result?,
        };
        debug!(endpoint = %request.endpoint, "socket open, authenticating");

        let connected =
            perform_handshake(&mut ws_stream, &request.credential, request.handshake_timeout)
                .await?;

        let (write, read) = ws_stream.split();
        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(write_queue);
        let cancel = CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(pumps::write::write_pump(write, write_rx, cancel))
        };

        let read_handle = {
            let routes = request.routes.clone();
            let sink = request.sink.clone();
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            let deadline = request.heartbeat_interval * HEARTBEAT_TIMEOUT_FACTOR;
            tokio::spawn(pumps::read::read_pump(
                read, routes, sink, write_tx, deadline, cancel,
            ))
        };

        let ping_handle = {
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(pumps::ping::ping_pump(
                write_tx,
                request.heartbeat_interval,
                cancel,
            ))
        };

        Ok(Self {
            write_tx,
            session_id: connected.session_id,
            cancel,
            _read_handle: read_handle,
            _write_handle: write_handle,
            _ping_handle: ping_handle,
        })
    }
}

impl TransportLink for WsLink {
    fn emit(&self, frame: Frame) -> Result<(), TransportError> {
        let json = frame.encode()?;
        trace!(event = %frame.event, "queueing frame");
        self.write_tx
            .try_send(tungstenite::Message::Text(json.into()))
            .map_err(|e| match e {
                TrySendError::Full(_) => TransportError::Backpressure,
                TrySendError::Closed(_) => TransportError::Closed,
            })
    }

    fn close(&self) {
        if !self.cancel.is_cancelled() {
            debug!("closing WebSocket link");
            self.cancel.cancel();
        }
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.clone()
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
