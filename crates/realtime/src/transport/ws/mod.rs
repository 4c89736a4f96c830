//! WebSocket transport built on `tokio-tungstenite`.

mod handshake;
mod link;
pub(crate) mod pumps;

pub use link::WsLink;

use futures_util::future::BoxFuture;

use wattlink_protocol::constants::MAX_FRAME_BYTES;

use crate::error::TransportError;
use crate::transport::{Connector, OpenRequest, TransportLink};

/// Capacity of each link's outbound queue.
const WRITE_QUEUE: usize = 256;

/// Opens authenticated WebSocket links.
#[derive(Debug, Clone)]
pub struct WsConnector {
    max_message_size: usize,
    write_queue: usize,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            max_message_size: MAX_FRAME_BYTES,
            write_queue: WRITE_QUEUE,
        }
    }
}

impl WsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps inbound message and frame size.
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Sets how many outbound frames may queue before `emit` reports
    /// backpressure.
    pub fn with_write_queue(mut self, frames: usize) -> Self {
        self.write_queue = frames.max(1);
        self
    }
}

impl Connector for WsConnector {
    fn open(
        &self,
        request: OpenRequest,
    ) -> BoxFuture<'static, Result<Box<dyn TransportLink>, TransportError>> {
        let max_message_size = self.max_message_size;
        let write_queue = self.write_queue;
        Box::pin(async move {
            let link = WsLink::establish(request, max_message_size, write_queue).await?;
            Ok(Box::new(link) as Box<dyn TransportLink>)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite;

    use wattlink_protocol::{Frame, LifecycleEvent};

    use super::*;
    use crate::transport::{Credential, DisconnectReason, EventSink, RouteTable, TransportEvent};

    type Seen = Arc<Mutex<Vec<TransportEvent>>>;

    fn request(endpoint: String, routes: RouteTable) -> (Seen, OpenRequest) {
        let seen: Seen = Arc::default();
        let s = seen.clone();
        let sink: EventSink = Arc::new(move |event| s.lock().unwrap().push(event));
        let request = OpenRequest {
            endpoint,
            credential: Credential::from("valid-token"),
            heartbeat_interval: Duration::from_secs(25),
            handshake_timeout: Duration::from_secs(5),
            routes,
            sink,
        };
        (seen, request)
    }

    async fn wait_for(seen: &Seen, count: usize) {
        for _ in 0..200 {
            if seen.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {count} transport events");
    }

    /// Accepts one client, answers the handshake, pushes two events and
    /// echoes the first client frame back before closing with `close_code`.
    async fn spawn_server(close_code: u16) -> (String, tokio::task::JoinHandle<Option<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

            let _auth = ws.next().await.unwrap().unwrap();
            let connect = Frame::lifecycle(
                LifecycleEvent::Connect,
                Some(&serde_json::json!({"sessionId": "srv-1"})),
            )
            .unwrap();
            ws.send(tungstenite::Message::Text(connect.encode().unwrap().into()))
                .await
                .unwrap();

            for json in [
                r#"{"event":"alert","data":{"id":"a1","severity":"critical","title":"Overvoltage","timestamp":1}}"#,
                r#"{"event":"system_metrics","data":{"timestamp":1}}"#,
            ] {
                ws.send(tungstenite::Message::Text(json.to_string().into()))
                    .await
                    .unwrap();
            }

            let mut emitted = None;
            while let Some(Ok(msg)) = ws.next().await {
                if let tungstenite::Message::Text(text) = msg {
                    emitted = Some(text.as_str().to_string());
                    break;
                }
            }

            let _ = ws
                .send(tungstenite::Message::Close(Some(
                    tungstenite::protocol::CloseFrame {
                        code: close_code.into(),
                        reason: "done".into(),
                    },
                )))
                .await;
            emitted
        });
        (format!("ws://{addr}"), handle)
    }

    #[tokio::test]
    async fn link_routes_events_and_reports_close() {
        let (endpoint, server) = spawn_server(4001).await;
        let routes = RouteTable::new();
        routes.attach("alert");
        let (seen, request) = request(endpoint, routes);

        let link = WsConnector::new().open(request).await.unwrap();
        assert_eq!(link.session_id().as_deref(), Some("srv-1"));

        let frame = Frame::new("acknowledge_alert", Some(&serde_json::json!({"id": "a1"}))).unwrap();
        link.emit(frame).unwrap();

        let emitted = server.await.unwrap().unwrap();
        assert!(emitted.contains("acknowledge_alert"));

        wait_for(&seen, 2).await;
        let events = seen.lock().unwrap().clone();
        assert!(matches!(&events[0], TransportEvent::Inbound { event, .. } if event == "alert"));
        assert_eq!(
            events[1],
            TransportEvent::Closed(DisconnectReason::CredentialRevoked)
        );
    }

    #[tokio::test]
    async fn closing_link_reports_client_requested() {
        let (endpoint, _server) = spawn_server(1000).await;
        let (seen, request) = request(endpoint, RouteTable::new());

        let link = WsConnector::new().open(request).await.unwrap();
        link.close();
        wait_for(&seen, 1).await;
        assert_eq!(
            seen.lock().unwrap()[0],
            TransportEvent::Closed(DisconnectReason::ClientRequested)
        );
        assert!(matches!(
            link.emit(Frame::new::<()>("ping_device", None).unwrap()),
            Err(TransportError::Closed) | Ok(())
        ));
    }

    #[tokio::test]
    async fn oversized_message_closes_link() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let _auth = ws.next().await.unwrap().unwrap();
            let connect = Frame::lifecycle::<()>(LifecycleEvent::Connect, None).unwrap();
            ws.send(tungstenite::Message::Text(connect.encode().unwrap().into()))
                .await
                .unwrap();
            let big = format!(r#"{{"event":"alert","data":"{}"}}"#, "x".repeat(4096));
            let _ = ws.send(tungstenite::Message::Text(big.into())).await;
            // Hold the socket open so the client fails on size, not on EOF.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let routes = RouteTable::new();
        routes.attach("alert");
        let (seen, request) = request(format!("ws://{addr}"), routes);
        let link = WsConnector::new()
            .with_max_message_size(1024)
            .with_write_queue(4)
            .open(request)
            .await
            .unwrap();

        wait_for(&seen, 1).await;
        let events = seen.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            TransportEvent::Closed(DisconnectReason::TransportError(_))
        ));
        drop(link);
        server.abort();
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (_seen, request) = request(format!("ws://{addr}"), RouteTable::new());
        let err = WsConnector::new().open(request).await.err().unwrap();
        assert!(!err.is_auth());
    }
}
