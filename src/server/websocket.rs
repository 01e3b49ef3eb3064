//! WebSocket server implementation
//!
//! Listens for connections, upgrades those that target the configured
//! path, and runs one [`ConnectionHandler`] per session.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::context::RelayContext;
use super::handler::ConnectionHandler;
use crate::broadcast::Announcer;
use crate::config::MockConfig;
use crate::session::{FrameReceiver, SessionHandle};

/// How long shutdown waits for open connections to send their close frame
const CONNECTION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket server for mock clients and dashboards
pub struct WebSocketServer {
    config: MockConfig,
    ctx: Arc<RelayContext>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketServer {
    /// Create a new WebSocket server
    pub fn new(config: MockConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let ctx = Arc::new(RelayContext::new(&config));
        Self {
            config,
            ctx,
            shutdown_tx,
        }
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = self.config.server.socket_addr();
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let local_addr = listener.local_addr()?;
        info!(
            "WebSocket server listening on ws://{}{}",
            local_addr, self.config.server.path
        );

        let announcer = self.config.announcer.enabled.then(|| {
            Announcer::spawn(
                self.config.broadcast.address,
                self.config.announcer.port,
                Duration::from_millis(self.config.announcer.interval_ms),
                local_addr.port(),
                self.config.server.path.clone(),
            )
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                // Accept new connections
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let ctx = Arc::clone(&self.ctx);
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            let path = self.config.server.path.clone();

                            connections.spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, path, ctx, shutdown_rx).await {
                                    error!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                // Reap finished connections
                Some(result) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = result {
                        warn!("Connection task panicked: {}", e);
                    }
                }
                // Handle shutdown signal
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        if self.ctx.broadcaster.is_active().await {
            self.ctx.broadcaster.stop().await;
        }
        if let Some(announcer) = announcer {
            announcer.shutdown().await;
        }

        let session_count = self.ctx.registry.len().await;
        if session_count > 0 {
            info!("Closing {} active sessions", session_count);
        }

        let drained = tokio::time::timeout(CONNECTION_DRAIN_TIMEOUT, async {
            while let Some(result) = connections.join_next().await {
                if let Err(e) = result {
                    warn!("Connection task panicked: {}", e);
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                "{} connections still open after {:?}, aborting them",
                connections.len(),
                CONNECTION_DRAIN_TIMEOUT
            );
            connections.abort_all();
        }

        Ok(())
    }
}

/// Handle a single WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    path: String,
    ctx: Arc<RelayContext>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    debug!("New TCP connection from {}", peer_addr);

    // Upgrade to WebSocket, rejecting other paths
    let check_path = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() == path {
            Ok(response)
        } else {
            warn!("Rejecting upgrade from {} for path {}", peer_addr, request.uri().path());
            let mut rejection = ErrorResponse::new(Some("Not Found".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };
    let ws_stream = accept_hdr_async(stream, check_path).await?;
    let (ws_sender, mut ws_receiver) = ws_stream.split();

    let (session, outbound) = SessionHandle::new(Some(peer_addr));
    let writer = tokio::spawn(write_frames(ws_sender, outbound));

    let handler = ConnectionHandler::new(session, ctx);
    handler.on_connect().await;

    // Message handling loop
    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handler.handle_text(&text).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!("Received binary message from {} ({} bytes), ignoring", peer_addr, data.len());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = handler.session().send(Message::Pong(data));
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!("Client {} requested close", peer_addr);
                        break;
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", peer_addr, e);
                        break;
                    }
                    None => {
                        debug!("Connection closed by {}", peer_addr);
                        break;
                    }
                }
            }
            // Handle shutdown signal
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, closing connection to {}", peer_addr);
                break;
            }
        }
    }

    handler.on_disconnect().await;
    let _ = handler.session().send(Message::Close(None));
    drop(handler);

    if let Err(e) = writer.await {
        warn!("Writer task for {} ended abnormally: {}", peer_addr, e);
    }
    Ok(())
}

/// Drain queued frames into the socket until a close frame, a write error,
/// or every sender is gone
async fn write_frames<S>(mut sink: S, mut outbound: FrameReceiver)
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            debug!("Write failed, stopping writer: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start_server(config: MockConfig) -> (Arc<WebSocketServer>, SocketAddr) {
        let (server, addr, _serving) = spawn_server(config).await;
        (server, addr)
    }

    async fn spawn_server(
        config: MockConfig,
    ) -> (
        Arc<WebSocketServer>,
        SocketAddr,
        tokio::task::JoinHandle<anyhow::Result<()>>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(WebSocketServer::new(config));
        let runner = Arc::clone(&server);
        let serving = tokio::spawn(async move { runner.serve(listener).await });
        (server, addr, serving)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        // Wait for registration so peers see each other in a known order
        let first = next_text(&mut ws).await;
        assert!(first.starts_with("CLIENT_COUNT:"), "unexpected first frame {}", first);
        ws
    }

    async fn next_text(ws: &mut Client) -> String {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .expect("websocket error");
            if let Message::Text(text) = msg {
                return text;
            }
        }
    }

    /// Next frame that is not a connect/disconnect/count notice
    async fn next_payload(ws: &mut Client) -> String {
        loop {
            let text = next_text(ws).await;
            if !text.starts_with("CLIENT_") {
                return text;
            }
        }
    }

    #[tokio::test]
    async fn test_three_session_round_trip() {
        let (server, addr) = start_server(MockConfig::default()).await;
        let mut s1 = connect(addr).await;
        let mut s2 = connect(addr).await;
        let mut s3 = connect(addr).await;

        s1.send(Message::Text(r#"{"action":"getData","requestId":"x"}"#.to_string()))
            .await
            .unwrap();

        let relayed = r#"API_REQUEST:{"action":"getData","data":{},"requestId":"x"}"#;
        assert_eq!(next_payload(&mut s2).await, relayed);
        assert_eq!(next_payload(&mut s3).await, relayed);

        let reply = r#"{"action":"getData","success":true,"data":{},"message":"ok","requestId":"x"}"#;
        s2.send(Message::Text(reply.to_string())).await.unwrap();
        assert_eq!(next_payload(&mut s1).await, reply);

        // s3 only ever sees the relayed request; a marker relay proves nothing else arrived first
        s1.send(Message::Text("marker".to_string())).await.unwrap();
        assert_eq!(next_payload(&mut s3).await, "marker");
        assert_eq!(next_payload(&mut s2).await, "marker");

        server.shutdown();
    }

    #[tokio::test]
    async fn test_get_server_ip() {
        let (server, addr) = start_server(MockConfig::default()).await;
        let mut ws = connect(addr).await;

        ws.send(Message::Text("GET_SERVER_IP".to_string())).await.unwrap();
        let reply = next_payload(&mut ws).await;
        let ip = reply.strip_prefix("SERVER_IP:").unwrap();
        assert!(!ip.is_empty());

        server.shutdown();
    }

    #[tokio::test]
    async fn test_disconnect_is_announced() {
        let (server, addr) = start_server(MockConfig::default()).await;
        let mut s1 = connect(addr).await;
        let mut s2 = connect(addr).await;
        assert_eq!(next_text(&mut s1).await, "CLIENT_CONNECTED:Client");
        assert_eq!(next_text(&mut s1).await, "CLIENT_COUNT:2");

        s2.close(None).await.unwrap();
        assert_eq!(next_text(&mut s1).await, "CLIENT_DISCONNECTED:Client");
        assert_eq!(next_text(&mut s1).await, "CLIENT_COUNT:1");

        server.shutdown();
    }

    #[tokio::test]
    async fn test_other_paths_rejected() {
        let (server, addr) = start_server(MockConfig::default()).await;
        let result = connect_async(format!("ws://{}/other", addr)).await;
        assert!(result.is_err());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_sends_close_frame() {
        let (server, addr, serving) = spawn_server(MockConfig::default()).await;
        let mut ws = connect(addr).await;

        server.shutdown();
        let received = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Close(_))) => return true,
                    Some(Ok(_)) => continue,
                    None | Some(Err(_)) => return false,
                }
            }
        })
        .await
        .expect("timed out waiting for close frame");
        assert!(received, "connection ended without a close frame");

        // serve returns only after every connection task has finished
        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .expect("serve did not return")
            .unwrap()
            .unwrap();
    }
}
