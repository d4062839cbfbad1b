//! Realtime Relay Server
//!
//! Async WebSocket server for the global chat relay. Every connection runs
//! on its own task: the handshake presents a full-session token, the read
//! loop blocks on the next inbound frame, and broadcasts fan out through
//! the connection registry so one slow client cannot stall the rest.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

use crate::auth::{AuthGateway, SessionClaims};
use crate::network::protocol::{ClientFrame, ServerFrame};
use crate::network::registry::ConnectionRegistry;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// How long a fresh connection may take to present its auth frame.
    pub handshake_timeout: Duration,
    /// Outbox depth per connection.
    pub outbox_capacity: usize,
    /// Period of the token-store and governor sweep.
    pub maintenance_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("static bind address"),
            max_connections: 1000,
            handshake_timeout: Duration::from_secs(10),
            outbox_capacity: 64,
            maintenance_interval: Duration::from_secs(60),
        }
    }
}

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// The realtime relay.
pub struct RelayServer {
    /// Server configuration.
    config: RelayConfig,
    /// Gated authentication core; the handshake validates against it.
    gateway: Arc<AuthGateway>,
    /// Live connections.
    registry: Arc<ConnectionRegistry>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Create a new relay server.
    pub fn new(
        config: RelayConfig,
        gateway: Arc<AuthGateway>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            gateway,
            registry,
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), RelayServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Relay server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayServerError> {
        let maintenance_gateway = self.gateway.clone();
        let maintenance_period = self.config.maintenance_interval;
        let maintenance_handle = tokio::spawn(async move {
            Self::run_maintenance_loop(maintenance_gateway, maintenance_period).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.registry.connection_count().await >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        maintenance_handle.abort();
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let gateway = self.gateway.clone();
        let registry = self.registry.clone();
        let handshake_timeout = self.config.handshake_timeout;
        let outbox_capacity = self.config.outbox_capacity;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    debug!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();

            // The first frame must present a full-session token.
            let claims =
                match Self::await_auth(&mut ws_receiver, handshake_timeout, &gateway).await {
                    Ok(claims) => claims,
                    Err(reason) => {
                        debug!("Handshake rejected for {}: {}", addr, reason);
                        let frame = ServerFrame::Error { message: reason };
                        if let Ok(text) = frame.to_json() {
                            let _ = ws_sender.send(Message::Text(text)).await;
                        }
                        let _ = ws_sender.close().await;
                        return;
                    }
                };

            let (outbox_tx, mut outbox_rx) = mpsc::channel::<ServerFrame>(outbox_capacity);

            // Write pump: drains the outbox onto the socket. Ends when the
            // registry drops its sender or the socket dies.
            let sender_task = tokio::spawn(async move {
                while let Some(frame) = outbox_rx.recv().await {
                    let text = match frame.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to serialize frame: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            let connection_id = registry.register(&claims.sub, outbox_tx.clone()).await;
            let _ = outbox_tx.send(ServerFrame::welcome()).await;
            info!(identity = %claims.sub, "realtime session established for {}", addr);

            // Read loop: the only intentionally blocking per-connection await.
            loop {
                tokio::select! {
                    frame = ws_receiver.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                match ClientFrame::from_json(&text) {
                                    Ok(ClientFrame::Chat { message }) => {
                                        registry.broadcast(&claims.sub, &message).await;
                                    }
                                    Ok(ClientFrame::Auth { .. }) => {
                                        debug!("Redundant auth frame from {}", addr);
                                    }
                                    Err(_) => {
                                        // Malformed input closes this
                                        // connection and nobody else.
                                        debug!("Malformed frame from {}, closing", addr);
                                        let _ = outbox_tx
                                            .send(ServerFrame::Error {
                                                message: "malformed frame".to_string(),
                                            })
                                            .await;
                                        break;
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                            Some(Ok(Message::Binary(_))) => {
                                debug!("Binary frame from {}, closing", addr);
                                break;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            registry.unregister(connection_id).await;
            sender_task.abort();
            debug!("Client {} cleaned up", addr);
        });
    }

    /// Wait for the auth frame and validate its token.
    async fn await_auth(
        ws_receiver: &mut SplitStream<WebSocketStream<TcpStream>>,
        handshake_timeout: Duration,
        gateway: &Arc<AuthGateway>,
    ) -> Result<SessionClaims, String> {
        let first = tokio::time::timeout(handshake_timeout, ws_receiver.next()).await;
        let text = match first {
            Err(_) => return Err("handshake timed out".to_string()),
            Ok(None) => return Err("connection closed".to_string()),
            Ok(Some(Err(_))) => return Err("connection error".to_string()),
            Ok(Some(Ok(Message::Text(text)))) => text,
            Ok(Some(Ok(_))) => return Err("expected auth frame".to_string()),
        };

        match ClientFrame::from_json(&text) {
            Ok(ClientFrame::Auth { token }) => gateway
                .machine()
                .validate(&token)
                .map_err(|_| "authentication failed".to_string()),
            _ => Err("expected auth frame".to_string()),
        }
    }

    /// Periodic sweep of expired token entries and rate windows.
    async fn run_maintenance_loop(gateway: Arc<AuthGateway>, period: Duration) {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            match gateway.machine().token_store().purge_expired().await {
                Ok(0) => {}
                Ok(count) => debug!("Purged {} expired token entries", count),
                Err(e) => warn!("Token store sweep failed: {}", e),
            }
            gateway.governor().sweep();
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.registry.connection_count().await
    }
}

// =============================================================================
// TESTS
// =============================================================================
