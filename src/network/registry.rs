//! Connection Registry
//!
//! Holds every live realtime connection keyed by an opaque connection id and
//! fans broadcasts out to all of them. The registry owns each connection's
//! outbox for the lifetime of the entry; nothing else writes to a transport
//! directly.
//!
//! Broadcast snapshots the recipient set under the read lock and delivers
//! outside it, so a slow or dead peer never holds the registry closed.
//! Each send is bounded by a timeout; a failed or timed-out send drops that
//! connection and nobody else.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use super::protocol::ServerFrame;

/// Unique handle for one registered connection.
pub type ConnectionId = Uuid;

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Longest the registry waits on a single recipient before treating the
    /// send as a delivery failure.
    pub send_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
        }
    }
}

/// One live connection.
struct Connection {
    /// Identity holding the session; several connections may share one.
    identity: String,
    /// Outbox draining into the connection's write pump.
    outbox: mpsc::Sender<ServerFrame>,
    /// When the connection registered.
    #[allow(dead_code)]
    registered_at: DateTime<Utc>,
}

/// Concurrent registry of live realtime connections.
pub struct ConnectionRegistry {
    config: RegistryConfig,
    connections: RwLock<HashMap<ConnectionId, Connection>>,
}

impl ConnectionRegistry {
    /// Create a registry with the given configuration.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection for an identity that already passed full-session
    /// validation. Returns the handle used to unregister it.
    pub async fn register(
        &self,
        identity: &str,
        outbox: mpsc::Sender<ServerFrame>,
    ) -> ConnectionId {
        let id = Uuid::new_v4();
        let mut connections = self.connections.write().await;
        connections.insert(
            id,
            Connection {
                identity: identity.to_string(),
                outbox,
                registered_at: Utc::now(),
            },
        );
        debug!(connection = %id, identity, "connection registered");
        id
    }

    /// Remove a connection. Returns whether it was present.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        let removed = connections.remove(&id);
        if let Some(ref connection) = removed {
            debug!(connection = %id, identity = %connection.identity, "connection unregistered");
        }
        removed.is_some()
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Deliver a chat message to every live connection, the sender included.
    ///
    /// Returns how many connections the message reached. Connections whose
    /// send fails or times out are unregistered; the rest are unaffected.
    pub async fn broadcast(&self, sender_identity: &str, message: &str) -> usize {
        let frame = ServerFrame::Chat {
            user_id: sender_identity.to_string(),
            message: message.to_string(),
        };

        // Snapshot the recipients; delivery happens without the lock.
        let targets: Vec<(ConnectionId, mpsc::Sender<ServerFrame>)> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .map(|(id, connection)| (*id, connection.outbox.clone()))
                .collect()
        };

        let send_timeout = self.config.send_timeout;
        let sends = targets.into_iter().map(|(id, outbox)| {
            let frame = frame.clone();
            async move {
                match timeout(send_timeout, outbox.send(frame)).await {
                    Ok(Ok(())) => (id, true),
                    _ => (id, false),
                }
            }
        });
        let outcomes = join_all(sends).await;

        let delivered = outcomes.iter().filter(|(_, ok)| *ok).count();
        let failed: Vec<ConnectionId> = outcomes
            .into_iter()
            .filter(|(_, ok)| !*ok)
            .map(|(id, _)| id)
            .collect();

        if !failed.is_empty() {
            let mut connections = self.connections.write().await;
            for id in failed {
                if connections.remove(&id).is_some() {
                    warn!(connection = %id, "dropped connection after failed delivery");
                }
            }
        }

        delivered
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
