//! Outbound Notifications
//!
//! Registration raises a best-effort event: one non-blocking enqueue
//! attempt, failure logged and swallowed. A background worker drains the
//! queue and hands events to the mail gateway; delivery failures stay in
//! the worker and never reach the registration path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Event raised when a new identity registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationEvent {
    /// Opaque id of the new identity.
    pub identity_id: String,
    /// Email the identity registered with.
    pub email: String,
    /// When the registration happened.
    pub occurred_at: DateTime<Utc>,
}

/// Enqueue failure; callers log it and move on.
#[derive(Debug, Error)]
#[error("notification queue rejected event: {0}")]
pub struct SinkError(pub String);

/// Non-blocking event sink.
pub trait EventSink: Send + Sync {
    /// Make exactly one attempt to enqueue the event.
    fn enqueue(&self, event: RegistrationEvent) -> Result<(), SinkError>;
}

/// Sink backed by a bounded channel. A full or closed channel fails the
/// single attempt immediately; nothing ever blocks on the queue.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<RegistrationEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver its worker drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RegistrationEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn enqueue(&self, event: RegistrationEvent) -> Result<(), SinkError> {
        self.tx
            .try_send(event)
            .map_err(|e| SinkError(e.to_string()))
    }
}

/// Sink that drops everything; used when notifications are disabled.
pub struct NullSink;

impl EventSink for NullSink {
    fn enqueue(&self, event: RegistrationEvent) -> Result<(), SinkError> {
        debug!(identity_id = %event.identity_id, "notifications disabled, dropping event");
        Ok(())
    }
}

/// Mail delivery failure.
#[derive(Debug, Error)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

/// Outbound mail gateway.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver the welcome message for a registration.
    async fn send_welcome(&self, event: &RegistrationEvent) -> Result<(), MailError>;
}

/// Mailer that only logs; the default when no gateway is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_welcome(&self, event: &RegistrationEvent) -> Result<(), MailError> {
        info!(email = %event.email, "welcome mail (log only)");
        Ok(())
    }
}

/// Drain the queue until every sender is dropped.
///
/// Each event gets one delivery attempt; a failure is logged and the worker
/// moves to the next event.
pub async fn run_delivery_worker<M: Mailer>(
    mut rx: mpsc::Receiver<RegistrationEvent>,
    mailer: M,
) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = mailer.send_welcome(&event).await {
            warn!(email = %event.email, error = %e, "welcome mail delivery failed");
        }
    }
    debug!("notification worker stopped");
}
