//! Protocol Frames
//!
//! Wire format for the realtime relay over WebSocket. All frames are JSON
//! text. Inbound chat accepts both the tagged form and a bare
//! `{"message": ...}` object; outbound broadcasts always carry the sender's
//! identity.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Text of the welcome frame sent after a successful handshake.
pub const WELCOME_MESSAGE: &str = "Welcome to global chat!";

/// A frame the relay could not parse. The offending connection is closed;
/// nobody else is affected.
#[derive(Debug, Error)]
#[error("malformed frame")]
pub struct MalformedFrame;

// =============================================================================
// CLIENT -> SERVER FRAMES
// =============================================================================

/// Frames sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Present a full-session token during the handshake.
    Auth {
        /// Bearer token from `VerifySecondFactor`.
        token: String,
    },

    /// Send a chat message to every live connection.
    Chat {
        /// Message text.
        message: String,
    },
}

impl ClientFrame {
    /// Parse a text frame.
    pub fn from_json(text: &str) -> Result<Self, MalformedFrame> {
        if let Ok(frame) = serde_json::from_str::<ClientFrame>(text) {
            return Ok(frame);
        }
        // Bare `{"message": ...}` objects are accepted as chat.
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Bare {
            message: String,
        }
        serde_json::from_str::<Bare>(text)
            .map(|bare| ClientFrame::Chat {
                message: bare.message,
            })
            .map_err(|_| MalformedFrame)
    }
}

// =============================================================================
// SERVER -> CLIENT FRAMES
// =============================================================================

/// Frames sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Sent once after a successful handshake.
    Welcome {
        /// Greeting text.
        message: String,
    },

    /// A broadcast chat message.
    Chat {
        /// Identity id of the sender.
        user_id: String,
        /// Message text.
        message: String,
    },

    /// Terminal error, sent before the server closes the connection.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl ServerFrame {
    /// The standard welcome frame.
    pub fn welcome() -> Self {
        ServerFrame::Welcome {
            message: WELCOME_MESSAGE.to_string(),
        }
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
