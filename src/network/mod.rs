//! Network Layer
//!
//! WebSocket relay for realtime traffic. Tokens and identities come from
//! `auth`; this layer only moves frames between live full-session holders.

pub mod protocol;
pub mod registry;
pub mod server;

pub use protocol::{ClientFrame, MalformedFrame, ServerFrame, WELCOME_MESSAGE};
pub use registry::{ConnectionId, ConnectionRegistry, RegistryConfig};
pub use server::{RelayConfig, RelayServer, RelayServerError};
