//! # Gatehouse Server
//!
//! Identity and realtime-session core: multi-factor login, short-lived
//! session tokens, per-client rate limiting, and a live message relay for
//! fully authenticated sessions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      GATEHOUSE SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  auth/           - Authentication core                       │
//! │  ├── secrets.rs  - Password hash, TOTP codes, signed tokens  │
//! │  ├── machine.rs  - Register → Login → VerifySecondFactor     │
//! │  ├── token_store.rs - Issued-token bookkeeping               │
//! │  ├── rate.rs     - Fixed-window request governor             │
//! │  └── gateway.rs  - Admit-then-authenticate entry points      │
//! │                                                              │
//! │  directory/      - External collaborators (traits)           │
//! │  ├── mod.rs      - Identity records                          │
//! │  └── provider.rs - Delegated-login exchange                  │
//! │                                                              │
//! │  notify/         - Best-effort registration notifications    │
//! │                                                              │
//! │  network/        - Realtime relay                            │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── registry.rs - Live connection registry + broadcast      │
//! │  └── protocol.rs - Frame types                               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Session Ladder
//!
//! A credential check yields a PARTIAL token good only for second-factor
//! verification; a valid code upgrades it to a FULL token that unlocks
//! protected operations and realtime registration. Tokens are immutable
//! and self-verifying: the token store is auxiliary bookkeeping, so
//! issuance survives a store outage.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod auth;
pub mod directory;
pub mod network;
pub mod notify;

// Re-export commonly used types
pub use auth::{
    AuthFlowError, AuthGateway, FactorLevel, IssuedToken, MachineConfig, RateConfig, RateGovernor,
    SessionClaims, SessionStateMachine, TokenStore,
};
pub use directory::{Identity, MemoryRecordStore, RecordStore, Role, SecondFactorSeed};
pub use network::{ConnectionRegistry, RelayConfig, RelayServer, ServerFrame};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Partial-token lifetime (seconds)
pub const PARTIAL_TOKEN_TTL_SECS: i64 = 300;

/// Full-token lifetime (seconds)
pub const FULL_TOKEN_TTL_SECS: i64 = 86_400;

/// Default requests admitted per key per window
pub const DEFAULT_RATE_CEILING: u32 = 100;

/// Default rate window length (seconds)
pub const DEFAULT_RATE_WINDOW_SECS: u64 = 60;
