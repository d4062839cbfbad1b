//! Authentication Flow Errors
//!
//! The single error taxonomy the session state machine exposes to callers.
//! Lower layers (secret primitives, token store, record store) have their
//! own error types; the machine maps them into these kinds and never leaks
//! backend detail past this boundary.

use thiserror::Error;

/// Errors surfaced by the authentication core.
#[derive(Debug, Error)]
pub enum AuthFlowError {
    /// Malformed or duplicate input, the caller's fault.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Credential, token, or code rejected.
    ///
    /// Deliberately undifferentiated: unknown email, wrong password,
    /// missing local credential, bad code, and bad/expired tokens all
    /// collapse into this kind so a caller cannot enumerate identities.
    #[error("authentication failed")]
    Authentication,

    /// Request rejected by the rate governor.
    #[error("rate limit exceeded")]
    RateLimited,

    /// A backing store could not be reached and the operation cannot
    /// proceed without it.
    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    /// The external identity provider rejected or failed the exchange.
    #[error("identity provider exchange failed: {0}")]
    Provider(String),
}
