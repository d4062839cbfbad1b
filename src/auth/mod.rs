//! Authentication Core
//!
//! The multi-factor session ladder and the shared state behind it.
//!
//! - `secrets`: pure wrappers around the provided crypto primitives
//! - `machine`: the Register → Login → VerifySecondFactor state machine
//! - `token_store`: shared bookkeeping for issued tokens
//! - `rate`: fixed-window request governor
//! - `gateway`: admit-then-authenticate entry points
//! - `error`: the one taxonomy callers see

pub mod error;
pub mod gateway;
pub mod machine;
pub mod rate;
pub mod secrets;
pub mod token_store;

pub use error::AuthFlowError;
pub use gateway::AuthGateway;
pub use machine::{IssuedToken, MachineConfig, SessionStateMachine};
pub use rate::{Admission, RateConfig, RateGovernor};
pub use secrets::{FactorLevel, SessionClaims, TokenCodec};
pub use token_store::{MemoryTokenBackend, StoreError, StoredToken, TokenBackend, TokenStore};
