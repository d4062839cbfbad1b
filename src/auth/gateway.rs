//! Gated Entry Points
//!
//! The boundary layer routes every authentication request through the rate
//! governor before the state machine sees it. This module is that ordering,
//! factored out so every surface (HTTP, realtime handshake, tests) gets the
//! same behavior: admit first, then do credential work.

use std::sync::Arc;

use tracing::debug;

use crate::directory::{Role, SecondFactorSeed};

use super::error::AuthFlowError;
use super::machine::{IssuedToken, SessionStateMachine};
use super::rate::{Admission, RateGovernor};

/// Rate-gated facade over the session state machine.
///
/// `key` is the caller-supplied client discriminator (typically a network
/// address); the gateway is agnostic to what it represents.
pub struct AuthGateway {
    machine: Arc<SessionStateMachine>,
    governor: Arc<RateGovernor>,
}

impl AuthGateway {
    /// Wire a gateway over a machine and governor.
    pub fn new(machine: Arc<SessionStateMachine>, governor: Arc<RateGovernor>) -> Self {
        Self { machine, governor }
    }

    /// The underlying state machine (for ungated internal checks).
    pub fn machine(&self) -> &Arc<SessionStateMachine> {
        &self.machine
    }

    /// The governor guarding these entry points.
    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    /// Gated [`SessionStateMachine::register`].
    pub async fn register(
        &self,
        key: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<SecondFactorSeed, AuthFlowError> {
        self.admit(key)?;
        self.machine.register(email, password, role).await
    }

    /// Gated [`SessionStateMachine::login`].
    pub async fn login(
        &self,
        key: &str,
        email: &str,
        password: &str,
    ) -> Result<IssuedToken, AuthFlowError> {
        self.admit(key)?;
        self.machine.login(email, password).await
    }

    /// Gated [`SessionStateMachine::verify_second_factor`].
    pub async fn verify_second_factor(
        &self,
        key: &str,
        partial_token: &str,
        code: &str,
    ) -> Result<IssuedToken, AuthFlowError> {
        self.admit(key)?;
        self.machine.verify_second_factor(partial_token, code).await
    }

    /// Gated [`SessionStateMachine::external_exchange`].
    pub async fn external_exchange(
        &self,
        key: &str,
        provider_code: &str,
    ) -> Result<IssuedToken, AuthFlowError> {
        self.admit(key)?;
        self.machine.external_exchange(provider_code).await
    }

    fn admit(&self, key: &str) -> Result<(), AuthFlowError> {
        match self.governor.admit(key) {
            Admission::Allowed => Ok(()),
            Admission::Rejected => {
                debug!(key, "request rejected by rate governor");
                Err(AuthFlowError::RateLimited)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::machine::MachineConfig;
    use crate::auth::rate::RateConfig;
    use crate::auth::token_store::TokenStore;
    use crate::directory::provider::UnconfiguredProvider;
    use crate::directory::MemoryRecordStore;
    use crate::notify::NullSink;
    use std::time::Duration;

    fn gateway(ceiling: u32) -> AuthGateway {
        let machine = SessionStateMachine::new(
            MachineConfig::new("test-secret-key-256-bits-long!!".into()),
            Arc::new(MemoryRecordStore::new()),
            TokenStore::in_memory(),
            Arc::new(NullSink),
            Arc::new(UnconfiguredProvider),
        );
        let governor = RateGovernor::new(RateConfig {
            ceiling,
            window: Duration::from_secs(60),
        });
        AuthGateway::new(Arc::new(machine), Arc::new(governor))
    }

    #[tokio::test]
    async fn test_ceiling_hits_before_credential_work() {
        let gateway = gateway(3);
        gateway
            .machine()
            .register("a@x.com", "pw-long-enough", Role::User)
            .await
            .unwrap();

        // Three correct logins pass, the fourth is rejected by the governor
        // even though the credentials are right.
        for _ in 0..3 {
            gateway.login("10.0.0.1", "a@x.com", "pw-long-enough").await.unwrap();
        }
        let result = gateway.login("10.0.0.1", "a@x.com", "pw-long-enough").await;
        assert!(matches!(result, Err(AuthFlowError::RateLimited)));
    }

    #[tokio::test]
    async fn test_other_keys_unaffected() {
        let gateway = gateway(1);
        gateway
            .machine()
            .register("a@x.com", "pw-long-enough", Role::User)
            .await
            .unwrap();

        gateway.login("10.0.0.1", "a@x.com", "pw-long-enough").await.unwrap();
        assert!(matches!(
            gateway.login("10.0.0.1", "a@x.com", "pw-long-enough").await,
            Err(AuthFlowError::RateLimited)
        ));

        // A different discriminator still gets through.
        gateway.login("10.0.0.2", "a@x.com", "pw-long-enough").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_attempts_share_window_across_operations() {
        let gateway = gateway(2);

        // Register and verify count against the same key as login.
        let _ = gateway
            .register("10.0.0.1", "a@x.com", "pw-long-enough", Role::User)
            .await;
        let _ = gateway.login("10.0.0.1", "a@x.com", "pw-long-enough").await;

        let result = gateway
            .verify_second_factor("10.0.0.1", "some-token", "123456")
            .await;
        assert!(matches!(result, Err(AuthFlowError::RateLimited)));
    }
}
