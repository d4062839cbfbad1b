//! External Identity Provider
//!
//! Provider-delegated login is reduced to a single exchange: an opaque
//! authorization code goes in, a verified email plus stable external id
//! come out. The OAuth-style protocol itself lives outside the core.

use async_trait::async_trait;
use thiserror::Error;

/// The result of a successful provider exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIdentity {
    /// Stable opaque id assigned by the provider.
    pub external_id: String,
    /// Email address the provider has verified.
    pub email: String,
}

/// Provider exchange failure.
#[derive(Debug, Error)]
#[error("identity exchange failed: {0}")]
pub struct ProviderError(pub String);

/// External identity exchange interface.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange an authorization code for a verified identity.
    async fn exchange(&self, code: &str) -> Result<ProviderIdentity, ProviderError>;
}

/// Placeholder used when no provider is wired in; every exchange fails.
pub struct UnconfiguredProvider;

#[async_trait]
impl IdentityProvider for UnconfiguredProvider {
    async fn exchange(&self, _code: &str) -> Result<ProviderIdentity, ProviderError> {
        Err(ProviderError("identity provider not configured".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_provider_always_fails() {
        let provider = UnconfiguredProvider;
        let result = provider.exchange("any-code").await;
        assert!(result.is_err());
    }
}
