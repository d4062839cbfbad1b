//! Session State Machine
//!
//! Orchestrates the multi-factor login ladder:
//! `Unauthenticated → PartialAuthenticated → FullyAuthenticated`.
//!
//! Register and the provider exchange create identities through the external
//! record store; login and second-factor verification move a caller up the
//! ladder by issuing tokens; `validate` is the pure check every protected
//! operation and realtime registration runs against.

use std::sync::Arc;

use chrono::{Duration, Utc};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::directory::provider::IdentityProvider;
use crate::directory::{NewIdentity, RecordError, RecordStore, Role, SecondFactorSeed};
use crate::notify::{EventSink, RegistrationEvent};

use super::error::AuthFlowError;
use super::secrets::{self, token_fingerprint, FactorLevel, SessionClaims, TokenCodec};
use super::token_store::TokenStore;

/// Shape check for registration emails. Deliberately loose: one `@`, no
/// whitespace, a dot somewhere in the domain.
const EMAIL_SHAPE: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

/// Machine configuration, injected at startup.
///
/// The signing secret lives for the process lifetime and rotates only by
/// restart.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// HS256 signing secret for session tokens.
    pub signing_secret: String,
    /// Partial-token lifetime.
    pub partial_ttl: Duration,
    /// Full-token lifetime.
    pub full_ttl: Duration,
}

impl MachineConfig {
    /// Config with standard token lifetimes.
    pub fn new(signing_secret: String) -> Self {
        Self {
            signing_secret,
            partial_ttl: Duration::seconds(crate::PARTIAL_TOKEN_TTL_SECS),
            full_ttl: Duration::seconds(crate::FULL_TOKEN_TTL_SECS),
        }
    }

    /// Read the signing secret from `AUTH_SECRET`. `None` when unset.
    pub fn from_env() -> Option<Self> {
        std::env::var("AUTH_SECRET").ok().map(Self::new)
    }
}

/// A signed token handed to a caller, with its decoded claims.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Opaque bearer string.
    pub value: String,
    /// Claims embedded in the token.
    pub claims: SessionClaims,
}

impl IssuedToken {
    /// Factor level the token reaches.
    pub fn factor(&self) -> FactorLevel {
        self.claims.factor
    }
}

/// The authentication core.
pub struct SessionStateMachine {
    codec: TokenCodec,
    partial_ttl: Duration,
    full_ttl: Duration,
    email_shape: Regex,
    records: Arc<dyn RecordStore>,
    tokens: TokenStore,
    sink: Arc<dyn EventSink>,
    provider: Arc<dyn IdentityProvider>,
}

impl SessionStateMachine {
    /// Wire the machine to its collaborators.
    pub fn new(
        config: MachineConfig,
        records: Arc<dyn RecordStore>,
        tokens: TokenStore,
        sink: Arc<dyn EventSink>,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            codec: TokenCodec::new(&config.signing_secret),
            partial_ttl: config.partial_ttl,
            full_ttl: config.full_ttl,
            email_shape: Regex::new(EMAIL_SHAPE).expect("email pattern compiles"),
            records,
            tokens,
            sink,
            provider,
        }
    }

    /// The token bookkeeping store backing this machine.
    pub fn token_store(&self) -> &TokenStore {
        &self.tokens
    }

    /// Create a new identity with a local credential.
    ///
    /// Returns the second-factor seed exactly once; it is not re-derivable
    /// and the caller is responsible for out-of-band delivery.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<SecondFactorSeed, AuthFlowError> {
        if !self.email_shape.is_match(email) {
            return Err(AuthFlowError::Validation("email is not well-formed".into()));
        }
        if self
            .records
            .find_by_email(email)
            .await
            .map_err(record_unavailable)?
            .is_some()
        {
            return Err(AuthFlowError::Validation("email already registered".into()));
        }

        let credential_hash = secrets::hash_password(password).map_err(primitives_unavailable)?;
        let seed = secrets::generate_seed().map_err(primitives_unavailable)?;

        let identity = self
            .records
            .create(NewIdentity {
                email: email.to_string(),
                credential_hash: Some(credential_hash),
                role,
                external_id: None,
                second_factor_seed: seed.clone(),
            })
            .await
            .map_err(|e| match e {
                RecordError::Duplicate => {
                    AuthFlowError::Validation("email already registered".into())
                }
                other => record_unavailable(other),
            })?;

        // One enqueue attempt; registration succeeds regardless.
        let event = RegistrationEvent {
            identity_id: identity.id.clone(),
            email: identity.email.clone(),
            occurred_at: Utc::now(),
        };
        if let Err(e) = self.sink.enqueue(event) {
            warn!(identity_id = %identity.id, error = %e, "registration notification enqueue failed");
        }

        info!(identity_id = %identity.id, role = %identity.role, "registered new identity");
        Ok(seed)
    }

    /// First factor: check a local credential and issue a partial token.
    ///
    /// Unknown email, provider-only identity, and wrong password are
    /// indistinguishable to the caller.
    pub async fn login(&self, email: &str, password: &str) -> Result<IssuedToken, AuthFlowError> {
        let identity = match self
            .records
            .find_by_email(email)
            .await
            .map_err(record_unavailable)?
        {
            Some(identity) => identity,
            None => {
                debug!("login rejected: no record for email");
                return Err(AuthFlowError::Authentication);
            }
        };

        let Some(hash) = identity.credential_hash.as_deref() else {
            debug!(identity_id = %identity.id, "login rejected: provider-only identity");
            return Err(AuthFlowError::Authentication);
        };

        if !secrets::verify_password(password, hash) {
            debug!(identity_id = %identity.id, "login rejected: credential mismatch");
            return Err(AuthFlowError::Authentication);
        }

        self.issue(&identity.id, identity.role, FactorLevel::Partial)
            .await
    }

    /// Second factor: trade a partial token plus a valid code for a full
    /// token.
    ///
    /// Replaying an already-full token returns it unchanged. A code mismatch
    /// leaves the partial token usable for a retry until its own expiry.
    pub async fn verify_second_factor(
        &self,
        partial_token: &str,
        code: &str,
    ) -> Result<IssuedToken, AuthFlowError> {
        let claims = self.codec.verify(partial_token).map_err(|e| {
            debug!(error = %e, "second-factor token rejected");
            AuthFlowError::Authentication
        })?;

        if claims.factor == FactorLevel::Full {
            debug!(token = %token_fingerprint(partial_token), "token already full, returning unchanged");
            return Ok(IssuedToken {
                value: partial_token.to_string(),
                claims,
            });
        }

        let identity = self
            .records
            .find_by_id(&claims.sub)
            .await
            .map_err(record_unavailable)?
            .ok_or(AuthFlowError::Authentication)?;

        let valid = secrets::verify_code(&identity.second_factor_seed, code)
            .map_err(primitives_unavailable)?;
        if !valid {
            debug!(identity_id = %identity.id, "second-factor code mismatch");
            return Err(AuthFlowError::Authentication);
        }

        // Role comes from the partial token's claims, not a fresh record read.
        self.issue(&claims.sub, claims.role, FactorLevel::Full)
            .await
    }

    /// Provider-delegated login: exchange a code, find or create the
    /// identity, and issue a partial token exactly as `login` does.
    ///
    /// Identities created here carry no local credential, so local login
    /// for them always fails; the provider exchange is their only first
    /// factor.
    pub async fn external_exchange(
        &self,
        provider_code: &str,
    ) -> Result<IssuedToken, AuthFlowError> {
        let exchanged = self
            .provider
            .exchange(provider_code)
            .await
            .map_err(|e| AuthFlowError::Provider(e.0))?;

        let identity = match self
            .records
            .find_by_external_id(&exchanged.external_id)
            .await
            .map_err(record_unavailable)?
        {
            Some(identity) => identity,
            None => {
                let seed = secrets::generate_seed().map_err(primitives_unavailable)?;
                let created = self
                    .records
                    .create(NewIdentity {
                        email: exchanged.email.clone(),
                        credential_hash: None,
                        role: Role::User,
                        external_id: Some(exchanged.external_id.clone()),
                        second_factor_seed: seed,
                    })
                    .await
                    .map_err(|e| match e {
                        RecordError::Duplicate => {
                            AuthFlowError::Provider("conflicting identity record".into())
                        }
                        other => record_unavailable(other),
                    })?;
                info!(identity_id = %created.id, "created identity from provider exchange");
                created
            }
        };

        self.issue(&identity.id, identity.role, FactorLevel::Partial)
            .await
    }

    /// Pure full-session check used by protected operations and realtime
    /// registration.
    ///
    /// Signature and expiry are self-contained in the token; partial tokens
    /// are always rejected. No store round-trip happens here.
    pub fn validate(&self, token: &str) -> Result<SessionClaims, AuthFlowError> {
        let claims = self
            .codec
            .verify(token)
            .map_err(|_| AuthFlowError::Authentication)?;
        if claims.factor != FactorLevel::Full {
            return Err(AuthFlowError::Authentication);
        }
        Ok(claims)
    }

    /// Sign, record, and return a token for `subject`.
    async fn issue(
        &self,
        subject: &str,
        role: Role,
        factor: FactorLevel,
    ) -> Result<IssuedToken, AuthFlowError> {
        let now = Utc::now();
        let ttl = match factor {
            FactorLevel::Partial => self.partial_ttl,
            FactorLevel::Full => self.full_ttl,
        };
        let claims = SessionClaims {
            sub: subject.to_string(),
            role,
            factor,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        let value = self.codec.sign(&claims).map_err(primitives_unavailable)?;

        // The store write is auxiliary bookkeeping: the token is valid by
        // signature alone, so a store failure degrades rather than fails.
        if let Err(e) = self.tokens.put(&value, subject, claims.expires_at()).await {
            warn!(token = %token_fingerprint(&value), error = %e, "token store write failed, issuing anyway");
        }

        debug!(token = %token_fingerprint(&value), factor = ?factor, "issued session token");
        Ok(IssuedToken { value, claims })
    }
}

fn record_unavailable(e: RecordError) -> AuthFlowError {
    AuthFlowError::Unavailable(e.to_string())
}

fn primitives_unavailable(e: secrets::SecretError) -> AuthFlowError {
    AuthFlowError::Unavailable(e.to_string())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token_store::{StoreError, StoredToken, TokenBackend};
    use crate::directory::provider::{ProviderError, ProviderIdentity};
    use crate::directory::MemoryRecordStore;
    use crate::notify::{ChannelSink, NullSink, SinkError};
    use async_trait::async_trait;
    use chrono::DateTime;

    const TEST_SECRET: &str = "test-secret-key-256-bits-long!!";

    struct FailingSink;

    impl EventSink for FailingSink {
        fn enqueue(&self, _event: RegistrationEvent) -> Result<(), SinkError> {
            Err(SinkError("queue gone".into()))
        }
    }

    struct FailingTokenBackend;

    #[async_trait]
    impl TokenBackend for FailingTokenBackend {
        async fn put(&self, _key: String, _entry: StoredToken) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("backend down".into()))
        }
        async fn get(&self, _key: &str) -> Result<Option<StoredToken>, StoreError> {
            Err(StoreError::Unavailable("backend down".into()))
        }
        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("backend down".into()))
        }
        async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("backend down".into()))
        }
    }

    struct StaticProvider {
        identity: ProviderIdentity,
    }

    #[async_trait]
    impl IdentityProvider for StaticProvider {
        async fn exchange(&self, code: &str) -> Result<ProviderIdentity, ProviderError> {
            if code == "good-code" {
                Ok(self.identity.clone())
            } else {
                Err(ProviderError("code rejected".into()))
            }
        }
    }

    fn machine_with(
        records: Arc<MemoryRecordStore>,
        tokens: TokenStore,
        sink: Arc<dyn EventSink>,
    ) -> SessionStateMachine {
        SessionStateMachine::new(
            MachineConfig::new(TEST_SECRET.into()),
            records,
            tokens,
            sink,
            Arc::new(StaticProvider {
                identity: ProviderIdentity {
                    external_id: "ext-42".into(),
                    email: "provider@x.com".into(),
                },
            }),
        )
    }

    fn machine() -> (SessionStateMachine, Arc<MemoryRecordStore>) {
        let records = Arc::new(MemoryRecordStore::new());
        let m = machine_with(
            Arc::clone(&records),
            TokenStore::in_memory(),
            Arc::new(NullSink),
        );
        (m, records)
    }

    #[tokio::test]
    async fn test_full_ladder_preserves_role() {
        let (machine, records) = machine();

        let seed = machine
            .register("a@x.com", "pw-long-enough", Role::User)
            .await
            .unwrap();

        let partial = machine.login("a@x.com", "pw-long-enough").await.unwrap();
        assert_eq!(partial.factor(), FactorLevel::Partial);

        let code = secrets::current_code(&seed).unwrap();
        let full = machine
            .verify_second_factor(&partial.value, &code)
            .await
            .unwrap();
        assert_eq!(full.factor(), FactorLevel::Full);

        let claims = machine.validate(&full.value).unwrap();
        let identity = records.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(claims.sub, identity.id);
        assert_eq!(claims.role, Role::User);
    }

    #[tokio::test]
    async fn test_register_rejects_malformed_email() {
        let (machine, _) = machine();
        for bad in ["", "nope", "no-at.example.com", "two@@x.com ", "a@b"] {
            let result = machine.register(bad, "pw-long-enough", Role::User).await;
            assert!(
                matches!(result, Err(AuthFlowError::Validation(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_email() {
        let (machine, _) = machine();
        machine
            .register("a@x.com", "pw-long-enough", Role::User)
            .await
            .unwrap();

        let result = machine.register("a@x.com", "other-pw", Role::Admin).await;
        assert!(matches!(result, Err(AuthFlowError::Validation(_))));
    }

    #[tokio::test]
    async fn test_register_survives_sink_failure() {
        let records = Arc::new(MemoryRecordStore::new());
        let machine = machine_with(
            Arc::clone(&records),
            TokenStore::in_memory(),
            Arc::new(FailingSink),
        );

        machine
            .register("a@x.com", "pw-long-enough", Role::User)
            .await
            .unwrap();
        assert_eq!(records.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_register_enqueues_notification() {
        let (sink, mut rx) = ChannelSink::new(4);
        let records = Arc::new(MemoryRecordStore::new());
        let machine = machine_with(Arc::clone(&records), TokenStore::in_memory(), Arc::new(sink));

        machine
            .register("a@x.com", "pw-long-enough", Role::User)
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.email, "a@x.com");
    }

    #[tokio::test]
    async fn test_login_failures_are_uniform() {
        let (machine, records) = machine();
        machine
            .register("a@x.com", "pw-long-enough", Role::User)
            .await
            .unwrap();

        // Provider-only identity: record with no local credential.
        records
            .create(NewIdentity {
                email: "ext@x.com".into(),
                credential_hash: None,
                role: Role::User,
                external_id: Some("ext-9".into()),
                second_factor_seed: secrets::generate_seed().unwrap(),
            })
            .await
            .unwrap();

        let unknown = machine.login("nobody@x.com", "pw-long-enough").await;
        let wrong_pw = machine.login("a@x.com", "wrong-password").await;
        let provider_only = machine.login("ext@x.com", "pw-long-enough").await;

        for result in [unknown, wrong_pw, provider_only] {
            match result {
                Err(AuthFlowError::Authentication) => {}
                other => panic!("expected uniform authentication failure, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_wrong_code_leaves_partial_usable() {
        let (machine, _) = machine();
        let seed = machine
            .register("a@x.com", "pw-long-enough", Role::User)
            .await
            .unwrap();
        let partial = machine.login("a@x.com", "pw-long-enough").await.unwrap();

        let code = secrets::current_code(&seed).unwrap();
        let wrong: String = code
            .chars()
            .map(|c| {
                let d = c.to_digit(10).unwrap();
                char::from_digit((d + 1) % 10, 10).unwrap()
            })
            .collect();

        let rejected = machine.verify_second_factor(&partial.value, &wrong).await;
        assert!(matches!(rejected, Err(AuthFlowError::Authentication)));

        // The same partial token still upgrades with the correct code.
        let full = machine
            .verify_second_factor(&partial.value, &code)
            .await
            .unwrap();
        assert_eq!(full.factor(), FactorLevel::Full);
    }

    #[tokio::test]
    async fn test_verify_is_idempotent_on_full_token() {
        let (machine, _) = machine();
        let seed = machine
            .register("a@x.com", "pw-long-enough", Role::User)
            .await
            .unwrap();
        let partial = machine.login("a@x.com", "pw-long-enough").await.unwrap();
        let code = secrets::current_code(&seed).unwrap();
        let full = machine
            .verify_second_factor(&partial.value, &code)
            .await
            .unwrap();

        // Replaying the full token hands it back unchanged, code ignored.
        let replay = machine
            .verify_second_factor(&full.value, "000000")
            .await
            .unwrap();
        assert_eq!(replay.value, full.value);
        assert_eq!(replay.factor(), FactorLevel::Full);
    }

    #[tokio::test]
    async fn test_partial_token_never_validates() {
        let (machine, _) = machine();
        machine
            .register("a@x.com", "pw-long-enough", Role::User)
            .await
            .unwrap();
        let partial = machine.login("a@x.com", "pw-long-enough").await.unwrap();

        let result = machine.validate(&partial.value);
        assert!(matches!(result, Err(AuthFlowError::Authentication)));
    }

    #[tokio::test]
    async fn test_garbage_tokens_rejected_everywhere() {
        let (machine, _) = machine();
        assert!(matches!(
            machine.validate("not-a-token"),
            Err(AuthFlowError::Authentication)
        ));
        assert!(matches!(
            machine.verify_second_factor("not-a-token", "123456").await,
            Err(AuthFlowError::Authentication)
        ));
    }

    #[tokio::test]
    async fn test_expired_partial_rejected() {
        let (machine, records) = machine();
        machine
            .register("a@x.com", "pw-long-enough", Role::User)
            .await
            .unwrap();
        let identity = records.find_by_email("a@x.com").await.unwrap().unwrap();

        // Craft an expired partial token under the same signing secret.
        let codec = TokenCodec::new(TEST_SECRET);
        let now = Utc::now().timestamp();
        let stale = codec
            .sign(&SessionClaims {
                sub: identity.id,
                role: Role::User,
                factor: FactorLevel::Partial,
                iat: now - 600,
                exp: now - 300,
            })
            .unwrap();

        let result = machine.verify_second_factor(&stale, "123456").await;
        assert!(matches!(result, Err(AuthFlowError::Authentication)));
    }

    #[tokio::test]
    async fn test_issuance_records_token_with_embedded_expiry() {
        let (machine, _) = machine();
        machine
            .register("a@x.com", "pw-long-enough", Role::User)
            .await
            .unwrap();
        let partial = machine.login("a@x.com", "pw-long-enough").await.unwrap();

        let entry = machine
            .token_store()
            .get(&partial.value)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.subject, partial.claims.sub);
        assert_eq!(entry.expires_at, partial.claims.expires_at());
    }

    #[tokio::test]
    async fn test_degraded_mode_issues_despite_store_failure() {
        let records = Arc::new(MemoryRecordStore::new());
        let machine = machine_with(
            Arc::clone(&records),
            TokenStore::new(Arc::new(FailingTokenBackend)),
            Arc::new(NullSink),
        );

        let seed = machine
            .register("a@x.com", "pw-long-enough", Role::User)
            .await
            .unwrap();
        let partial = machine.login("a@x.com", "pw-long-enough").await.unwrap();
        let code = secrets::current_code(&seed).unwrap();
        let full = machine
            .verify_second_factor(&partial.value, &code)
            .await
            .unwrap();

        // Tokens remain valid by signature even though every write failed.
        assert!(machine.validate(&full.value).is_ok());
    }

    #[tokio::test]
    async fn test_external_exchange_creates_once_and_stays_external() {
        let (machine, records) = machine();

        let first = machine.external_exchange("good-code").await.unwrap();
        assert_eq!(first.factor(), FactorLevel::Partial);
        assert_eq!(records.record_count().await, 1);

        // Second exchange finds the same identity instead of creating one.
        let second = machine.external_exchange("good-code").await.unwrap();
        assert_eq!(second.claims.sub, first.claims.sub);
        assert_eq!(records.record_count().await, 1);

        // No local credential was minted, so local login stays closed.
        let login = machine.login("provider@x.com", "anything").await;
        assert!(matches!(login, Err(AuthFlowError::Authentication)));
    }

    #[tokio::test]
    async fn test_external_exchange_maps_provider_failure() {
        let (machine, _) = machine();
        let result = machine.external_exchange("bad-code").await;
        assert!(matches!(result, Err(AuthFlowError::Provider(_))));
    }
}
