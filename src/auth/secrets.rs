//! Secret Primitives
//!
//! Pure wrappers around the provided cryptographic building blocks:
//! Argon2id password hashing, time-based second-factor codes, and signed
//! session tokens (HS256). No shared state lives here; everything is a
//! function of its inputs plus the injected signing secret.

use argon2::password_hash::rand_core::OsRng;
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use totp_rs::{Algorithm as TotpAlgorithm, Secret, TOTP};

use crate::directory::{Role, SecondFactorSeed};

/// Issuer label stamped into second-factor provisioning.
const TOTP_ISSUER: &str = "gatehouse";

/// Second-factor code length.
const TOTP_DIGITS: usize = 6;

/// Accepted adjacent time steps on either side of now (clock-skew tolerance).
const TOTP_SKEW: u8 = 1;

/// Time step length in seconds.
const TOTP_STEP: u64 = 30;

/// Failures inside the secret primitives.
#[derive(Debug, Error)]
pub enum SecretError {
    /// Password hashing failed.
    #[error("password hashing failed: {0}")]
    Hash(String),

    /// The second-factor seed could not be used.
    #[error("second-factor seed invalid: {0}")]
    Seed(String),

    /// System clock unavailable for code derivation.
    #[error("system clock unavailable")]
    Clock,

    /// Token signing failed.
    #[error("token signing failed: {0}")]
    Sign(String),
}

/// Token verification errors.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,

    /// Token signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,

    /// Token has expired.
    #[error("token expired")]
    Expired,

    /// Other decoding error.
    #[error("decode error: {0}")]
    Decode(String),
}

/// How far up the factor ladder a token reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorLevel {
    /// Password verified, second factor still pending. Authorizes only the
    /// second-factor verification operation.
    Partial,
    /// Fully authenticated. Authorizes protected operations and realtime
    /// registration.
    Full,
}

/// Claims carried by every session token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject: the identity's opaque id.
    pub sub: String,
    /// Role copied from the identity at issuance.
    pub role: Role,
    /// Factor level reached when the token was issued.
    pub factor: FactorLevel,
    /// Issued-at timestamp (Unix seconds).
    pub iat: i64,
    /// Expiry timestamp (Unix seconds).
    pub exp: i64,
}

impl SessionClaims {
    /// Embedded expiry as a timestamp.
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }
}

/// Hash a password with Argon2id and a fresh random salt.
///
/// The clear-text password is consumed here and never stored or logged.
pub fn hash_password(password: &str) -> Result<String, SecretError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| SecretError::Hash(e.to_string()))
}

/// Check a password against a stored Argon2 hash.
///
/// A malformed stored hash counts as a mismatch rather than an error so the
/// caller's failure path stays uniform.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Generate a fresh second-factor seed, returned base32-encoded.
pub fn generate_seed() -> Result<SecondFactorSeed, SecretError> {
    let secret = Secret::generate_secret();
    let bytes = secret
        .to_bytes()
        .map_err(|e| SecretError::Seed(format!("{e:?}")))?;
    let totp = build_totp(bytes)?;
    Ok(SecondFactorSeed::new(totp.get_secret_base32()))
}

/// Validate a submitted code against a seed.
///
/// Accepts the current time step plus one step on either side.
pub fn verify_code(seed: &SecondFactorSeed, code: &str) -> Result<bool, SecretError> {
    let totp = seed_totp(seed)?;
    Ok(totp.check_current(code).unwrap_or(false))
}

/// Derive the code for the current time step.
pub fn current_code(seed: &SecondFactorSeed) -> Result<String, SecretError> {
    let totp = seed_totp(seed)?;
    totp.generate_current().map_err(|_| SecretError::Clock)
}

fn build_totp(secret_bytes: Vec<u8>) -> Result<TOTP, SecretError> {
    TOTP::new(
        TotpAlgorithm::SHA1,
        TOTP_DIGITS,
        TOTP_SKEW,
        TOTP_STEP,
        secret_bytes,
        Some(TOTP_ISSUER.to_string()),
        "user".to_string(),
    )
    .map_err(|e| SecretError::Seed(format!("{e:?}")))
}

fn seed_totp(seed: &SecondFactorSeed) -> Result<TOTP, SecretError> {
    let bytes = Secret::Encoded(seed.expose().to_string())
        .to_bytes()
        .map_err(|e| SecretError::Seed(format!("{e:?}")))?;
    build_totp(bytes)
}

/// Signs and verifies session tokens under one process-lifetime secret.
///
/// The secret is injected at construction; rotation happens by restart.
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenCodec {
    /// Build a codec from the configured signing secret.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Sign a set of claims into a bearer string.
    pub fn sign(&self, claims: &SessionClaims) -> Result<String, SecretError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| SecretError::Sign(e.to_string()))
    }

    /// Verify a bearer string and extract its claims.
    ///
    /// Signature and expiry are self-contained in the token; no store
    /// round-trip happens here.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let data = decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map_err(map_jwt_error)?;
        Ok(data.claims)
    }
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> TokenError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => TokenError::InvalidFormat,
        _ => TokenError::Decode(err.to_string()),
    }
}

/// Hex SHA-256 digest of a bearer string.
///
/// Used as the token-store key so raw tokens are never kept at rest.
pub fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Short digest prefix safe to include in logs.
pub fn token_fingerprint(token: &str) -> String {
    token_digest(token)[..12].to_string()
}

// =============================================================================
// TESTS
// =============================================================================
