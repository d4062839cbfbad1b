//! Identity Directory
//!
//! Durable identity storage is an external collaborator. The core depends
//! only on the narrow [`RecordStore`] trait and holds a transient fetched
//! copy of a record per operation; it never deletes identities.
//! [`MemoryRecordStore`] backs the binary and the test suite.

pub mod provider;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Access level granted to an identity, copied into issued tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular account.
    User,
    /// Administrative account.
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

/// Base32-encoded seed for time-based second-factor codes.
///
/// Returned to the caller exactly once at enrollment; `Debug` redacts the
/// value so it cannot leak through logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecondFactorSeed(String);

impl SecondFactorSeed {
    /// Wrap an already-encoded seed.
    pub fn new(encoded: String) -> Self {
        Self(encoded)
    }

    /// The encoded seed value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecondFactorSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecondFactorSeed(..)")
    }
}

/// A stored identity record.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Opaque unique handle.
    pub id: String,
    /// Unique email address.
    pub email: String,
    /// Argon2 credential hash. `None` for identities that can only
    /// authenticate through the external provider.
    pub credential_hash: Option<String>,
    /// Access level.
    pub role: Role,
    /// Opaque id from the external identity provider, if linked.
    pub external_id: Option<String>,
    /// Seed for second-factor code validation.
    pub second_factor_seed: SecondFactorSeed,
}

/// Fields for a record about to be created; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    /// Unique email address.
    pub email: String,
    /// Argon2 credential hash, absent for provider-only identities.
    pub credential_hash: Option<String>,
    /// Access level.
    pub role: Role,
    /// External provider id, if the record comes from an exchange.
    pub external_id: Option<String>,
    /// Seed for second-factor code validation.
    pub second_factor_seed: SecondFactorSeed,
}

/// Record store failures.
#[derive(Debug, Error)]
pub enum RecordError {
    /// A record with the same unique key already exists.
    #[error("record already exists")]
    Duplicate,

    /// No record matches the lookup.
    #[error("record not found")]
    NotFound,

    /// The backing store could not be reached.
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// External record store interface.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Look up an identity by its opaque id.
    async fn find_by_id(&self, id: &str) -> Result<Option<Identity>, RecordError>;

    /// Look up an identity by email.
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, RecordError>;

    /// Look up an identity by its external provider id.
    async fn find_by_external_id(&self, external_id: &str)
        -> Result<Option<Identity>, RecordError>;

    /// Create a new identity record.
    async fn create(&self, record: NewIdentity) -> Result<Identity, RecordError>;

    /// Replace the second-factor seed on an existing record.
    async fn update_second_factor_seed(
        &self,
        id: &str,
        seed: &SecondFactorSeed,
    ) -> Result<(), RecordError>;
}

/// In-memory record store with the same uniqueness rules a durable backend
/// would enforce (unique email, unique external id).
pub struct MemoryRecordStore {
    records: RwLock<HashMap<String, Identity>>,
}

impl MemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored records.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Identity>, RecordError> {
        let records = self.records.read().await;
        Ok(records.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, RecordError> {
        let records = self.records.read().await;
        Ok(records.values().find(|r| r.email == email).cloned())
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Identity>, RecordError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| r.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn create(&self, record: NewIdentity) -> Result<Identity, RecordError> {
        let mut records = self.records.write().await;

        if records.values().any(|r| r.email == record.email) {
            return Err(RecordError::Duplicate);
        }
        if let Some(ref external_id) = record.external_id {
            if records
                .values()
                .any(|r| r.external_id.as_deref() == Some(external_id.as_str()))
            {
                return Err(RecordError::Duplicate);
            }
        }

        let identity = Identity {
            id: Uuid::new_v4().to_string(),
            email: record.email,
            credential_hash: record.credential_hash,
            role: record.role,
            external_id: record.external_id,
            second_factor_seed: record.second_factor_seed,
        };
        records.insert(identity.id.clone(), identity.clone());
        Ok(identity)
    }

    async fn update_second_factor_seed(
        &self,
        id: &str,
        seed: &SecondFactorSeed,
    ) -> Result<(), RecordError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or(RecordError::NotFound)?;
        record.second_factor_seed = seed.clone();
        Ok(())
    }
}
