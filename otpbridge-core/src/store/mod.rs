//! Storage seams: the opaque secret store and the metadata key-value store.
//!
//! The secret store owns token material and hands out [`StoredCredential`]
//! handles. The metadata store is a plain string map holding JSON-encoded
//! [`ExtendedCredential`] records under `ExtendedCredential_<identifier>` keys.
//! The two are written independently; nothing here enforces that a metadata
//! record points at a live secret. That check happens on read in the
//! credential center.

pub mod memory;
pub mod sqlite;

pub use memory::{MemoryMetadataStore, MemorySecretStore};
pub use sqlite::SqliteStore;

use crate::credential::{CredentialDescriptor, ExtendedCredential};
use crate::otp::Generator;
use crate::{Result, StoreError};
use tracing::warn;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Prefix of every metadata key holding an extended credential.
pub const METADATA_KEY_PREFIX: &str = "ExtendedCredential_";

pub fn metadata_key(identifier: &str) -> String {
    format!("{}{}", METADATA_KEY_PREFIX, identifier)
}

pub fn identifier_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(METADATA_KEY_PREFIX)
        .filter(|identifier| !identifier.is_empty())
}

/// Token material as persisted by a secret store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRecord {
    pub account_name: String,
    pub issuer: String,
    pub generator: Generator,
}

impl SecretRecord {
    pub fn from_descriptor(descriptor: &CredentialDescriptor) -> Self {
        Self {
            account_name: descriptor.account_name().to_string(),
            issuer: descriptor.issuer().to_string(),
            generator: descriptor.generator().clone(),
        }
    }

    /// Rebuild a descriptor (without endpoints) from the stored token.
    pub fn to_descriptor(&self) -> Result<CredentialDescriptor> {
        CredentialDescriptor::new(&self.account_name, &self.issuer, self.generator.clone())
    }
}

/// Opaque handle to an entry in a [`SecretStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoredCredential {
    identifier: String,
}

impl StoredCredential {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Secure token storage (keychain or equivalent).
pub trait SecretStore: Send + Sync {
    /// Persist a new token. Fails with [`StoreError::Duplicate`] if the identifier is taken.
    fn add(&self, identifier: &str, record: &SecretRecord) -> StoreResult<StoredCredential>;

    fn find(&self, identifier: &str) -> StoreResult<Option<StoredCredential>>;

    fn load(&self, handle: &StoredCredential) -> StoreResult<Option<SecretRecord>>;

    fn update(&self, handle: &StoredCredential, record: &SecretRecord) -> StoreResult<()>;

    fn delete(&self, handle: &StoredCredential) -> StoreResult<()>;

    fn list(&self) -> StoreResult<Vec<StoredCredential>>;
}

/// String key-value persistence for extended-credential records.
pub trait MetadataStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    fn remove(&self, key: &str) -> StoreResult<()>;

    /// All keys starting with `prefix`.
    fn keys(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

pub fn load_extended(
    store: &dyn MetadataStore,
    identifier: &str,
) -> StoreResult<Option<ExtendedCredential>> {
    match store.get(&metadata_key(identifier))? {
        Some(json) => serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| StoreError::Serialization(e.to_string())),
        None => Ok(None),
    }
}

pub fn save_extended(store: &dyn MetadataStore, extended: &ExtendedCredential) -> StoreResult<()> {
    let json =
        serde_json::to_string(extended).map_err(|e| StoreError::Serialization(e.to_string()))?;
    store.set(&metadata_key(&extended.identifier), &json)
}

pub fn delete_extended(store: &dyn MetadataStore, identifier: &str) -> StoreResult<()> {
    store.remove(&metadata_key(identifier))
}

/// Every decodable extended credential. Unreadable records are skipped.
pub fn list_extended(store: &dyn MetadataStore) -> StoreResult<Vec<ExtendedCredential>> {
    let mut records = Vec::new();
    for key in store.keys(METADATA_KEY_PREFIX)? {
        let Some(json) = store.get(&key)? else {
            continue;
        };
        match serde_json::from_str::<ExtendedCredential>(&json) {
            Ok(extended) if identifier_from_key(&key) == Some(extended.identifier.as_str()) => {
                records.push(extended)
            }
            Ok(extended) => warn!(
                "Metadata key {} holds record for identifier {}, skipping",
                key, extended.identifier
            ),
            Err(e) => warn!("Skipping unreadable metadata record {}: {}", key, e),
        }
    }
    Ok(records)
}
