//! Credential center
//!
//! Orchestrates the secret store and the metadata store. The two stores are
//! written independently, so the referential invariant (every metadata record
//! points at a live secret) is enforced lazily: listings hide orphaned
//! records instead of repairing them.
//!
//! Local mutations and sync merges both go through [`CenterWriter`], which
//! holds the center's writer lock for its lifetime.

use crate::credential::{CredentialDescriptor, ExtendedCredential};
use crate::otp::OtpCode;
use crate::store::{
    delete_extended, list_extended, load_extended, metadata_key, save_extended, MetadataStore,
    SecretRecord, SecretStore, METADATA_KEY_PREFIX,
};
use crate::{OtpBridgeError, Result, StoreError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[cfg(test)]
mod tests;

const EVENT_CAPACITY: usize = 64;

/// Change notification emitted after every successful mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialEvent {
    Added(ExtendedCredential),
    Updated(ExtendedCredential),
    Removed { identifier: String },
    /// A remote snapshot changed the local set.
    Merged { added: usize, updated: usize },
}

impl CredentialEvent {
    /// Whether the event came from a change made on this device.
    pub fn is_local(&self) -> bool {
        !matches!(self, CredentialEvent::Merged { .. })
    }
}

/// Which half of a credential is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OrphanKind {
    /// Metadata record whose secret is gone.
    Metadata,
    /// Secret with no metadata record (left behind by a failed add).
    Secret,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Orphan {
    pub identifier: String,
    pub kind: OrphanKind,
}

impl Orphan {
    pub fn to_error(&self) -> OtpBridgeError {
        OtpBridgeError::OrphanedReference {
            identifier: self.identifier.clone(),
        }
    }
}

pub struct CredentialCenter {
    secrets: Arc<dyn SecretStore>,
    metadata: Arc<dyn MetadataStore>,
    writer: Mutex<()>,
    events: broadcast::Sender<CredentialEvent>,
}

fn write_failure(context: &str, error: StoreError) -> OtpBridgeError {
    OtpBridgeError::StoreWriteFailure(format!("{}: {}", context, error))
}

impl CredentialCenter {
    pub fn new(secrets: Arc<dyn SecretStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            secrets,
            metadata,
            writer: Mutex::new(()),
            events,
        }
    }

    /// Register an observer. Events published before subscribing are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<CredentialEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: CredentialEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Take the writer lock. Held for a whole local mutation or sync merge.
    pub fn writer(&self) -> Result<CenterWriter<'_>> {
        let guard = self.writer.lock().map_err(|_| {
            OtpBridgeError::from(StoreError::LockPoisoned(
                "Failed to lock credential center".to_string(),
            ))
        })?;
        Ok(CenterWriter {
            center: self,
            _guard: guard,
        })
    }

    /// Enroll a parsed credential: secret first, then metadata.
    ///
    /// If the metadata write fails the secret stays behind as an orphan and
    /// shows up in [`CredentialCenter::orphaned`].
    pub fn add_credential(&self, descriptor: &CredentialDescriptor) -> Result<ExtendedCredential> {
        let identifier = descriptor
            .guid()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut extended = ExtendedCredential::new(identifier, descriptor.display_name());
        extended.endpoints = descriptor.endpoints().clone();

        {
            let writer = self.writer()?;
            writer.add_secret(&extended.identifier, &SecretRecord::from_descriptor(descriptor))?;
            if let Err(e) = writer.save(&extended) {
                warn!(
                    "Secret {} stored but metadata write failed, leaving orphan: {}",
                    extended.identifier, e
                );
                return Err(e);
            }
        }

        info!("Added credential {}", extended.identifier);
        self.emit(CredentialEvent::Added(extended.clone()));
        Ok(extended)
    }

    /// Metadata-only update (local name, endpoints). The secret is never touched.
    pub fn update_credential(&self, extended: &ExtendedCredential) -> Result<()> {
        {
            let writer = self.writer()?;
            if writer.live(&extended.identifier)?.is_none() {
                return Err(OtpBridgeError::NotFound(format!(
                    "Credential {}",
                    extended.identifier
                )));
            }
            writer.save(extended)?;
        }

        debug!("Updated credential {}", extended.identifier);
        self.emit(CredentialEvent::Updated(extended.clone()));
        Ok(())
    }

    /// Rename a credential.
    pub fn rename_credential(&self, identifier: &str, local_name: &str) -> Result<ExtendedCredential> {
        let local_name = local_name.trim();
        if local_name.is_empty() {
            return Err(OtpBridgeError::InvalidParameters(
                "local name cannot be empty".to_string(),
            ));
        }

        let mut extended = self
            .get(identifier)?
            .ok_or_else(|| OtpBridgeError::NotFound(format!("Credential {}", identifier)))?;
        extended.local_name = local_name.to_string();
        self.update_credential(&extended)?;
        Ok(extended)
    }

    /// Delete the secret, then the metadata record. Irreversible.
    ///
    /// A failed secret delete does not stop the metadata removal; the error is
    /// reported after the metadata record is gone. Orphaned halves can be
    /// removed too; an identifier neither store knows is `NotFound`.
    pub fn remove_credential(&self, identifier: &str) -> Result<()> {
        let secret_result = {
            let writer = self.writer()?;
            if !writer.contains(identifier)? {
                return Err(OtpBridgeError::NotFound(format!("Credential {}", identifier)));
            }
            let secret_result = writer.delete_secret(identifier);
            if let Err(e) = &secret_result {
                warn!("Secret delete failed for {}, removing metadata anyway: {}", identifier, e);
            }
            writer.delete_metadata(identifier)?;
            secret_result
        };

        info!("Removed credential {}", identifier);
        self.emit(CredentialEvent::Removed {
            identifier: identifier.to_string(),
        });
        secret_result
    }

    /// All live credentials, sorted by identifier. Orphaned records are hidden.
    pub fn list_credentials(&self) -> Result<Vec<ExtendedCredential>> {
        let mut live = BTreeMap::new();
        for extended in list_extended(self.metadata.as_ref())? {
            if self.secrets.find(&extended.identifier)?.is_some() {
                live.entry(extended.identifier.clone()).or_insert(extended);
            } else {
                debug!("Hiding orphaned metadata record {}", extended.identifier);
            }
        }
        Ok(live.into_values().collect())
    }

    /// A live credential by identifier.
    pub fn get(&self, identifier: &str) -> Result<Option<ExtendedCredential>> {
        match load_extended(self.metadata.as_ref(), identifier)? {
            Some(extended) if self.secrets.find(identifier)?.is_some() => Ok(Some(extended)),
            _ => Ok(None),
        }
    }

    /// Rebuild the full descriptor (token plus metadata) of a stored credential.
    pub fn descriptor(&self, identifier: &str) -> Result<CredentialDescriptor> {
        let extended = load_extended(self.metadata.as_ref(), identifier)?
            .ok_or_else(|| OtpBridgeError::NotFound(format!("Credential {}", identifier)))?;

        let record = match self.secrets.find(identifier)? {
            Some(handle) => self.secrets.load(&handle)?,
            None => None,
        };
        let record = record.ok_or_else(|| OtpBridgeError::OrphanedReference {
            identifier: identifier.to_string(),
        })?;

        Ok(record
            .to_descriptor()?
            .with_endpoints(extended.endpoints)
            .with_local_name(extended.local_name))
    }

    /// Canonical `otpauth://` URI of a stored credential.
    pub fn credential_uri(&self, identifier: &str) -> Result<String> {
        Ok(crate::uri::to_otpauth_uri(&self.descriptor(identifier)?))
    }

    pub fn code_at(&self, identifier: &str, now: i64) -> Result<OtpCode> {
        self.descriptor(identifier)?.generator().code_at(now)
    }

    /// Records violating the referential invariant, in either direction.
    /// Reported for cleanup tooling; never repaired here.
    pub fn orphaned(&self) -> Result<Vec<Orphan>> {
        let secret_ids: BTreeSet<String> = self
            .secrets
            .list()?
            .into_iter()
            .map(|handle| handle.identifier().to_string())
            .collect();
        let metadata_ids: BTreeSet<String> = self
            .metadata
            .keys(METADATA_KEY_PREFIX)?
            .iter()
            .filter_map(|key| crate::store::identifier_from_key(key))
            .map(str::to_string)
            .collect();

        let mut orphans: Vec<Orphan> = metadata_ids
            .difference(&secret_ids)
            .map(|identifier| Orphan {
                identifier: identifier.clone(),
                kind: OrphanKind::Metadata,
            })
            .chain(secret_ids.difference(&metadata_ids).map(|identifier| Orphan {
                identifier: identifier.clone(),
                kind: OrphanKind::Secret,
            }))
            .collect();
        orphans.sort();

        for orphan in &orphans {
            warn!("{} ({:?})", orphan.to_error(), orphan.kind);
        }
        Ok(orphans)
    }
}

/// Exclusive write access to the center's stores.
pub struct CenterWriter<'a> {
    center: &'a CredentialCenter,
    _guard: MutexGuard<'a, ()>,
}

impl CenterWriter<'_> {
    /// Live metadata record for `identifier`, if any.
    pub fn live(&self, identifier: &str) -> Result<Option<ExtendedCredential>> {
        self.center.get(identifier)
    }

    /// Whether either store holds anything under `identifier`.
    pub fn contains(&self, identifier: &str) -> Result<bool> {
        let center = self.center;
        Ok(center.secrets.find(identifier)?.is_some()
            || center.metadata.get(&metadata_key(identifier))?.is_some())
    }

    pub fn list(&self) -> Result<Vec<ExtendedCredential>> {
        self.center.list_credentials()
    }

    pub fn add_secret(&self, identifier: &str, record: &SecretRecord) -> Result<()> {
        self.center
            .secrets
            .add(identifier, record)
            .map(|_| ())
            .map_err(|e| write_failure("secret store add failed", e))
    }

    /// Insert or replace the secret stored under `identifier`.
    pub fn put_secret(&self, identifier: &str, record: &SecretRecord) -> Result<()> {
        let secrets = &self.center.secrets;
        let result = match secrets.find(identifier)? {
            Some(handle) => secrets.update(&handle, record),
            None => secrets.add(identifier, record).map(|_| ()),
        };
        result.map_err(|e| write_failure("secret store write failed", e))
    }

    pub fn delete_secret(&self, identifier: &str) -> Result<()> {
        let secrets = &self.center.secrets;
        match secrets.find(identifier)? {
            Some(handle) => secrets
                .delete(&handle)
                .map_err(|e| write_failure("secret store delete failed", e)),
            None => Ok(()),
        }
    }

    pub fn save(&self, extended: &ExtendedCredential) -> Result<()> {
        save_extended(self.center.metadata.as_ref(), extended)
            .map_err(|e| write_failure("metadata write failed", e))
    }

    pub fn delete_metadata(&self, identifier: &str) -> Result<()> {
        delete_extended(self.center.metadata.as_ref(), identifier)
            .map_err(|e| write_failure("metadata delete failed", e))
    }
}
