//! In-memory stores, used by tests and by ephemeral (companion) sessions.
//!
//! Both stores can be told to fail every write, which is how the
//! partial-failure paths of the credential center are exercised.

use super::{MetadataStore, SecretRecord, SecretStore, StoreResult, StoredCredential};
use crate::StoreError;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> StoreResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StoreError::LockPoisoned("Failed to lock memory store".to_string()))
}

fn check_writable(fail_writes: &AtomicBool) -> StoreResult<()> {
    if fail_writes.load(Ordering::SeqCst) {
        return Err(StoreError::Other("store is not writable".to_string()));
    }
    Ok(())
}

#[derive(Default)]
pub struct MemorySecretStore {
    records: Mutex<HashMap<String, SecretRecord>>,
    fail_writes: AtomicBool,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent add/update/delete fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl SecretStore for MemorySecretStore {
    fn add(&self, identifier: &str, record: &SecretRecord) -> StoreResult<StoredCredential> {
        check_writable(&self.fail_writes)?;
        let mut records = lock(&self.records)?;
        if records.contains_key(identifier) {
            return Err(StoreError::Duplicate(identifier.to_string()));
        }
        records.insert(identifier.to_string(), record.clone());
        Ok(StoredCredential::new(identifier))
    }

    fn find(&self, identifier: &str) -> StoreResult<Option<StoredCredential>> {
        Ok(lock(&self.records)?
            .contains_key(identifier)
            .then(|| StoredCredential::new(identifier)))
    }

    fn load(&self, handle: &StoredCredential) -> StoreResult<Option<SecretRecord>> {
        Ok(lock(&self.records)?.get(handle.identifier()).cloned())
    }

    fn update(&self, handle: &StoredCredential, record: &SecretRecord) -> StoreResult<()> {
        check_writable(&self.fail_writes)?;
        match lock(&self.records)?.get_mut(handle.identifier()) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::Other(format!(
                "no secret stored for {}",
                handle.identifier()
            ))),
        }
    }

    fn delete(&self, handle: &StoredCredential) -> StoreResult<()> {
        check_writable(&self.fail_writes)?;
        lock(&self.records)?.remove(handle.identifier());
        Ok(())
    }

    fn list(&self) -> StoreResult<Vec<StoredCredential>> {
        Ok(lock(&self.records)?
            .keys()
            .map(StoredCredential::new)
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    values: Mutex<BTreeMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent set/remove fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(lock(&self.values)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        check_writable(&self.fail_writes)?;
        lock(&self.values)?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        check_writable(&self.fail_writes)?;
        lock(&self.values)?.remove(key);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(lock(&self.values)?
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Factor;
    use crate::otp::{Algorithm, Generator};
    use crate::secret::SecretBytes;

    fn record() -> SecretRecord {
        SecretRecord {
            account_name: "alice".to_string(),
            issuer: "Acme".to_string(),
            generator: Generator::new(
                Factor::Timer { period: 30 },
                SecretBytes::from_base32("JBSWY3DPEHPK3PXP").unwrap(),
                Algorithm::Sha1,
                6,
            )
            .unwrap(),
        }
    }

    #[test]
    fn test_secret_store_crud() {
        let store = MemorySecretStore::new();
        let handle = store.add("id", &record()).unwrap();
        assert_eq!(store.find("id").unwrap(), Some(handle.clone()));
        assert_eq!(store.load(&handle).unwrap(), Some(record()));

        assert!(matches!(
            store.add("id", &record()),
            Err(StoreError::Duplicate(_))
        ));

        let mut renamed = record();
        renamed.account_name = "bob".to_string();
        store.update(&handle, &renamed).unwrap();
        assert_eq!(store.load(&handle).unwrap().unwrap().account_name, "bob");

        store.delete(&handle).unwrap();
        assert!(store.find("id").unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
        assert!(store.update(&handle, &record()).is_err());
    }

    #[test]
    fn test_fail_writes() {
        let secrets = MemorySecretStore::new();
        secrets.set_fail_writes(true);
        assert!(secrets.add("id", &record()).is_err());
        secrets.set_fail_writes(false);
        assert!(secrets.add("id", &record()).is_ok());

        let metadata = MemoryMetadataStore::new();
        metadata.set_fail_writes(true);
        assert!(metadata.set("k", "v").is_err());
        assert!(metadata.get("k").unwrap().is_none());
    }

    #[test]
    fn test_metadata_keys_by_prefix() {
        let store = MemoryMetadataStore::new();
        store.set("a_1", "x").unwrap();
        store.set("a_2", "y").unwrap();
        store.set("b_1", "z").unwrap();
        assert_eq!(store.keys("a_").unwrap(), vec!["a_1", "a_2"]);

        store.remove("a_1").unwrap();
        assert_eq!(store.keys("a_").unwrap(), vec!["a_2"]);
    }
}
