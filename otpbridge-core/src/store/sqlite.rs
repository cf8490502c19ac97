//! SQLite-backed secret and metadata stores sharing one connection.

use super::{MetadataStore, SecretRecord, SecretStore, StoreResult, StoredCredential};
use crate::credential::Factor;
use crate::database::Database;
use crate::otp::{Algorithm, Generator};
use crate::secret::SecretBytes;
use crate::StoreError;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open (creating if needed) the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        Ok(Self::new(Database::open_initialized(path)?))
    }

    pub fn in_memory() -> crate::Result<Self> {
        let db = Database::in_memory()?;
        db.initialize_schema()?;
        Ok(Self::new(db))
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| StoreError::LockPoisoned("Failed to lock database".to_string()))
    }
}

struct SecretRow {
    account_name: String,
    issuer: String,
    secret: Vec<u8>,
    algorithm: String,
    digits: u8,
    period: Option<u32>,
    counter: Option<i64>,
}

impl SecretRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            account_name: row.get(0)?,
            issuer: row.get(1)?,
            secret: row.get(2)?,
            algorithm: row.get(3)?,
            digits: row.get(4)?,
            period: row.get(5)?,
            counter: row.get(6)?,
        })
    }

    fn into_record(self) -> StoreResult<SecretRecord> {
        let corrupt = |e: crate::OtpBridgeError| StoreError::Serialization(e.to_string());

        let algorithm: Algorithm = self.algorithm.parse().map_err(corrupt)?;
        let factor = match (self.period, self.counter) {
            (Some(period), None) => Factor::Timer { period },
            (None, Some(counter)) => Factor::Counter {
                counter: counter as u64,
            },
            _ => {
                return Err(StoreError::Serialization(
                    "secret row must have exactly one of period or counter".to_string(),
                ))
            }
        };
        let generator = Generator::new(factor, SecretBytes::new(self.secret), algorithm, self.digits)
            .map_err(corrupt)?;

        Ok(SecretRecord {
            account_name: self.account_name,
            issuer: self.issuer,
            generator,
        })
    }
}

/// Counters are stored as SQLite INTEGER (i64); the bit pattern is kept.
fn factor_columns(factor: Factor) -> (Option<u32>, Option<i64>) {
    match factor {
        Factor::Timer { period } => (Some(period), None),
        Factor::Counter { counter } => (None, Some(counter as i64)),
    }
}

impl SecretStore for SqliteStore {
    fn add(&self, identifier: &str, record: &SecretRecord) -> StoreResult<StoredCredential> {
        let db = self.lock()?;
        let (period, counter) = factor_columns(record.generator.factor());

        let inserted = db.conn().execute(
            "INSERT OR IGNORE INTO secrets (
                identifier, account_name, issuer, secret, algorithm,
                digits, period, counter, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                identifier,
                record.account_name,
                record.issuer,
                record.generator.secret().as_bytes(),
                record.generator.algorithm().as_db_value(),
                record.generator.digits(),
                period,
                counter,
                Utc::now().timestamp(),
            ],
        )?;

        if inserted == 0 {
            return Err(StoreError::Duplicate(identifier.to_string()));
        }
        Ok(StoredCredential::new(identifier))
    }

    fn find(&self, identifier: &str) -> StoreResult<Option<StoredCredential>> {
        let db = self.lock()?;
        let found = db
            .conn()
            .query_row(
                "SELECT identifier FROM secrets WHERE identifier = ?1",
                [identifier],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(found.map(StoredCredential::new))
    }

    fn load(&self, handle: &StoredCredential) -> StoreResult<Option<SecretRecord>> {
        let db = self.lock()?;
        let row = db
            .conn()
            .query_row(
                "SELECT account_name, issuer, secret, algorithm, digits, period, counter
                 FROM secrets WHERE identifier = ?1",
                [handle.identifier()],
                SecretRow::from_row,
            )
            .optional()?;

        row.map(SecretRow::into_record).transpose()
    }

    fn update(&self, handle: &StoredCredential, record: &SecretRecord) -> StoreResult<()> {
        let db = self.lock()?;
        let (period, counter) = factor_columns(record.generator.factor());

        let updated = db.conn().execute(
            "UPDATE secrets SET
                account_name = ?2, issuer = ?3, secret = ?4, algorithm = ?5,
                digits = ?6, period = ?7, counter = ?8
             WHERE identifier = ?1",
            params![
                handle.identifier(),
                record.account_name,
                record.issuer,
                record.generator.secret().as_bytes(),
                record.generator.algorithm().as_db_value(),
                record.generator.digits(),
                period,
                counter,
            ],
        )?;

        if updated == 0 {
            return Err(StoreError::Other(format!(
                "no secret stored for {}",
                handle.identifier()
            )));
        }
        Ok(())
    }

    fn delete(&self, handle: &StoredCredential) -> StoreResult<()> {
        let db = self.lock()?;
        db.conn().execute(
            "DELETE FROM secrets WHERE identifier = ?1",
            [handle.identifier()],
        )?;
        Ok(())
    }

    fn list(&self) -> StoreResult<Vec<StoredCredential>> {
        let db = self.lock()?;
        let mut stmt = db
            .conn()
            .prepare("SELECT identifier FROM secrets ORDER BY created_at, identifier")?;
        let identifiers = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(identifiers.into_iter().map(StoredCredential::new).collect())
    }
}

impl MetadataStore for SqliteStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let db = self.lock()?;
        Ok(db
            .conn()
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let db = self.lock()?;
        db.conn().execute(
            "INSERT INTO metadata (key, value, modified_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                modified_at = excluded.modified_at",
            params![key, value, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let db = self.lock()?;
        db.conn()
            .execute("DELETE FROM metadata WHERE key = ?1", [key])?;
        Ok(())
    }

    fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let db = self.lock()?;
        let mut stmt = db
            .conn()
            .prepare("SELECT key FROM metadata WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map([prefix], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{list_extended, load_extended, save_extended};
    use crate::ExtendedCredential;

    fn record(factor: Factor) -> SecretRecord {
        SecretRecord {
            account_name: "alice@example.com".to_string(),
            issuer: "Acme".to_string(),
            generator: Generator::new(
                factor,
                SecretBytes::from_base32("GEZDGNBVGY3TQOJQ").unwrap(),
                Algorithm::Sha512,
                8,
            )
            .unwrap(),
        }
    }

    #[test]
    fn test_secret_roundtrip_totp_and_hotp() {
        let store = SqliteStore::in_memory().unwrap();

        let totp = store.add("t", &record(Factor::Timer { period: 45 })).unwrap();
        let hotp = store
            .add("h", &record(Factor::Counter { counter: 7 }))
            .unwrap();

        assert_eq!(
            store.load(&totp).unwrap(),
            Some(record(Factor::Timer { period: 45 }))
        );
        assert_eq!(
            store.load(&hotp).unwrap(),
            Some(record(Factor::Counter { counter: 7 }))
        );
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_add_is_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        store.add("x", &record(Factor::Timer { period: 30 })).unwrap();
        assert!(matches!(
            store.add("x", &record(Factor::Timer { period: 30 })),
            Err(StoreError::Duplicate(_))
        ));
    }

    #[test]
    fn test_update_and_delete() {
        let store = SqliteStore::in_memory().unwrap();
        let handle = store.add("x", &record(Factor::Timer { period: 30 })).unwrap();

        store
            .update(&handle, &record(Factor::Counter { counter: 3 }))
            .unwrap();
        assert_eq!(
            store.load(&handle).unwrap().unwrap().generator.factor(),
            Factor::Counter { counter: 3 }
        );

        store.delete(&handle).unwrap();
        assert!(store.find("x").unwrap().is_none());
        assert!(store.load(&handle).unwrap().is_none());
        assert!(store
            .update(&handle, &record(Factor::Timer { period: 30 }))
            .is_err());
    }

    #[test]
    fn test_metadata_prefix_is_literal() {
        let store = SqliteStore::in_memory().unwrap();
        store.set("ExtendedCredential_a", "1").unwrap();
        store.set("ExtendedCredential%b", "2").unwrap();
        store.set("Other_c", "3").unwrap();

        assert_eq!(
            store.keys("ExtendedCredential_").unwrap(),
            vec!["ExtendedCredential_a".to_string()]
        );

        store.set("ExtendedCredential_a", "updated").unwrap();
        assert_eq!(
            store.get("ExtendedCredential_a").unwrap().as_deref(),
            Some("updated")
        );
        store.remove("ExtendedCredential_a").unwrap();
        assert!(store.get("ExtendedCredential_a").unwrap().is_none());
    }

    #[test]
    fn test_extended_records_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("otpbridge.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            save_extended(&store, &ExtendedCredential::new("id-1", "Work")).unwrap();
            store.add("id-1", &record(Factor::Timer { period: 30 })).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            load_extended(&store, "id-1").unwrap().unwrap().local_name,
            "Work"
        );
        assert_eq!(list_extended(&store).unwrap().len(), 1);
        assert!(store.find("id-1").unwrap().is_some());
    }
}
