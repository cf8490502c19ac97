//! Database schema and connection management.

use crate::{Result, StoreError};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Current schema version. Incremented when the schema changes.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// SQLite connection holding the secret and metadata tables
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).map_err(StoreError::Sqlite)?;
        Ok(Self { conn })
    }

    /// Create a new in-memory database for testing
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        Ok(Self { conn })
    }

    /// Open (or create) a database and make sure its schema is usable.
    pub fn open_initialized<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Self::open(path)?;
        db.initialize_schema()?;
        db.validate_schema_version()?;
        Ok(db)
    }

    /// Initialize the database schema. Safe to call on an existing database.
    pub fn initialize_schema(&self) -> Result<()> {
        self.create_db_metadata_table()?;
        self.create_secrets_table()?;
        self.create_metadata_table()?;
        self.create_indexes()?;
        Ok(())
    }

    fn create_db_metadata_table(&self) -> Result<()> {
        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS db_metadata (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )",
                [],
            )
            .map_err(StoreError::Sqlite)?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO db_metadata (id, version, created_at) VALUES (1, ?1, ?2)",
                params![CURRENT_SCHEMA_VERSION, chrono::Utc::now().timestamp()],
            )
            .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    fn create_secrets_table(&self) -> Result<()> {
        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS secrets (
                identifier TEXT PRIMARY KEY,
                account_name TEXT NOT NULL,
                issuer TEXT NOT NULL,
                secret BLOB NOT NULL,
                algorithm TEXT NOT NULL DEFAULT 'SHA1',
                digits INTEGER NOT NULL DEFAULT 6,
                period INTEGER,
                counter INTEGER,
                created_at INTEGER NOT NULL,
                CHECK ((period IS NULL) <> (counter IS NULL))
            )",
                [],
            )
            .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    fn create_metadata_table(&self) -> Result<()> {
        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                modified_at INTEGER NOT NULL
            )",
                [],
            )
            .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    fn create_indexes(&self) -> Result<()> {
        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_secrets_issuer ON secrets(issuer)",
            "CREATE INDEX IF NOT EXISTS idx_metadata_modified_at ON metadata(modified_at)",
        ];
        for sql in &indexes {
            self.conn.execute(sql, []).map_err(StoreError::Sqlite)?;
        }
        Ok(())
    }

    /// Validate the database schema version.
    ///
    /// Databases written by a newer build are refused.
    pub fn validate_schema_version(&self) -> Result<()> {
        let version: Option<i32> = self
            .conn
            .query_row("SELECT version FROM db_metadata WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(StoreError::Sqlite)?;

        match version {
            Some(found) if found > CURRENT_SCHEMA_VERSION => Err(StoreError::SchemaMismatch {
                expected: CURRENT_SCHEMA_VERSION,
                found,
            }
            .into()),
            Some(_) => Ok(()),
            None => Err(StoreError::Other("database has no schema metadata".to_string()).into()),
        }
    }

    /// Get a reference to the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}
