//! OTP Bridge Core Library
//!
//! This library provides the core functionality for enrolling one-time-password
//! credentials, generating TOTP codes, and keeping the credential set in sync
//! between a primary device and a companion device.

pub mod center;
pub mod config;
pub mod credential;
pub mod database;
pub mod otp;
pub mod platform;
pub mod push;
pub mod secret;
pub mod store;
pub mod sync;
pub mod uri;

pub use center::{CenterWriter, CredentialCenter, CredentialEvent, Orphan, OrphanKind};
pub use config::AppConfig;
pub use credential::{CredentialDescriptor, Endpoint, ExtendedCredential, Factor, OtpKind, WebService};
pub use otp::{Algorithm, Generator, OtpCode};
pub use push::{AckResponse, HttpPoster, PushNotification, PushService};
pub use secret::SecretBytes;
pub use store::{MetadataStore, SecretRecord, SecretStore, StoredCredential};
pub use sync::{MemoryChannel, MergeReport, PeerChannel, Snapshot, SyncReconciler};

use thiserror::Error;

/// Result type for otpbridge operations
pub type Result<T> = std::result::Result<T, OtpBridgeError>;

/// Storage-layer errors (secret store and metadata store I/O)
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: i32, found: i32 },

    #[error("Duplicate identifier: {0}")]
    Duplicate(String),

    #[error("Storage error: {0}")]
    Other(String),
}

/// General error type for otpbridge operations
#[derive(Error, Debug)]
pub enum OtpBridgeError {
    #[error("Malformed secret: {0}")]
    MalformedSecret(String),

    #[error("Invalid OTP parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid credential URI: {0}")]
    InvalidCredentialUri(String),

    #[error("Store write failed: {0}")]
    StoreWriteFailure(String),

    #[error("Orphaned metadata record: {identifier}")]
    OrphanedReference { identifier: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
