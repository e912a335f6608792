//! Vault persistence
//!
//! `StorageBackend` persists an opaque, encrypted snapshot of the vault.
//! `Store` keeps the decoded [`VaultData`] in memory and funnels every
//! mutation through [`Store::write`], which persists the new snapshot.

mod file;
pub mod upgrade;
mod vault;

pub use file::FileStorage;
pub use vault::{Record, Store, Table, VaultData, VaultMeta};

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

/// Storage-related errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Vault not found: {0}")]
    NotFound(String),

    #[error("Vault already exists: {0}")]
    AlreadyExists(String),

    #[error("Vault is not installed")]
    NotInstalled,

    #[error("Unsupported vault schema version {found} (this build supports up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Migration {version} failed: {reason}")]
    Migration { version: u32, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Encryption error: {0}")]
    Encryption(#[from] crate::crypto::CryptoError),

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

/// A place where the encrypted vault snapshot lives
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Decrypt, migrate and decode the stored vault
    async fn load(&self) -> Result<VaultData, StorageError>;

    /// Encrypt and store a serialized snapshot
    async fn persist(&self, snapshot: Vec<u8>) -> Result<(), StorageError>;

    /// Store a snapshot under a key derived from a new master password.
    /// The backend keeps using its old key unless the write succeeds.
    async fn persist_rekeyed(&self, snapshot: Vec<u8>, password: &SecretString) -> Result<(), StorageError>;

    /// Check that the backend is reachable
    async fn health_check(&self) -> Result<(), StorageError>;

    /// Human-readable location, for logs
    fn location(&self) -> String;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{FileStorage, Store};
    use secrecy::SecretString;
    use std::sync::Arc;
    use tempfile::TempDir;

    pub const MASTER: &str = "master-password";

    /// A fresh vault in a temp dir. Keep the dir alive for the test.
    pub async fn store() -> (TempDir, Arc<Store>) {
        let dir = tempfile::tempdir().unwrap();
        let master = SecretString::from(MASTER.to_string());
        let backend = FileStorage::create(dir.path().join("vault.enc"), &master)
            .await
            .unwrap();
        let store = Store::initialize(Arc::new(backend), &master).await.unwrap();
        (dir, Arc::new(store))
    }
}
