//! Encrypted file backend
//!
//! The vault is a single JSON envelope on disk:
//! `{ "version": <schema>, "salt": <b64>, "data": <EncryptedData> }`.
//! `data` decrypts to the JSON form of [`VaultData`].

use super::upgrade::{self, SCHEMA_VERSION};
use super::{StorageBackend, StorageError, VaultData};
use crate::crypto::{decrypt, derive_key, encrypt, generate_salt, EncryptedData, VaultKey};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use parking_lot::RwLock;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// File-based storage with AES-256-GCM encryption
pub struct FileStorage {
    path: PathBuf,
    sealing: RwLock<Sealing>,
}

struct Sealing {
    key: VaultKey,
    salt: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StorageFile {
    version: u32,
    salt: String,
    data: EncryptedData,
}

impl FileStorage {
    /// Prepare a brand new vault file. Nothing is written until the first
    /// `persist`.
    pub async fn create(path: impl AsRef<Path>, password: &SecretString) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(StorageError::AlreadyExists(path.display().to_string()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let salt = generate_salt();
        let key = derive_key(password, &salt)?;

        Ok(Self {
            path,
            sealing: RwLock::new(Sealing { key, salt }),
        })
    }

    /// Open an existing vault file. The password is only checked on `load`.
    pub async fn open(path: impl AsRef<Path>, password: &SecretString) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(StorageError::NotFound(path.display().to_string()));
        }

        let envelope = Self::read_envelope(&path).await?;
        let salt = STANDARD
            .decode(&envelope.salt)
            .map_err(|e| StorageError::Serialization(format!("invalid salt: {}", e)))?;
        let key = derive_key(password, &salt)?;

        Ok(Self {
            path,
            sealing: RwLock::new(Sealing { key, salt }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn seal_envelope(snapshot: &[u8], sealing: &Sealing) -> Result<String, StorageError> {
        let envelope = StorageFile {
            version: SCHEMA_VERSION,
            salt: STANDARD.encode(&sealing.salt),
            data: encrypt(snapshot, &sealing.key)?,
        };
        serde_json::to_string_pretty(&envelope).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    async fn write_file(&self, content: &str) -> Result<(), StorageError> {
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, content).await?;
        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    async fn read_envelope(path: &Path) -> Result<StorageFile, StorageError> {
        let content = fs::read_to_string(path).await?;
        serde_json::from_str(&content).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn load(&self) -> Result<VaultData, StorageError> {
        let envelope = Self::read_envelope(&self.path).await?;

        let decrypted = {
            let sealing = self.sealing.read();
            decrypt(&envelope.data, &sealing.key)?
        };

        let mut value: serde_json::Value = serde_json::from_slice(&decrypted)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        if envelope.version != SCHEMA_VERSION {
            let reached = upgrade::migrate(&mut value, envelope.version)?;
            tracing::info!(
                from = envelope.version,
                to = reached,
                path = %self.path.display(),
                "Vault schema migrated"
            );
        }

        let mut data: VaultData =
            serde_json::from_value(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
        data.rebuild_indexes();
        Ok(data)
    }

    async fn persist(&self, snapshot: Vec<u8>) -> Result<(), StorageError> {
        let content = Self::seal_envelope(&snapshot, &self.sealing.read())?;
        self.write_file(&content).await
    }

    async fn persist_rekeyed(&self, snapshot: Vec<u8>, password: &SecretString) -> Result<(), StorageError> {
        let salt = generate_salt();
        let sealing = Sealing {
            key: derive_key(password, &salt)?,
            salt,
        };
        let content = Self::seal_envelope(&snapshot, &sealing)?;
        self.write_file(&content).await?;
        *self.sealing.write() = sealing;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        if !self.path.exists() {
            return Err(StorageError::Unavailable(format!(
                "vault file missing: {}",
                self.path.display()
            )));
        }
        fs::metadata(&self.path).await?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::Category;
    use tempfile::tempdir;

    fn password(p: &str) -> SecretString {
        SecretString::from(p.to_string())
    }

    async fn persist_with_category(storage: &FileStorage, name: &str) {
        let mut data = VaultData::default();
        data.categories.insert(Category::new(name, None));
        storage.persist(serde_json::to_vec(&data).unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");

        let storage = FileStorage::create(&path, &password("master")).await.unwrap();
        persist_with_category(&storage, "Servers").await;

        let reopened = FileStorage::open(&path, &password("master")).await.unwrap();
        let data = reopened.load().await.unwrap();
        assert_eq!(data.categories.len(), 1);
        assert_eq!(data.categories.values().next().unwrap().name, "Servers");
    }

    #[tokio::test]
    async fn test_wrong_password_fails_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");

        let storage = FileStorage::create(&path, &password("right")).await.unwrap();
        persist_with_category(&storage, "Web").await;

        let reopened = FileStorage::open(&path, &password("wrong")).await.unwrap();
        assert!(matches!(reopened.load().await, Err(StorageError::Encryption(_))));
    }

    #[tokio::test]
    async fn test_create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");

        let storage = FileStorage::create(&path, &password("pw")).await.unwrap();
        persist_with_category(&storage, "Web").await;

        assert!(matches!(
            FileStorage::create(&path, &password("pw")).await,
            Err(StorageError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            FileStorage::open(dir.path().join("none.enc"), &password("pw")).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rekey_changes_password() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");

        let storage = FileStorage::create(&path, &password("old")).await.unwrap();
        persist_with_category(&storage, "Web").await;

        let mut data = VaultData::default();
        data.categories.insert(Category::new("DB", None));
        storage
            .persist_rekeyed(serde_json::to_vec(&data).unwrap(), &password("new"))
            .await
            .unwrap();

        assert!(FileStorage::open(&path, &password("old")).await.unwrap().load().await.is_err());
        let data = FileStorage::open(&path, &password("new")).await.unwrap().load().await.unwrap();
        assert_eq!(data.categories.len(), 1);

        // Later writes stay under the new key
        persist_with_category(&storage, "Mail").await;
        assert!(FileStorage::open(&path, &password("new")).await.unwrap().load().await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_rekey_keeps_old_key() {
        let dir = tempdir().unwrap();
        let vault_dir = dir.path().join("vault");
        let path = vault_dir.join("vault.enc");

        let storage = FileStorage::create(&path, &password("old")).await.unwrap();
        persist_with_category(&storage, "Web").await;

        std::fs::remove_dir_all(&vault_dir).unwrap();
        let data = VaultData::default();
        assert!(storage
            .persist_rekeyed(serde_json::to_vec(&data).unwrap(), &password("new"))
            .await
            .is_err());

        std::fs::create_dir_all(&vault_dir).unwrap();
        persist_with_category(&storage, "DB").await;
        let data = FileStorage::open(&path, &password("old")).await.unwrap().load().await.unwrap();
        assert_eq!(data.categories.len(), 1);
    }

    #[tokio::test]
    async fn test_health_check() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        let storage = FileStorage::create(&path, &password("pw")).await.unwrap();

        assert!(storage.health_check().await.is_err());
        persist_with_category(&storage, "x").await;
        assert!(storage.health_check().await.is_ok());
    }
}
