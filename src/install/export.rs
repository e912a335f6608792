use super::InstallError;
use crate::acl::{Permission, Principal};
use crate::crypto::{derive_key, encrypt, generate_salt};
use crate::events::{Event, EventDispatcher, EventMessage};
use crate::storage::Store;
use crate::tasks::Task;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Export format version
pub const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportItem {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportAccount {
    pub id: u64,
    pub name: String,
    pub login: String,
    pub url: String,
    pub notes: String,
    pub category_id: u64,
    pub client_id: u64,
    pub tags: Vec<u64>,
    pub password: String,
}

/// The plain export document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub version: u32,
    pub app_version: String,
    pub exported_at: DateTime<Utc>,
    pub categories: Vec<ExportItem>,
    pub clients: Vec<ExportItem>,
    pub tags: Vec<ExportItem>,
    pub accounts: Vec<ExportAccount>,
}

/// Password-protected wrapper around a serialized [`ExportDocument`]
#[derive(Debug, Serialize, Deserialize)]
struct EncryptedExport {
    version: u32,
    encrypted: bool,
    salt: String,
    /// `nonce:ciphertext`
    data: String,
}

/// Writes JSON backups of the vault contents
pub struct ExportService {
    store: Arc<Store>,
    events: Arc<EventDispatcher>,
}

impl ExportService {
    pub fn new(store: Arc<Store>, events: Arc<EventDispatcher>) -> Self {
        Self { store, events }
    }

    /// Export to `path`. With a `password` the whole document is encrypted.
    /// Returns the number of accounts written. The task, if any, is ended.
    pub async fn export(
        &self,
        principal: &Principal,
        path: &Path,
        password: Option<&SecretString>,
        task: Option<Task>,
    ) -> Result<usize, InstallError> {
        let result = self.write_export(principal, path, password, task.as_ref()).await;

        if let Some(task) = task {
            let message = match &result {
                Ok(n) => format!("Export finished, {} accounts", n),
                Err(e) => format!("Export failed: {}", e),
            };
            task.end(&message)?;
        }
        result
    }

    /// Build the document with every password decrypted
    pub fn document(&self, task: Option<&Task>) -> Result<ExportDocument, InstallError> {
        let data = self.store.read();

        let categories = data
            .categories
            .values()
            .map(|c| ExportItem {
                id: c.id,
                name: c.name.clone(),
                description: c.description.clone(),
            })
            .collect();
        let clients = data
            .clients
            .values()
            .map(|c| ExportItem {
                id: c.id,
                name: c.name.clone(),
                description: c.description.clone(),
            })
            .collect();
        let tags = data
            .tags
            .values()
            .map(|t| ExportItem {
                id: t.id,
                name: t.name.clone(),
                description: None,
            })
            .collect();

        let total = data.accounts.len();
        let mut accounts = Vec::with_capacity(total);
        for (done, account) in data.accounts.values().enumerate() {
            accounts.push(ExportAccount {
                id: account.id,
                name: account.name.clone(),
                login: account.login.clone(),
                url: account.url.clone(),
                notes: account.notes.clone(),
                category_id: account.category_id,
                client_id: account.client_id,
                tags: account.tags.iter().copied().collect(),
                password: self.store.unseal(&account.password)?,
            });
            if let Some(task) = task {
                if let Err(e) = task.write_progress("Exporting accounts", done + 1, total) {
                    tracing::debug!(error = %e, "Could not write task progress");
                }
            }
        }

        Ok(ExportDocument {
            version: EXPORT_VERSION,
            app_version: data.meta.app_version.clone(),
            exported_at: Utc::now(),
            categories,
            clients,
            tags,
            accounts,
        })
    }

    async fn write_export(
        &self,
        principal: &Principal,
        path: &Path,
        password: Option<&SecretString>,
        task: Option<&Task>,
    ) -> Result<usize, InstallError> {
        principal.require(Permission::ConfigBackup)?;

        let document = self.document(task)?;
        let count = document.accounts.len();
        let json = serde_json::to_vec_pretty(&document)?;

        let bytes = match password {
            Some(password) => {
                let salt = generate_salt();
                let key = derive_key(password, &salt)?;
                let wrapped = EncryptedExport {
                    version: EXPORT_VERSION,
                    encrypted: true,
                    salt: STANDARD.encode(&salt),
                    data: encrypt(&json, &key)?.encode(),
                };
                serde_json::to_vec_pretty(&wrapped)?
            }
            None => json,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            let mut builder = tokio::fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            builder.mode(0o700);
            builder.create(parent).await?;
        }
        write_private(path, &bytes).await?;

        tracing::info!(path = %path.display(), accounts = count, encrypted = password.is_some(), "Vault exported");
        let event = Event::new("run.export", "config").by(principal).with_message(
            EventMessage::new("Export completed")
                .add_detail("Accounts", count)
                .add_detail("Encrypted", password.is_some()),
        );
        self.events.dispatch(event).await;
        Ok(count)
    }
}

/// Create `dir` and restrict it to the owner, tightening it if it exists
pub async fn private_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(dir).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await?;
    }
    Ok(())
}

/// Owner-only file, written under a fresh name and renamed into place so
/// an existing file or symlink at `path` is replaced rather than followed
async fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let written = async {
        let mut file = options.open(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, path).await
    }
    .await;
    if written.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::Account;
    use crate::crypto::{decrypt, EncryptedData};
    use crate::items::Category;
    use crate::storage::testing::store;
    use crate::storage::StorageError;

    async fn seeded() -> (tempfile::TempDir, Arc<Store>) {
        let (dir, store) = store().await;
        let sealed = store.seal("s3cret").unwrap();
        store
            .write(|data| {
                let category_id = data.categories.insert(Category::new("Servers", None));
                let mut account = Account::blank("web01");
                account.login = "root".to_string();
                account.category_id = category_id;
                account.password = sealed;
                data.accounts.insert(account);
                Ok::<_, StorageError>(())
            })
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_plain_export() {
        let (dir, store) = seeded().await;
        let service = ExportService::new(store, Arc::new(EventDispatcher::new()));
        let path = dir.path().join("backup/export.json");

        let n = service.export(&Principal::system(), &path, None, None).await.unwrap();
        assert_eq!(n, 1);

        let doc: ExportDocument =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(doc.version, EXPORT_VERSION);
        assert_eq!(doc.categories[0].name, "Servers");
        assert_eq!(doc.accounts[0].password, "s3cret");
        assert_eq!(doc.accounts[0].category_id, doc.categories[0].id);
    }

    #[tokio::test]
    async fn test_encrypted_export_opens_with_password() {
        let (dir, store) = seeded().await;
        let service = ExportService::new(store, Arc::new(EventDispatcher::new()));
        let path = dir.path().join("export.json");
        let password = SecretString::from("export-pass".to_string());

        service
            .export(&Principal::system(), &path, Some(&password), None)
            .await
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("s3cret"));
        let wrapped: EncryptedExport = serde_json::from_str(&raw).unwrap();
        assert!(wrapped.encrypted);

        let salt = STANDARD.decode(&wrapped.salt).unwrap();
        let key = derive_key(&password, &salt).unwrap();
        let doc: ExportDocument =
            serde_json::from_slice(&decrypt(&EncryptedData::decode(&wrapped.data).unwrap(), &key).unwrap())
                .unwrap();
        assert_eq!(doc.accounts[0].password, "s3cret");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_export_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, store) = seeded().await;
        let service = ExportService::new(store, Arc::new(EventDispatcher::new()));
        let exports = dir.path().join("exports");
        private_dir(&exports).await.unwrap();

        // A stale world-readable file is replaced, not reused
        let path = exports.join("export.json");
        std::fs::write(&path, "old").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        service.export(&Principal::system(), &path, None, None).await.unwrap();

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o077, 0);
        let dir_mode = std::fs::metadata(&exports).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o077, 0);
        assert!(std::fs::read_to_string(&path).unwrap().contains("s3cret"));
        assert_eq!(std::fs::read_dir(&exports).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_private_dir_tightens_existing() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let exports = dir.path().join("exports");
        std::fs::create_dir(&exports).unwrap();
        std::fs::set_permissions(&exports, std::fs::Permissions::from_mode(0o777)).unwrap();

        private_dir(&exports).await.unwrap();
        let mode = std::fs::metadata(&exports).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn test_export_requires_backup_permission() {
        let (dir, store) = seeded().await;
        let service = ExportService::new(store, Arc::new(EventDispatcher::new()));
        let mut user = Principal::system();
        user.is_admin_app = false;
        user.permissions.clear();

        let result = service.export(&user, &dir.path().join("x.json"), None, None).await;
        assert!(matches!(result, Err(InstallError::Acl(_))));
        assert!(!dir.path().join("x.json").exists());
    }
}
