//! In-memory vault state and the write path that persists it

use super::{StorageBackend, StorageError};
use crate::accounts::{Account, AccountFile, AccountHistory};
use crate::acl::UserProfile;
use crate::auth::AuthToken;
use crate::crypto::{
    decrypt_string, derive_key, encrypt_string, generate_salt, hash_password, verify_password,
    EncryptedData, VaultKey,
};
use crate::events::EventRecord;
use crate::items::{Category, Client, Tag};
use crate::links::PublicLink;
use crate::notifications::Notification;
use crate::plugins::PluginRecord;
use crate::track::Track;
use crate::users::{User, UserGroup};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// A row with a numeric primary key
pub trait Record: Clone {
    fn id(&self) -> u64;
    fn set_id(&mut self, id: u64);
}

macro_rules! impl_record {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Record for $ty {
                fn id(&self) -> u64 {
                    self.id
                }

                fn set_id(&mut self, id: u64) {
                    self.id = id;
                }
            }
        )*
    };
}

impl_record!(
    User,
    UserGroup,
    UserProfile,
    Account,
    AccountHistory,
    AccountFile,
    Category,
    Client,
    Tag,
    PublicLink,
    Track,
    EventRecord,
    Notification,
    AuthToken,
    PluginRecord,
);

/// An id-keyed table with its own sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table<T> {
    #[serde(default)]
    next_id: u64,
    #[serde(default = "BTreeMap::new")]
    rows: BTreeMap<u64, T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            rows: BTreeMap::new(),
        }
    }
}

impl<T: Record> Table<T> {
    /// Insert a new row, assigning the next id
    pub fn insert(&mut self, mut row: T) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        row.set_id(id);
        self.rows.insert(id, row);
        id
    }

    /// Put a row back under its own id (used when restoring from history)
    pub fn restore(&mut self, row: T) {
        let id = row.id();
        self.next_id = self.next_id.max(id);
        self.rows.insert(id, row);
    }

    /// Replace an existing row. Returns false if the id is unknown.
    pub fn update(&mut self, row: T) -> bool {
        match self.rows.get_mut(&row.id()) {
            Some(slot) => {
                *slot = row;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: u64) -> Option<&T> {
        self.rows.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut T> {
        self.rows.get_mut(&id)
    }

    pub fn remove(&mut self, id: u64) -> Option<T> {
        self.rows.remove(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.rows.contains_key(&id)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.rows.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.rows.values_mut()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.rows.retain(|_, row| keep(row));
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Drop the oldest rows until at most `max` remain. Returns how many went.
    pub fn keep_newest(&mut self, max: usize) -> usize {
        let mut dropped = 0;
        while self.rows.len() > max && self.rows.pop_first().is_some() {
            dropped += 1;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Installation metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultMeta {
    #[serde(default)]
    pub installed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub app_version: String,
    /// bcrypt hash of the master password
    #[serde(default)]
    pub master_hash: String,
    /// Base64 salt for the account data key
    #[serde(default)]
    pub data_salt: String,
    #[serde(default)]
    pub master_changed_at: Option<DateTime<Utc>>,
}

impl VaultMeta {
    pub fn is_installed(&self) -> bool {
        self.installed_at.is_some()
    }

    fn data_salt_bytes(&self) -> Result<Vec<u8>, StorageError> {
        STANDARD
            .decode(&self.data_salt)
            .map_err(|e| StorageError::Serialization(format!("invalid data salt: {}", e)))
    }
}

/// Everything the vault holds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultData {
    #[serde(default)]
    pub meta: VaultMeta,
    #[serde(default)]
    pub users: Table<User>,
    #[serde(default)]
    pub groups: Table<UserGroup>,
    #[serde(default)]
    pub profiles: Table<UserProfile>,
    #[serde(default)]
    pub accounts: Table<Account>,
    #[serde(default)]
    pub history: Table<AccountHistory>,
    #[serde(default)]
    pub files: Table<AccountFile>,
    /// user id -> favourite account ids
    #[serde(default)]
    pub favorites: BTreeMap<u64, BTreeSet<u64>>,
    #[serde(default)]
    pub categories: Table<Category>,
    #[serde(default)]
    pub clients: Table<Client>,
    #[serde(default)]
    pub tags: Table<Tag>,
    #[serde(default)]
    pub links: Table<PublicLink>,
    #[serde(default)]
    pub tracks: Table<Track>,
    #[serde(default)]
    pub events: Table<EventRecord>,
    #[serde(default)]
    pub notifications: Table<Notification>,
    #[serde(default)]
    pub tokens: Table<AuthToken>,
    #[serde(default)]
    pub plugins: Table<PluginRecord>,

    // Secondary indexes (not serialized, rebuilt after every write)
    #[serde(skip)]
    login_index: HashMap<String, u64>,
    #[serde(skip)]
    token_index: HashMap<String, u64>,
    #[serde(skip)]
    link_index: HashMap<String, u64>,
}

impl VaultData {
    pub fn rebuild_indexes(&mut self) {
        self.login_index = self
            .users
            .values()
            .map(|u| (u.login.to_lowercase(), u.id))
            .collect();
        self.token_index = self
            .tokens
            .values()
            .map(|t| (t.token_hash.clone(), t.id))
            .collect();
        self.link_index = self.links.values().map(|l| (l.hash.clone(), l.id)).collect();
    }

    /// Case-insensitive login lookup
    pub fn user_by_login(&self, login: &str) -> Option<&User> {
        self.login_index
            .get(&login.to_lowercase())
            .and_then(|id| self.users.get(*id))
            .or_else(|| {
                // rows inserted earlier in the same write are not indexed yet
                self.users.values().find(|u| u.login.eq_ignore_ascii_case(login))
            })
    }

    pub fn token_by_hash(&self, hash: &str) -> Option<&AuthToken> {
        self.token_index.get(hash).and_then(|id| self.tokens.get(*id))
    }

    pub fn link_by_hash(&self, hash: &str) -> Option<&PublicLink> {
        self.link_index.get(hash).and_then(|id| self.links.get(*id))
    }

    pub fn group_by_name(&self, name: &str) -> Option<&UserGroup> {
        self.groups.values().find(|g| g.name.eq_ignore_ascii_case(name))
    }

    pub fn is_favorite(&self, user_id: u64, account_id: u64) -> bool {
        self.favorites
            .get(&user_id)
            .is_some_and(|set| set.contains(&account_id))
    }
}

/// Shared handle to the decoded vault
pub struct Store {
    backend: Arc<dyn StorageBackend>,
    data: RwLock<VaultData>,
    data_key: RwLock<VaultKey>,
    write_lock: tokio::sync::Mutex<()>,
}

impl Store {
    /// Open an installed vault
    pub async fn open(
        backend: Arc<dyn StorageBackend>,
        master: &SecretString,
    ) -> Result<Self, StorageError> {
        let data = backend.load().await?;
        if !data.meta.is_installed() {
            return Err(StorageError::NotInstalled);
        }
        let data_key = derive_key(master, &data.meta.data_salt_bytes()?)?;

        tracing::debug!(location = %backend.location(), "Vault opened");

        Ok(Self {
            backend,
            data: RwLock::new(data),
            data_key: RwLock::new(data_key),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Start an empty vault protected by `master` and persist it
    pub async fn initialize(
        backend: Arc<dyn StorageBackend>,
        master: &SecretString,
    ) -> Result<Self, StorageError> {
        let salt = generate_salt();
        let data_key = derive_key(master, &salt)?;

        let mut data = VaultData::default();
        data.meta.data_salt = STANDARD.encode(&salt);
        data.meta.master_hash = hash_password(master.expose_secret())?;

        let store = Self {
            backend,
            data: RwLock::new(data),
            data_key: RwLock::new(data_key),
            write_lock: tokio::sync::Mutex::new(()),
        };
        store.write(|_| Ok::<_, StorageError>(())).await?;
        Ok(store)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, VaultData> {
        self.data.read()
    }

    /// Apply a mutation and persist the resulting snapshot.
    ///
    /// `f` works on a copy of the vault. The copy replaces the live data
    /// only once the backend has stored it, so an error from `f` or from
    /// the backend leaves readers seeing the previous state. Writers are
    /// serialized.
    pub async fn write<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut VaultData) -> Result<R, E>,
        E: From<StorageError>,
    {
        let _guard = self.write_lock.lock().await;

        let mut next = self.data.read().clone();
        let result = f(&mut next)?;
        next.rebuild_indexes();
        let snapshot =
            serde_json::to_vec(&next).map_err(|e| StorageError::Serialization(e.to_string()))?;

        self.backend.persist(snapshot).await?;
        *self.data.write() = next;
        Ok(result)
    }

    /// Encrypt an account secret with the data key
    pub fn seal(&self, plaintext: &str) -> Result<EncryptedData, StorageError> {
        Ok(encrypt_string(plaintext, &self.data_key.read())?)
    }

    /// Decrypt an account secret with the data key
    pub fn unseal(&self, sealed: &EncryptedData) -> Result<String, StorageError> {
        Ok(decrypt_string(sealed, &self.data_key.read())?)
    }

    pub fn verify_master(&self, password: &str) -> bool {
        verify_password(password, &self.data.read().meta.master_hash)
    }

    /// Re-encrypt every account secret under a new master password and
    /// rekey the vault file. `progress` receives `(done, total)`.
    pub async fn rekey<P>(&self, new_master: &SecretString, mut progress: P) -> Result<usize, StorageError>
    where
        P: FnMut(usize, usize) + Send,
    {
        let _guard = self.write_lock.lock().await;

        let salt = generate_salt();
        let new_key = derive_key(new_master, &salt)?;
        let master_hash = hash_password(new_master.expose_secret())?;

        let mut next = self.data.read().clone();
        let total = {
            let key = self.data_key.read();
            let total = next.accounts.len() + next.history.len();
            let mut done = 0;

            for account in next.accounts.values_mut() {
                account.password = encrypt_string(&decrypt_string(&account.password, &key)?, &new_key)?;
                done += 1;
                progress(done, total);
            }
            for entry in next.history.values_mut() {
                let plain = decrypt_string(&entry.snapshot.password, &key)?;
                entry.snapshot.password = encrypt_string(&plain, &new_key)?;
                done += 1;
                progress(done, total);
            }
            total
        };

        next.meta.data_salt = STANDARD.encode(&salt);
        next.meta.master_hash = master_hash;
        next.meta.master_changed_at = Some(Utc::now());
        let snapshot =
            serde_json::to_vec(&next).map_err(|e| StorageError::Serialization(e.to_string()))?;

        self.backend.persist_rekeyed(snapshot, new_master).await?;
        *self.data.write() = next;
        *self.data_key.write() = new_key;
        Ok(total)
    }

    pub async fn health_check(&self) -> Result<(), StorageError> {
        self.backend.health_check().await
    }

    pub fn location(&self) -> String {
        self.backend.location()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::Category;
    use crate::storage::FileStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    fn pw(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[test]
    fn test_table_assigns_sequential_ids() {
        let mut table: Table<Category> = Table::default();
        let a = table.insert(Category::new("A", None));
        let b = table.insert(Category::new("B", None));
        assert_eq!((a, b), (1, 2));

        table.remove(a);
        let c = table.insert(Category::new("C", None));
        assert_eq!(c, 3);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_table_restore_bumps_sequence() {
        let mut table: Table<Category> = Table::default();
        let mut row = Category::new("Old", None);
        row.id = 10;
        table.restore(row);
        assert_eq!(table.insert(Category::new("New", None)), 11);
    }

    #[tokio::test]
    async fn test_uninstalled_vault_cannot_be_opened() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        let backend = Arc::new(FileStorage::create(&path, &pw("master")).await.unwrap());
        Store::initialize(backend, &pw("master")).await.unwrap();

        let backend = Arc::new(FileStorage::open(&path, &pw("master")).await.unwrap());
        assert!(matches!(
            Store::open(backend, &pw("master")).await,
            Err(StorageError::NotInstalled)
        ));
    }

    #[tokio::test]
    async fn test_write_persists_and_seal_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        let backend = Arc::new(FileStorage::create(&path, &pw("master")).await.unwrap());
        let store = Store::initialize(backend, &pw("master")).await.unwrap();

        let sealed = store.seal("hunter2").unwrap();
        assert_eq!(store.unseal(&sealed).unwrap(), "hunter2");
        assert!(store.verify_master("master"));
        assert!(!store.verify_master("other"));

        store
            .write(|data| {
                data.meta.installed_at = Some(Utc::now());
                data.categories.insert(Category::new("Web", None));
                Ok::<_, StorageError>(())
            })
            .await
            .unwrap();

        let backend = Arc::new(FileStorage::open(&path, &pw("master")).await.unwrap());
        let reopened = Store::open(backend, &pw("master")).await.unwrap();
        assert_eq!(reopened.read().categories.len(), 1);
        assert_eq!(reopened.unseal(&sealed).unwrap(), "hunter2");
    }

    /// File backend whose writes can be switched off
    struct FlakyBackend {
        inner: FileStorage,
        fail: AtomicBool,
    }

    impl FlakyBackend {
        fn check(&self) -> Result<(), StorageError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("disk full".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl StorageBackend for FlakyBackend {
        async fn load(&self) -> Result<VaultData, StorageError> {
            self.inner.load().await
        }

        async fn persist(&self, snapshot: Vec<u8>) -> Result<(), StorageError> {
            self.check()?;
            self.inner.persist(snapshot).await
        }

        async fn persist_rekeyed(&self, snapshot: Vec<u8>, password: &SecretString) -> Result<(), StorageError> {
            self.check()?;
            self.inner.persist_rekeyed(snapshot, password).await
        }

        async fn health_check(&self) -> Result<(), StorageError> {
            self.inner.health_check().await
        }

        fn location(&self) -> String {
            self.inner.location()
        }
    }

    async fn flaky_store(path: &std::path::Path) -> (Arc<FlakyBackend>, Store) {
        let backend = Arc::new(FlakyBackend {
            inner: FileStorage::create(path, &pw("master")).await.unwrap(),
            fail: AtomicBool::new(false),
        });
        let store = Store::initialize(backend.clone(), &pw("master")).await.unwrap();
        (backend, store)
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_data_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        let (backend, store) = flaky_store(&path).await;

        backend.fail.store(true, Ordering::SeqCst);
        let result = store
            .write(|data| {
                data.categories.insert(Category::new("Lost", None));
                Ok::<_, StorageError>(())
            })
            .await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));
        assert!(store.read().categories.is_empty());

        // A closure error after a partial change is discarded as well
        backend.fail.store(false, Ordering::SeqCst);
        let result = store
            .write(|data| {
                data.categories.insert(Category::new("Half", None));
                Err::<(), _>(StorageError::Unavailable("rejected".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert!(store.read().categories.is_empty());

        store
            .write(|data| {
                data.categories.insert(Category::new("Kept", None));
                Ok::<_, StorageError>(())
            })
            .await
            .unwrap();

        let reopened = Store::open(Arc::new(FileStorage::open(&path, &pw("master")).await.unwrap()), &pw("master"))
            .await
            .unwrap();
        let names: Vec<String> = reopened.read().categories.values().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["Kept".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_rekey_keeps_old_master() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.enc");
        let (backend, store) = flaky_store(&path).await;
        let sealed = store.seal("hunter2").unwrap();

        backend.fail.store(true, Ordering::SeqCst);
        assert!(store.rekey(&pw("new-master"), |_, _| {}).await.is_err());

        assert!(store.verify_master("master"));
        assert!(!store.verify_master("new-master"));
        assert_eq!(store.unseal(&sealed).unwrap(), "hunter2");

        backend.fail.store(false, Ordering::SeqCst);
        store.rekey(&pw("new-master"), |_, _| {}).await.unwrap();
        assert!(store.verify_master("new-master"));
    }
}
