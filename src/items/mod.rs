//! Categories, clients and tags
//!
//! The three share one shape (a unique, normalised name) and one service,
//! [`ItemService`], parameterised by [`NamedItem`].

mod service;

pub use service::{CategoryService, ClientService, ItemService, TagService};

use crate::acl::{AclError, Permission};
use crate::crypto::item_hash;
use crate::storage::{Record, StorageError, Table, VaultData};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ItemError {
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    #[error("{kind} '{name}' is in use by {accounts} account(s)")]
    InUse {
        kind: &'static str,
        name: String,
        accounts: usize,
    },

    #[error("Name must not be empty")]
    EmptyName,

    #[error(transparent)]
    Acl(#[from] AclError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// An item identified by a unique, normalised name
pub trait NamedItem: Record + Serialize + Send + Sync + 'static {
    /// Used in messages and event names
    const KIND: &'static str;
    const PERMISSION: Permission;

    fn name(&self) -> &str;
    fn hash(&self) -> &str;
    /// Set the name and recompute the hash
    fn rename(&mut self, name: &str);

    fn table(data: &VaultData) -> &Table<Self>;
    fn table_mut(data: &mut VaultData) -> &mut Table<Self>;

    /// Number of accounts referencing the item that block its deletion
    fn usage(_data: &VaultData, _id: u64) -> usize {
        0
    }

    /// Remove references before deletion
    fn detach(_data: &mut VaultData, _id: u64) {}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

impl Category {
    pub fn new(name: &str, description: Option<String>) -> Self {
        Self {
            id: 0,
            name: name.trim().to_string(),
            description,
            hash: item_hash(name),
            created_at: Utc::now(),
        }
    }
}

impl NamedItem for Category {
    const KIND: &'static str = "category";
    const PERMISSION: Permission = Permission::ManageCategories;

    fn name(&self) -> &str {
        &self.name
    }

    fn hash(&self) -> &str {
        &self.hash
    }

    fn rename(&mut self, name: &str) {
        self.name = name.trim().to_string();
        self.hash = item_hash(name);
    }

    fn table(data: &VaultData) -> &Table<Self> {
        &data.categories
    }

    fn table_mut(data: &mut VaultData) -> &mut Table<Self> {
        &mut data.categories
    }

    fn usage(data: &VaultData, id: u64) -> usize {
        data.accounts.values().filter(|a| a.category_id == id).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Offered to every user, not only those with visible accounts
    #[serde(default)]
    pub is_global: bool,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

impl Client {
    pub fn new(name: &str, description: Option<String>, is_global: bool) -> Self {
        Self {
            id: 0,
            name: name.trim().to_string(),
            description,
            is_global,
            hash: item_hash(name),
            created_at: Utc::now(),
        }
    }
}

impl NamedItem for Client {
    const KIND: &'static str = "client";
    const PERMISSION: Permission = Permission::ManageClients;

    fn name(&self) -> &str {
        &self.name
    }

    fn hash(&self) -> &str {
        &self.hash
    }

    fn rename(&mut self, name: &str) {
        self.name = name.trim().to_string();
        self.hash = item_hash(name);
    }

    fn table(data: &VaultData) -> &Table<Self> {
        &data.clients
    }

    fn table_mut(data: &mut VaultData) -> &mut Table<Self> {
        &mut data.clients
    }

    fn usage(data: &VaultData, id: u64) -> usize {
        data.accounts.values().filter(|a| a.client_id == id).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: u64,
    pub name: String,
    pub hash: String,
}

impl Tag {
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            name: name.trim().to_string(),
            hash: item_hash(name),
        }
    }
}

impl NamedItem for Tag {
    const KIND: &'static str = "tag";
    const PERMISSION: Permission = Permission::ManageTags;

    fn name(&self) -> &str {
        &self.name
    }

    fn hash(&self) -> &str {
        &self.hash
    }

    fn rename(&mut self, name: &str) {
        self.name = name.trim().to_string();
        self.hash = item_hash(name);
    }

    fn table(data: &VaultData) -> &Table<Self> {
        &data.tags
    }

    fn table_mut(data: &mut VaultData) -> &mut Table<Self> {
        &mut data.tags
    }

    fn detach(data: &mut VaultData, id: u64) {
        for account in data.accounts.values_mut() {
            account.tags.remove(&id);
        }
    }
}
