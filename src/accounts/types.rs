//! Account records

use crate::acl::AccountAcl;
use crate::crypto::EncryptedData;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A user or group an account is shared with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountGrant {
    pub id: u64,
    #[serde(default)]
    pub can_edit: bool,
}

/// A stored credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub notes: String,
    pub category_id: u64,
    pub client_id: u64,
    pub owner_id: u64,
    pub main_group_id: u64,
    /// Last user to modify it
    pub edited_by: u64,
    /// Sealed with the vault data key
    pub password: EncryptedData,
    pub password_changed_at: DateTime<Utc>,
    #[serde(default)]
    pub password_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_private_group: bool,
    #[serde(default)]
    pub users: Vec<AccountGrant>,
    #[serde(default)]
    pub groups: Vec<AccountGrant>,
    #[serde(default)]
    pub tags: BTreeSet<u64>,
    /// Account this one links to (shares its password)
    #[serde(default)]
    pub parent_id: Option<u64>,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub decrypt_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// An unsaved account with no password and no references set
    pub fn blank(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            login: String::new(),
            url: String::new(),
            notes: String::new(),
            category_id: 0,
            client_id: 0,
            owner_id: 0,
            main_group_id: 0,
            edited_by: 0,
            password: EncryptedData::default(),
            password_changed_at: now,
            password_expires_at: None,
            is_private: false,
            is_private_group: false,
            users: Vec::new(),
            groups: Vec::new(),
            tags: BTreeSet::new(),
            parent_id: None,
            view_count: 0,
            decrypt_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.password_expires_at.is_some_and(|at| at <= now)
    }

    pub fn shared_with_user(&self, user_id: u64) -> bool {
        self.users.iter().any(|g| g.id == user_id)
    }

    pub fn shared_with_group(&self, group_id: u64) -> bool {
        self.groups.iter().any(|g| g.id == group_id)
    }
}

/// Why an account state was archived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryReason {
    Modified,
    Deleted,
    Restored,
}

impl std::fmt::Display for HistoryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryReason::Modified => write!(f, "modified"),
            HistoryReason::Deleted => write!(f, "deleted"),
            HistoryReason::Restored => write!(f, "restored"),
        }
    }
}

/// A previous state of an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountHistory {
    pub id: u64,
    pub account_id: u64,
    pub snapshot: Account,
    pub reason: HistoryReason,
    pub archived_at: DateTime<Utc>,
    pub archived_by: u64,
}

impl AccountHistory {
    pub fn archive(account: &Account, reason: HistoryReason, by: u64) -> Self {
        Self {
            id: 0,
            account_id: account.id,
            snapshot: account.clone(),
            reason,
            archived_at: Utc::now(),
            archived_by: by,
        }
    }
}

/// A file attached to an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountFile {
    pub id: u64,
    pub account_id: u64,
    pub name: String,
    pub mime: String,
    pub size: usize,
    #[serde(with = "crate::base64_bytes")]
    pub content: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// File metadata without the content
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub id: u64,
    pub account_id: u64,
    pub name: String,
    pub mime: String,
    pub size: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&AccountFile> for FileInfo {
    fn from(file: &AccountFile) -> Self {
        Self {
            id: file.id,
            account_id: file.account_id,
            name: file.name.clone(),
            mime: file.mime.clone(),
            size: file.size,
            created_at: file.created_at,
        }
    }
}

/// Input for creating or editing an account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountRequest {
    pub name: String,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub notes: String,
    pub category_id: u64,
    pub client_id: u64,
    /// Required on create, ignored on update (see `update_password`)
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_private_group: bool,
    /// Defaults to the acting user
    #[serde(default)]
    pub owner_id: Option<u64>,
    /// Defaults to the acting user's main group
    #[serde(default)]
    pub main_group_id: Option<u64>,
    #[serde(default)]
    pub users: Vec<AccountGrant>,
    #[serde(default)]
    pub groups: Vec<AccountGrant>,
    #[serde(default)]
    pub tags: BTreeSet<u64>,
    #[serde(default)]
    pub parent_id: Option<u64>,
}

/// An account as shown to a user, with names resolved
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    pub id: u64,
    pub name: String,
    pub login: String,
    pub url: String,
    pub notes: String,
    pub category_id: u64,
    pub category: String,
    pub client_id: u64,
    pub client: String,
    pub owner: String,
    pub main_group: String,
    pub tags: Vec<String>,
    pub users: Vec<(String, bool)>,
    pub groups: Vec<(String, bool)>,
    pub is_private: bool,
    pub is_private_group: bool,
    pub password_changed_at: DateTime<Utc>,
    pub password_expires_at: Option<DateTime<Utc>>,
    pub password_expired: bool,
    pub view_count: u64,
    pub decrypt_count: u64,
    pub is_favorite: bool,
    pub public_link: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub acl: AccountAcl,
}

/// A decrypted password
#[derive(Debug, Clone, Serialize)]
pub struct AccountPassword {
    pub account_id: u64,
    pub login: String,
    pub password: String,
}
