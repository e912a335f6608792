//! Users, groups and profiles

mod groups;
mod service;

pub use groups::{GroupService, ProfileService};
pub use service::{UserRequest, UserService};

use crate::acl::AclError;
use crate::crypto::CryptoError;
use crate::storage::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UserError {
    #[error("Login '{0}' is already taken")]
    LoginTaken(String),

    #[error("Group '{0}' already exists")]
    GroupExists(String),

    #[error("Profile '{0}' already exists")]
    ProfileExists(String),

    #[error("User {0} not found")]
    NotFound(u64),

    #[error("Group {0} not found")]
    GroupNotFound(u64),

    #[error("Profile {0} not found")]
    ProfileNotFound(u64),

    #[error("Users cannot delete themselves")]
    SelfDelete,

    #[error("User '{login}' owns {accounts} account(s)")]
    OwnsAccounts { login: String, accounts: usize },

    #[error("Group '{name}' is in use: {reason}")]
    GroupInUse { name: String, reason: String },

    #[error("Profile '{0}' is assigned to users")]
    ProfileInUse(String),

    #[error("Password must be at least {0} characters")]
    WeakPassword(usize),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error(transparent)]
    Acl(#[from] AclError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// A person who can log in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub login: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Main group
    pub group_id: u64,
    pub profile_id: u64,
    /// bcrypt
    pub password_hash: String,
    #[serde(default)]
    pub is_admin_app: bool,
    #[serde(default)]
    pub is_admin_acc: bool,
    #[serde(default)]
    pub is_disabled: bool,
    /// Must choose a new password at next login
    #[serde(default)]
    pub is_change_pass: bool,
    #[serde(default)]
    pub login_count: u64,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User data safe to show: no password hash
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: u64,
    pub name: String,
    pub login: String,
    pub email: Option<String>,
    pub group_id: u64,
    pub profile_id: u64,
    pub is_admin_app: bool,
    pub is_admin_acc: bool,
    pub is_disabled: bool,
    pub login_count: u64,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            login: user.login.clone(),
            email: user.email.clone(),
            group_id: user.group_id,
            profile_id: user.profile_id,
            is_admin_app: user.is_admin_app,
            is_admin_acc: user.is_admin_acc,
            is_disabled: user.is_disabled,
            login_count: user.login_count,
            last_login: user.last_login,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserGroup {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Secondary members; users whose main group this is are not listed
    #[serde(default)]
    pub members: BTreeSet<u64>,
    pub created_at: DateTime<Utc>,
}

impl UserGroup {
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            description,
            members: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }
}

pub(crate) fn check_password(password: &str, min_length: usize) -> Result<(), UserError> {
    if password.chars().count() < min_length {
        return Err(UserError::WeakPassword(min_length));
    }
    Ok(())
}
