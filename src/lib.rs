//! sysPass - a team password manager
//!
//! Accounts (stored credentials) are shared between users and groups and
//! gated by profile permissions and per-account ACLs. Everything lives in a
//! single encrypted vault file; account passwords are additionally sealed
//! with a data key derived from the master password.

pub mod accounts;
pub mod acl;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod events;
pub mod install;
pub mod items;
pub mod links;
pub mod notifications;
pub mod plugins;
pub mod search;
pub mod server;
pub mod storage;
pub mod tasks;
pub mod track;
pub mod users;
pub mod web;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;
use uuid::Uuid;

/// Core error type
#[derive(Error, Debug)]
pub enum SyspassError {
    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error(transparent)]
    Acl(#[from] acl::AclError),

    #[error("Account error: {0}")]
    Account(#[from] accounts::AccountError),

    #[error("Item error: {0}")]
    Item(#[from] items::ItemError),

    #[error("User error: {0}")]
    User(#[from] users::UserError),

    #[error("Link error: {0}")]
    Link(#[from] links::LinkError),

    #[error("Track error: {0}")]
    Track(#[from] track::TrackError),

    #[error("Task error: {0}")]
    Task(#[from] tasks::TaskError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] plugins::PluginError),

    #[error("Install error: {0}")]
    Install(#[from] install::InstallError),

    #[error("Authentication error: {0}")]
    Auth(#[from] auth::AuthError),

    #[error("Notification error: {0}")]
    Notification(#[from] notifications::NotificationError),
}

/// Where a request came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub ip: IpAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new(ip: IpAddr) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            ip,
            user_agent: None,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Requests issued from the local CLI
    pub fn local() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

/// Search text plus paging, shared by every list screen
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemSearch {
    #[serde(default)]
    pub text: Option<String>,
    /// `None` uses the configured page size, `Some(0)` returns everything
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl ItemSearch {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Everything, unpaged
    pub fn all() -> Self {
        Self {
            limit: Some(0),
            ..Default::default()
        }
    }

    pub fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// Case-insensitive containment against any of `fields`. An empty
    /// search matches everything.
    pub fn matches<'a>(&self, fields: impl IntoIterator<Item = &'a str>) -> bool {
        let needle = match self.text.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_lowercase(),
            _ => return true,
        };
        fields
            .into_iter()
            .any(|f| f.to_lowercase().contains(&needle))
    }

    /// Cut one page out of the full match list
    pub fn paginate<T>(&self, items: Vec<T>, default_limit: usize) -> ItemSearchResult<T> {
        let total = items.len();
        let limit = match self.limit.unwrap_or(default_limit) {
            0 => usize::MAX,
            n => n,
        };
        let items = items.into_iter().skip(self.offset).take(limit).collect();
        ItemSearchResult { total, items }
    }
}

/// One page of search results
#[derive(Debug, Clone, Serialize)]
pub struct ItemSearchResult<T> {
    /// Matches before paging
    pub total: usize,
    pub items: Vec<T>,
}

impl<T> ItemSearchResult<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ItemSearchResult<U> {
        ItemSearchResult {
            total: self.total,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}

/// Helper module for base64 encoding of bytes in serde
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_search_matches() {
        let search = ItemSearch::new("WEB");
        assert!(search.matches(["Webservers", "x"]));
        assert!(!search.matches(["Databases"]));
        assert!(ItemSearch::default().matches(["anything"]));
        assert!(ItemSearch::new("  ").matches(["anything"]));
    }

    #[test]
    fn test_paginate() {
        let items: Vec<u32> = (1..=30).collect();

        let page = ItemSearch::default().paginate(items.clone(), 12);
        assert_eq!(page.total, 30);
        assert_eq!(page.items.len(), 12);

        let page = ItemSearch::default().with_page(25, 10).paginate(items.clone(), 12);
        assert_eq!(page.items, vec![26, 27, 28, 29, 30]);

        let page = ItemSearch::all().paginate(items, 12);
        assert_eq!(page.items.len(), 30);
    }

    #[test]
    fn test_base64_bytes_field() {
        #[derive(Serialize, Deserialize)]
        struct Blob {
            #[serde(with = "base64_bytes")]
            data: Vec<u8>,
        }

        let json = serde_json::to_string(&Blob { data: vec![0, 1, 255] }).unwrap();
        assert_eq!(json, r#"{"data":"AAH/"}"#);
        let back: Blob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data, vec![0, 1, 255]);
    }
}
