//! Persistent audit log

use super::{Event, EventError, EventFilter, EventReceiver};
use crate::acl::{AclError, Permission, Principal};
use crate::storage::{StorageError, Store};
use crate::{ItemSearch, ItemSearchResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventLevel::Info => write!(f, "info"),
            EventLevel::Warn => write!(f, "warn"),
            EventLevel::Error => write!(f, "error"),
        }
    }
}

/// A stored audit log row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: u64,
    pub date: DateTime<Utc>,
    pub login: Option<String>,
    pub user_id: Option<u64>,
    pub ip: Option<IpAddr>,
    /// Event name
    pub action: String,
    pub description: String,
    pub level: EventLevel,
}

impl From<&Event> for EventRecord {
    fn from(event: &Event) -> Self {
        let level = if event.name.contains("error") {
            EventLevel::Error
        } else if event.is_warning() {
            EventLevel::Warn
        } else {
            EventLevel::Info
        };

        Self {
            id: 0,
            date: event.time,
            login: event.login.clone(),
            user_id: event.user_id,
            ip: event.ip,
            action: event.name.clone(),
            description: event.message.compose(),
            level,
        }
    }
}

/// Writes the configured events to the vault
pub struct EventlogReceiver {
    store: Arc<Store>,
    filter: EventFilter,
    max_rows: usize,
}

impl EventlogReceiver {
    /// `log_events` empty means log everything. Past `max_rows` the oldest
    /// records are dropped.
    pub fn new(store: Arc<Store>, log_events: &[String], max_rows: usize) -> Self {
        Self {
            store,
            filter: EventFilter::from_list(log_events),
            max_rows,
        }
    }
}

#[async_trait]
impl EventReceiver for EventlogReceiver {
    fn name(&self) -> &str {
        "eventlog"
    }

    fn events(&self) -> EventFilter {
        self.filter.clone()
    }

    async fn receive(&self, event: &Event) -> Result<(), EventError> {
        let record = EventRecord::from(event);
        let dropped = self
            .store
            .write(|data| {
                data.events.insert(record);
                Ok::<_, StorageError>(data.events.keep_newest(self.max_rows))
            })
            .await?;
        if dropped > 0 {
            tracing::debug!(dropped, "Oldest audit records pruned");
        }
        Ok(())
    }
}

/// Read and clear the audit log
pub struct EventLogService {
    store: Arc<Store>,
    page_size: usize,
}

impl EventLogService {
    pub fn new(store: Arc<Store>, page_size: usize) -> Self {
        Self { store, page_size }
    }

    /// Newest first
    pub fn search(
        &self,
        principal: &Principal,
        search: &ItemSearch,
    ) -> Result<ItemSearchResult<EventRecord>, AclError> {
        principal.require(Permission::EventLog)?;

        let data = self.store.read();
        let mut matches: Vec<EventRecord> = data
            .events
            .values()
            .filter(|e| {
                search.matches([
                    e.action.as_str(),
                    e.description.as_str(),
                    e.login.as_deref().unwrap_or(""),
                ])
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));

        Ok(search.paginate(matches, self.page_size))
    }

    /// Remove every record. Returns how many were dropped.
    pub async fn clear(&self, principal: &Principal) -> Result<usize, crate::SyspassError> {
        principal.require(Permission::EventLog)?;

        let removed = self
            .store
            .write(|data| {
                let n = data.events.len();
                data.events.clear();
                Ok::<_, StorageError>(n)
            })
            .await?;

        tracing::info!(removed, user = %principal.login, "Event log cleared");
        Ok(removed)
    }
}
