//! In-app notifications

use crate::acl::Principal;
use crate::events::{Event, EventError, EventFilter, EventReceiver};
use crate::storage::{StorageError, Store};
use crate::{ItemSearch, ItemSearchResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Event raised when a public link is opened
pub const LINK_VIEW_EVENT: &str = "show.account.link";

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Notification {0} not found")]
    NotFound(u64),

    #[error("Sticky notifications can only be removed by an administrator")]
    Sticky,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    /// Short category such as "Information" or "Warning"
    pub kind: String,
    pub component: String,
    pub description: String,
    pub date: DateTime<Utc>,
    /// 0 addresses everyone
    pub user_id: u64,
    pub checked: bool,
    pub sticky: bool,
    pub only_admin: bool,
}

impl Notification {
    pub fn new(
        kind: impl Into<String>,
        component: impl Into<String>,
        description: impl Into<String>,
        user_id: u64,
    ) -> Self {
        Self {
            id: 0,
            kind: kind.into(),
            component: component.into(),
            description: description.into(),
            date: Utc::now(),
            user_id,
            checked: false,
            sticky: false,
            only_admin: false,
        }
    }

    pub fn sticky(mut self) -> Self {
        self.sticky = true;
        self
    }

    pub fn admins_only(mut self) -> Self {
        self.only_admin = true;
        self
    }

    /// Own notifications, global ones, and admin-only ones for admins
    pub fn addressed_to(&self, principal: &Principal) -> bool {
        if self.only_admin && !principal.is_admin() {
            return false;
        }
        self.user_id == 0 || self.user_id == principal.id
    }
}

pub struct NotificationService {
    store: Arc<Store>,
    page_size: usize,
}

impl NotificationService {
    pub fn new(store: Arc<Store>, page_size: usize) -> Self {
        Self { store, page_size }
    }

    pub async fn create(&self, notification: Notification) -> Result<u64, NotificationError> {
        let user_id = notification.user_id;
        let id = self
            .store
            .write(|data| Ok::<_, StorageError>(data.notifications.insert(notification)))
            .await?;
        tracing::debug!(notification_id = id, user_id, "Notification created");
        Ok(id)
    }

    /// Newest first
    pub fn for_user(&self, principal: &Principal) -> Vec<Notification> {
        let data = self.store.read();
        let mut list: Vec<Notification> = data
            .notifications
            .values()
            .filter(|n| n.addressed_to(principal))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
        list
    }

    pub fn unread_count(&self, principal: &Principal) -> usize {
        self.store
            .read()
            .notifications
            .values()
            .filter(|n| !n.checked && n.addressed_to(principal))
            .count()
    }

    pub async fn mark_read(&self, principal: &Principal, id: u64) -> Result<(), NotificationError> {
        self.store
            .write(|data| {
                let notification = data
                    .notifications
                    .get_mut(id)
                    .filter(|n| n.addressed_to(principal))
                    .ok_or(NotificationError::NotFound(id))?;
                notification.checked = true;
                Ok::<_, NotificationError>(())
            })
            .await
    }

    pub async fn delete(&self, principal: &Principal, id: u64) -> Result<(), NotificationError> {
        self.store
            .write(|data| {
                let notification = data
                    .notifications
                    .get(id)
                    .filter(|n| principal.is_admin() || n.addressed_to(principal))
                    .ok_or(NotificationError::NotFound(id))?;
                if notification.sticky && !principal.is_admin() {
                    return Err(NotificationError::Sticky);
                }
                data.notifications.remove(id);
                Ok(())
            })
            .await
    }

    /// Admins search every notification, others only their own
    pub fn search(&self, principal: &Principal, search: &ItemSearch) -> ItemSearchResult<Notification> {
        let data = self.store.read();
        let mut matches: Vec<Notification> = data
            .notifications
            .values()
            .filter(|n| principal.is_admin() || n.addressed_to(principal))
            .filter(|n| search.matches([n.kind.as_str(), n.component.as_str(), n.description.as_str()]))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
        search.paginate(matches, self.page_size)
    }
}

/// Turns selected events into notifications.
///
/// Configured events notify administrators. Public link views notify the
/// link owner when the link asks for it.
pub struct NotificationReceiver {
    service: Arc<NotificationService>,
    notify_events: EventFilter,
}

impl NotificationReceiver {
    /// An empty `notify_events` list notifies nothing but link views
    pub fn new(service: Arc<NotificationService>, notify_events: &[String]) -> Self {
        Self {
            service,
            notify_events: EventFilter::Only(notify_events.to_vec()),
        }
    }

    fn for_event(&self, event: &Event) -> Option<Notification> {
        if event.name == LINK_VIEW_EVENT {
            let notify = event.message.detail("Notify") == Some("true");
            let owner = event.message.detail("Owner")?.parse::<u64>().ok()?;
            return notify.then(|| {
                Notification::new("Information", "Public link", event.message.compose(), owner)
            });
        }

        if !self.notify_events.matches(&event.name) {
            return None;
        }
        let mut description = event.message.compose();
        if let Some(login) = &event.login {
            description = format!("{} ({})", description, login);
        }
        let kind = if event.is_warning() { "Warning" } else { "Information" };
        Some(Notification::new(kind, event.name.clone(), description, 0).admins_only())
    }
}

#[async_trait]
impl EventReceiver for NotificationReceiver {
    fn name(&self) -> &str {
        "notifications"
    }

    fn events(&self) -> EventFilter {
        match &self.notify_events {
            EventFilter::All => EventFilter::All,
            EventFilter::Only(names) => {
                let mut names = names.clone();
                names.push(LINK_VIEW_EVENT.to_string());
                EventFilter::Only(names)
            }
        }
    }

    async fn receive(&self, event: &Event) -> Result<(), EventError> {
        let Some(notification) = self.for_event(event) else {
            return Ok(());
        };
        self.service
            .create(notification)
            .await
            .map_err(|e| EventError::Receiver {
                receiver: "notifications".to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventMessage;
    use crate::storage::testing;

    fn user(id: u64) -> Principal {
        Principal {
            id,
            login: format!("user{}", id),
            is_admin_app: false,
            is_admin_acc: false,
            ..Principal::system()
        }
    }

    #[tokio::test]
    async fn test_addressing() {
        let (_dir, store) = testing::store().await;
        let service = NotificationService::new(store, 10);

        service.create(Notification::new("Information", "test", "for 1", 1)).await.unwrap();
        service.create(Notification::new("Information", "test", "for 2", 2)).await.unwrap();
        service.create(Notification::new("Information", "test", "everyone", 0)).await.unwrap();
        service
            .create(Notification::new("Warning", "test", "admins", 0).admins_only())
            .await
            .unwrap();

        let mine: Vec<String> = service.for_user(&user(1)).into_iter().map(|n| n.description).collect();
        assert_eq!(mine.len(), 2);
        assert!(mine.contains(&"for 1".to_string()));
        assert!(mine.contains(&"everyone".to_string()));

        let admin = Principal { id: 9, ..Principal::system() };
        assert_eq!(service.for_user(&admin).len(), 2);
        assert_eq!(service.search(&admin, &ItemSearch::default()).total, 4);
        assert_eq!(service.search(&user(2), &ItemSearch::new("everyone")).total, 1);
    }

    #[tokio::test]
    async fn test_read_and_delete() {
        let (_dir, store) = testing::store().await;
        let service = NotificationService::new(store, 10);
        let plain = service.create(Notification::new("Information", "test", "a", 1)).await.unwrap();
        let sticky = service
            .create(Notification::new("Information", "test", "b", 1).sticky())
            .await
            .unwrap();

        assert_eq!(service.unread_count(&user(1)), 2);
        service.mark_read(&user(1), plain).await.unwrap();
        assert_eq!(service.unread_count(&user(1)), 1);
        assert!(matches!(
            service.mark_read(&user(2), sticky).await,
            Err(NotificationError::NotFound(_))
        ));

        assert!(matches!(service.delete(&user(1), sticky).await, Err(NotificationError::Sticky)));
        service.delete(&user(1), plain).await.unwrap();
        service.delete(&Principal::system(), sticky).await.unwrap();
        assert!(service.for_user(&user(1)).is_empty());
    }

    #[tokio::test]
    async fn test_receiver_notifies_link_owner_and_admins() {
        let (_dir, store) = testing::store().await;
        let service = Arc::new(NotificationService::new(store, 10));
        let receiver = NotificationReceiver::new(service.clone(), &["login.fail".to_string()]);
        assert!(receiver.events().matches(LINK_VIEW_EVENT));
        assert!(!receiver.events().matches("create.account"));

        let quiet = Event::new(LINK_VIEW_EVENT, "links").with_message(
            EventMessage::new("Link viewed").add_detail("Owner", 3).add_detail("Notify", false),
        );
        receiver.receive(&quiet).await.unwrap();
        assert!(service.for_user(&user(3)).is_empty());

        let loud = Event::new(LINK_VIEW_EVENT, "links").with_message(
            EventMessage::new("Link viewed").add_detail("Owner", 3).add_detail("Notify", true),
        );
        receiver.receive(&loud).await.unwrap();
        assert_eq!(service.for_user(&user(3)).len(), 1);

        receiver.receive(&Event::new("login.fail", "auth")).await.unwrap();
        let admin = Principal::system();
        let for_admin = service.for_user(&admin);
        assert!(for_admin.iter().any(|n| n.only_admin && n.kind == "Warning"));
        assert_eq!(service.for_user(&user(4)).len(), 0);
    }
}
