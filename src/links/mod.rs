//! Public links: time and view limited, unauthenticated access to a single
//! account's credentials

use crate::accounts::{account_with_acl, ensure, AccountError};
use crate::acl::{AclError, Permission, Principal};
use crate::config::LinksConfig;
use crate::crypto::random_hash;
use crate::events::{Event, EventDispatcher, EventMessage};
use crate::notifications::LINK_VIEW_EVENT;
use crate::storage::{StorageError, Store};
use crate::track::{TrackService, SOURCE_LINK};
use crate::{ItemSearch, ItemSearchResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Public links are disabled")]
    Disabled,

    #[error("Link not found")]
    NotFound,

    #[error("Link has expired or reached its view limit")]
    Expired,

    #[error("Account {0} already has a public link")]
    AlreadyExists(u64),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Acl(#[from] AclError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// One use of a link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkUse {
    pub ip: IpAddr,
    pub agent: Option<String>,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicLink {
    pub id: u64,
    pub account_id: u64,
    /// Creator, notified on use when `notify` is set
    pub user_id: u64,
    /// 32 random bytes, hex
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Views since the last refresh
    pub views: u32,
    pub total_views: u64,
    /// 0 means unlimited
    pub max_views: u32,
    pub notify: bool,
    #[serde(default)]
    pub use_info: Vec<LinkUse>,
}

impl PublicLink {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at && (self.max_views == 0 || self.views < self.max_views)
    }
}

/// What an anonymous visitor gets to see
#[derive(Debug, Clone, Serialize)]
pub struct LinkedAccount {
    pub name: String,
    pub login: String,
    pub url: String,
    pub password: String,
    pub expires_at: DateTime<Utc>,
}

/// Row of the link admin list
#[derive(Debug, Clone, Serialize)]
pub struct LinkSummary {
    pub link: PublicLink,
    pub account_name: String,
    pub owner_login: String,
    pub usable: bool,
}

pub struct LinkService {
    store: Arc<Store>,
    events: Arc<EventDispatcher>,
    tracks: Arc<TrackService>,
    config: LinksConfig,
    full_group_access: bool,
    page_size: usize,
}

impl LinkService {
    pub fn new(
        store: Arc<Store>,
        events: Arc<EventDispatcher>,
        tracks: Arc<TrackService>,
        config: LinksConfig,
        full_group_access: bool,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            events,
            tracks,
            config,
            full_group_access,
            page_size,
        }
    }

    fn expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.config.default_ttl)
            .unwrap_or_else(|_| chrono::Duration::minutes(15));
        now + ttl
    }

    async fn emit(&self, name: &str, principal: &Principal, link: &PublicLink) {
        let event = Event::new(name, "links").by(principal).with_message(
            EventMessage::new("Public link")
                .add_detail("Account", link.account_id)
                .add_detail("Link", link.id),
        );
        self.events.dispatch(event).await;
    }

    /// Owners manage their own links, link managers manage all of them
    fn can_manage(principal: &Principal, link: &PublicLink) -> bool {
        principal.has(Permission::ManagePublicLinks)
            || (link.user_id == principal.id && principal.has(Permission::AccountPublicLinks))
    }

    pub async fn create(&self, principal: &Principal, account_id: u64, notify: bool) -> Result<PublicLink, LinkError> {
        if !self.config.enabled {
            return Err(LinkError::Disabled);
        }
        principal.require(Permission::AccountPublicLinks)?;

        let now = Utc::now();
        let mut link = PublicLink {
            id: 0,
            account_id,
            user_id: principal.id,
            hash: random_hash(32),
            created_at: now,
            expires_at: self.expiry(now),
            views: 0,
            total_views: 0,
            max_views: self.config.max_views,
            notify,
            use_info: Vec::new(),
        };

        let full = self.full_group_access;
        link.id = self
            .store
            .write(|data| {
                let (_, acl) = account_with_acl(data, principal, account_id, full)?;
                ensure(acl.show_link, account_id)?;
                if data.links.values().any(|l| l.account_id == account_id) {
                    return Err(LinkError::AlreadyExists(account_id));
                }
                Ok(data.links.insert(link.clone()))
            })
            .await?;

        tracing::info!(link_id = link.id, account_id, user = %principal.login, "Public link created");
        self.emit("create.account.link", principal, &link).await;
        Ok(link)
    }

    /// Anonymous access by hash
    pub async fn view_by_hash(&self, hash: &str, ip: IpAddr, agent: Option<&str>) -> Result<LinkedAccount, LinkError> {
        if !self.config.enabled {
            return Err(LinkError::Disabled);
        }
        let request = self.tracks.request(ip, SOURCE_LINK);
        self.tracks.check(&request).await;

        let now = Utc::now();
        let visit = LinkUse {
            ip,
            agent: agent.map(str::to_string),
            time: now,
        };
        let result = self
            .store
            .write(|data| {
                let id = data.link_by_hash(hash).map(|l| l.id).ok_or(LinkError::NotFound)?;
                let link = data.links.get(id).ok_or(LinkError::NotFound)?;
                if !link.is_usable(now) {
                    return Err(LinkError::Expired);
                }
                let account = data
                    .accounts
                    .get(link.account_id)
                    .cloned()
                    .ok_or(LinkError::NotFound)?;
                let sealed = account
                    .parent_id
                    .and_then(|pid| data.accounts.get(pid))
                    .map(|parent| parent.password.clone())
                    .unwrap_or_else(|| account.password.clone());

                let link = data.links.get_mut(id).ok_or(LinkError::NotFound)?;
                link.views += 1;
                link.total_views += 1;
                link.use_info.push(visit);
                Ok((link.clone(), account, sealed))
            })
            .await;

        let (link, account, sealed) = match result {
            Ok(found) => found,
            Err(LinkError::NotFound) => {
                tracing::warn!(ip = %ip, "Unknown public link requested");
                if let Err(e) = self.tracks.add(&request, None).await {
                    tracing::warn!(error = %e, "Could not record track");
                }
                return Err(LinkError::NotFound);
            }
            Err(e) => return Err(e),
        };
        let password = self.store.unseal(&sealed)?;

        let event = Event::new(LINK_VIEW_EVENT, "links").from_ip(ip).with_message(
            EventMessage::new("Public link viewed")
                .add_detail("Account", &account.name)
                .add_detail("Link", link.id)
                .add_detail("Owner", link.user_id)
                .add_detail("Notify", link.notify)
                .add_detail("IP", ip)
                .add_detail("Agent", agent.unwrap_or("-")),
        );
        self.events.dispatch(event).await;

        Ok(LinkedAccount {
            name: account.name,
            login: account.login,
            url: account.url,
            password,
            expires_at: link.expires_at,
        })
    }

    /// New hash and expiry, view counter reset
    pub async fn refresh(&self, principal: &Principal, id: u64) -> Result<PublicLink, LinkError> {
        let now = Utc::now();
        let expires_at = self.expiry(now);
        let max_views = self.config.max_views;

        let link = self
            .store
            .write(|data| {
                let link = data.links.get_mut(id).ok_or(LinkError::NotFound)?;
                if !Self::can_manage(principal, link) {
                    return Err(AclError::PermissionDenied(Permission::ManagePublicLinks).into());
                }
                link.hash = random_hash(32);
                link.expires_at = expires_at;
                link.views = 0;
                link.max_views = max_views;
                Ok::<_, LinkError>(link.clone())
            })
            .await?;

        tracing::info!(link_id = id, user = %principal.login, "Public link refreshed");
        self.emit("refresh.account.link", principal, &link).await;
        Ok(link)
    }

    pub async fn delete(&self, principal: &Principal, id: u64) -> Result<(), LinkError> {
        let link = self
            .store
            .write(|data| {
                let link = data.links.get(id).ok_or(LinkError::NotFound)?;
                if !Self::can_manage(principal, link) {
                    return Err(AclError::PermissionDenied(Permission::ManagePublicLinks).into());
                }
                data.links.remove(id).ok_or(LinkError::NotFound)
            })
            .await?;

        self.emit("delete.account.link", principal, &link).await;
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<PublicLink> {
        self.store.read().links.get(id).cloned()
    }

    pub fn get_by_account(&self, account_id: u64) -> Option<PublicLink> {
        self.store
            .read()
            .links
            .values()
            .find(|l| l.account_id == account_id)
            .cloned()
    }

    pub fn search(&self, principal: &Principal, search: &ItemSearch) -> Result<ItemSearchResult<LinkSummary>, LinkError> {
        principal.require(Permission::ManagePublicLinks)?;

        let data = self.store.read();
        let now = Utc::now();
        let mut matches: Vec<LinkSummary> = data
            .links
            .values()
            .map(|link| LinkSummary {
                account_name: data
                    .accounts
                    .get(link.account_id)
                    .map(|a| a.name.clone())
                    .unwrap_or_default(),
                owner_login: data
                    .users
                    .get(link.user_id)
                    .map(|u| u.login.clone())
                    .unwrap_or_default(),
                usable: link.is_usable(now),
                link: link.clone(),
            })
            .filter(|s| search.matches([s.account_name.as_str(), s.owner_login.as_str()]))
            .collect();
        matches.sort_by(|a, b| b.link.created_at.cmp(&a.link.created_at));

        Ok(search.paginate(matches, self.page_size))
    }
}
