//! Failed attempt tracking
//!
//! Every failed login, API token check or public link lookup leaves a
//! [`Track`] keyed by source and IP. Once an IP piles up enough recent
//! tracks, further requests from it are slowed down.

use crate::acl::{AclError, Principal};
use crate::config::SecurityConfig;
use crate::events::{Event, EventDispatcher, EventMessage};
use crate::storage::{StorageError, Store};
use crate::{ItemSearch, ItemSearchResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const SOURCE_LOGIN: &str = "login";
pub const SOURCE_API: &str = "api";
pub const SOURCE_LINK: &str = "link";

#[derive(Error, Debug)]
pub enum TrackError {
    #[error("Track not found: {0}")]
    NotFound(u64),

    #[error(transparent)]
    Acl(#[from] AclError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// One failed attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: u64,
    pub user_id: Option<u64>,
    pub source: String,
    pub ip: IpAddr,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub unlocked_at: Option<DateTime<Utc>>,
}

impl Track {
    pub fn is_unlocked(&self) -> bool {
        self.unlocked_at.is_some()
    }
}

/// The window an attempt is judged against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRequest {
    pub ip: IpAddr,
    pub source: String,
    pub since: DateTime<Utc>,
}

pub struct TrackService {
    store: Arc<Store>,
    events: Arc<EventDispatcher>,
    config: SecurityConfig,
    page_size: usize,
}

impl TrackService {
    pub fn new(
        store: Arc<Store>,
        events: Arc<EventDispatcher>,
        config: SecurityConfig,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            events,
            config,
            page_size,
        }
    }

    pub fn request(&self, ip: IpAddr, source: &str) -> TrackRequest {
        let window = chrono::Duration::from_std(self.config.track_window)
            .unwrap_or_else(|_| chrono::Duration::zero());
        TrackRequest {
            ip,
            source: source.to_string(),
            since: Utc::now() - window,
        }
    }

    /// Live attempts from the request's IP and source inside the window
    pub fn count_recent(&self, request: &TrackRequest) -> usize {
        self.store
            .read()
            .tracks
            .values()
            .filter(|t| {
                t.ip == request.ip
                    && t.source == request.source
                    && t.time >= request.since
                    && !t.is_unlocked()
            })
            .count()
    }

    pub fn delay_for(&self, attempts: usize) -> Option<Duration> {
        if self.config.track_max_attempts == 0 || attempts < self.config.track_max_attempts {
            return None;
        }
        let factor = u32::try_from(attempts).unwrap_or(u32::MAX);
        Some(self.config.track_sleep_per_attempt.saturating_mul(factor))
    }

    /// Slow the caller down when the IP is over the limit.
    /// Returns `true` if a delay was applied.
    pub async fn check(&self, request: &TrackRequest) -> bool {
        let attempts = self.count_recent(request);
        let Some(delay) = self.delay_for(attempts) else {
            return false;
        };

        tracing::warn!(
            ip = %request.ip,
            source = %request.source,
            attempts,
            delay_ms = delay.as_millis() as u64,
            "Attempt limit exceeded, delaying"
        );
        let event = Event::new("track.delay", "track").from_ip(request.ip).with_message(
            EventMessage::new("Attempts limit exceeded")
                .add_detail("Source", &request.source)
                .add_detail("Attempts", attempts),
        );
        self.events.dispatch(event).await;

        tokio::time::sleep(delay).await;
        true
    }

    /// Record a failed attempt, pruning tracks past their retention
    pub async fn add(&self, request: &TrackRequest, user_id: Option<u64>) -> Result<u64, TrackError> {
        let track = Track {
            id: 0,
            user_id,
            source: request.source.clone(),
            ip: request.ip,
            time: Utc::now(),
            unlocked_at: None,
        };
        let retention = self.config.track_retention.max(self.config.track_window);
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(7));
        let (id, pruned) = self
            .store
            .write(|data| {
                let before = data.tracks.len();
                data.tracks.retain(|t| t.time >= cutoff);
                let pruned = before - data.tracks.len();
                Ok::<_, StorageError>((data.tracks.insert(track), pruned))
            })
            .await?;
        if pruned > 0 {
            tracing::debug!(pruned, "Expired tracks pruned");
        }

        let event = Event::new("track.add", "track").from_ip(request.ip).with_message(
            EventMessage::new("Failed attempt recorded").add_detail("Source", &request.source),
        );
        self.events.dispatch(event).await;
        Ok(id)
    }

    pub async fn unlock(&self, principal: &Principal, id: u64) -> Result<(), TrackError> {
        principal.require_admin()?;

        self.store
            .write(|data| {
                let track = data.tracks.get_mut(id).ok_or(TrackError::NotFound(id))?;
                track.unlocked_at = Some(Utc::now());
                Ok::<_, TrackError>(())
            })
            .await?;

        tracing::info!(track_id = id, user = %principal.login, "Track unlocked");
        Ok(())
    }

    pub async fn clear(&self, principal: &Principal) -> Result<usize, TrackError> {
        principal.require_admin()?;

        let removed = self
            .store
            .write(|data| {
                let n = data.tracks.len();
                data.tracks.clear();
                Ok::<_, StorageError>(n)
            })
            .await?;

        tracing::info!(removed, user = %principal.login, "Tracks cleared");
        Ok(removed)
    }

    /// Newest first. Matches on IP and source.
    pub fn list(&self, principal: &Principal, search: &ItemSearch) -> Result<ItemSearchResult<Track>, TrackError> {
        principal.require_admin()?;

        let data = self.store.read();
        let mut matches: Vec<Track> = data
            .tracks
            .values()
            .filter(|t| search.matches([t.ip.to_string().as_str(), t.source.as_str()]))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.time.cmp(&a.time).then(b.id.cmp(&a.id)));

        Ok(search.paginate(matches, self.page_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing;
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    async fn service(max_attempts: usize) -> (TempDir, TrackService) {
        let (dir, store) = testing::store().await;

        let config = SecurityConfig {
            track_window: Duration::from_secs(600),
            track_max_attempts: max_attempts,
            track_sleep_per_attempt: Duration::from_millis(5),
            ..SecurityConfig::default()
        };
        let service = TrackService::new(store, Arc::new(EventDispatcher::new()), config, 10);
        (dir, service)
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[tokio::test]
    async fn test_delay_grows_with_attempts() {
        let (_dir, service) = service(3).await;

        assert_eq!(service.delay_for(2), None);
        assert_eq!(service.delay_for(3), Some(Duration::from_millis(15)));
        assert_eq!(service.delay_for(4), Some(Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_count_is_per_ip_and_source() {
        let (_dir, service) = service(2).await;
        let login = service.request(ip(1), SOURCE_LOGIN);

        service.add(&login, None).await.unwrap();
        service.add(&login, Some(1)).await.unwrap();
        service.add(&service.request(ip(2), SOURCE_LOGIN), None).await.unwrap();
        service.add(&service.request(ip(1), SOURCE_API), None).await.unwrap();

        assert_eq!(service.count_recent(&login), 2);
        assert!(service.check(&login).await);
        assert!(!service.check(&service.request(ip(2), SOURCE_LOGIN)).await);
    }

    #[tokio::test]
    async fn test_old_and_unlocked_tracks_do_not_count() {
        let (_dir, service) = service(1).await;
        let request = service.request(ip(1), SOURCE_LOGIN);
        let id = service.add(&request, None).await.unwrap();
        assert_eq!(service.count_recent(&request), 1);

        let later = TrackRequest {
            since: Utc::now() + chrono::Duration::seconds(1),
            ..request.clone()
        };
        assert_eq!(service.count_recent(&later), 0);

        service.unlock(&Principal::system(), id).await.unwrap();
        assert_eq!(service.count_recent(&request), 0);
        assert!(!service.check(&request).await);
    }

    #[tokio::test]
    async fn test_list_and_clear_require_admin() {
        let (_dir, service) = service(5).await;
        let request = service.request(ip(7), SOURCE_LINK);
        service.add(&request, None).await.unwrap();

        let user = Principal {
            is_admin_app: false,
            is_admin_acc: false,
            ..Principal::system()
        };
        assert!(service.list(&user, &ItemSearch::default()).is_err());
        assert!(service.clear(&user).await.is_err());

        let admin = Principal::system();
        let page = service.list(&admin, &ItemSearch::new("10.0.0.7")).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(service.clear(&admin).await.unwrap(), 1);
        assert_eq!(service.count_recent(&request), 0);
    }

    #[tokio::test]
    async fn test_old_tracks_are_pruned() {
        let (_dir, service) = service(5).await;
        let login = service.request(ip(1), SOURCE_LOGIN);
        let stale = Utc::now() - chrono::Duration::days(30);

        service
            .store
            .write(|data| {
                for _ in 0..3 {
                    data.tracks.insert(Track {
                        id: 0,
                        user_id: None,
                        source: SOURCE_LOGIN.to_string(),
                        ip: ip(9),
                        time: stale,
                        unlocked_at: None,
                    });
                }
                Ok::<_, StorageError>(())
            })
            .await
            .unwrap();
        assert_eq!(service.store.read().tracks.len(), 3);

        let id = service.add(&login, None).await.unwrap();
        let data = service.store.read();
        assert_eq!(data.tracks.len(), 1);
        assert!(data.tracks.get(id).is_some());
    }
}
