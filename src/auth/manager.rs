//! Logins and API tokens

use super::types::{AuthToken, AuthTokenInfo, LoginResult, TokenAuth};
use super::AuthError;
use crate::acl::{Permission, Principal};
use crate::crypto::{hash_token, verify_password};
use crate::events::{Event, EventDispatcher, EventMessage};
use crate::storage::{StorageError, Store};
use crate::track::{TrackService, SOURCE_API, SOURCE_LOGIN};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{Duration, Utc};
use rand::RngCore;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;

/// API token prefix
pub const TOKEN_PREFIX: &str = "sp_";

/// Length of the random part of a token
const TOKEN_RANDOM_LENGTH: usize = 32;

/// Creates, validates and revokes API tokens
pub struct TokenManager {
    store: Arc<Store>,
    events: Arc<EventDispatcher>,
    tracks: Arc<TrackService>,
}

impl TokenManager {
    pub fn new(store: Arc<Store>, events: Arc<EventDispatcher>, tracks: Arc<TrackService>) -> Self {
        Self {
            store,
            events,
            tracks,
        }
    }

    /// Generate a new token and its display prefix
    fn generate_token() -> (String, String) {
        // 48 bytes leave enough alphanumerics after dropping '+', '/' and '='
        let mut random_bytes = [0u8; 48];
        rand::rngs::OsRng.fill_bytes(&mut random_bytes);

        let random_part: String = STANDARD
            .encode(random_bytes)
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(TOKEN_RANDOM_LENGTH)
            .collect();

        let full = format!("{}{}", TOKEN_PREFIX, random_part);
        let prefix = format!("{}{}", TOKEN_PREFIX, &random_part[..8]);
        (full, prefix)
    }

    /// Create a token for `user_id`. Returns the full token (shown only
    /// once) and the stored record.
    pub async fn create(
        &self,
        principal: &Principal,
        user_id: u64,
        name: &str,
        actions: BTreeSet<Permission>,
        expires_in: Option<Duration>,
    ) -> Result<(String, AuthToken), AuthError> {
        principal.require(Permission::ManageApiTokens)?;
        if actions.is_empty() {
            return Err(AuthError::Invalid("a token needs at least one action".to_string()));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(AuthError::Invalid("token name is required".to_string()));
        }

        let (full, prefix) = Self::generate_token();
        let now = Utc::now();
        let mut token = AuthToken {
            id: 0,
            user_id,
            name: name.to_string(),
            token_prefix: prefix,
            token_hash: hash_token(&full),
            actions,
            created_at: now,
            expires_at: expires_in.map(|d| now + d),
            last_used: None,
        };

        token.id = self
            .store
            .write(|data| {
                if !data.users.contains(user_id) {
                    return Err(AuthError::UserNotFound(user_id));
                }
                Ok(data.tokens.insert(token.clone()))
            })
            .await?;

        tracing::info!(token_id = token.id, user_id, name, "API token created");
        let event = Event::new("create.authToken", "auth").by(principal).with_message(
            EventMessage::new("API token created")
                .add_detail("Name", name)
                .add_detail("User", user_id),
        );
        self.events.dispatch(event).await;

        Ok((full, token))
    }

    /// Resolve a presented token. Failures are tracked against `ip`.
    pub async fn validate(&self, token: &str, ip: IpAddr) -> Result<TokenAuth, AuthError> {
        let request = self.tracks.request(ip, SOURCE_API);
        self.tracks.check(&request).await;

        let result = self.lookup(token);
        let auth = match result {
            Ok(auth) => auth,
            Err(e) => {
                tracing::warn!(ip = %ip, error = %e, "API token rejected");
                if let Err(te) = self.tracks.add(&request, None).await {
                    tracing::warn!(error = %te, "Could not record track");
                }
                return Err(e);
            }
        };

        let token_id = auth.token_id;
        self.store
            .write(|data| {
                if let Some(t) = data.tokens.get_mut(token_id) {
                    t.last_used = Some(Utc::now());
                }
                Ok::<_, StorageError>(())
            })
            .await?;

        Ok(auth)
    }

    fn lookup(&self, token: &str) -> Result<TokenAuth, AuthError> {
        if !token.starts_with(TOKEN_PREFIX) {
            return Err(AuthError::InvalidToken);
        }

        let data = self.store.read();
        let stored = data
            .token_by_hash(&hash_token(token))
            .ok_or(AuthError::InvalidToken)?;
        if stored.is_expired() {
            return Err(AuthError::TokenExpired);
        }
        let principal = Principal::from_vault(&data, stored.user_id).ok_or(AuthError::UserDisabled)?;
        Ok(TokenAuth::new(stored, principal))
    }

    pub async fn revoke(&self, principal: &Principal, id: u64) -> Result<(), AuthError> {
        principal.require(Permission::ManageApiTokens)?;

        let token = self
            .store
            .write(|data| data.tokens.remove(id).ok_or(AuthError::TokenNotFound(id)))
            .await?;

        tracing::info!(token_id = id, name = %token.name, "API token revoked");
        let event = Event::new("delete.authToken", "auth")
            .by(principal)
            .with_message(EventMessage::new("API token revoked").add_detail("Name", &token.name));
        self.events.dispatch(event).await;
        Ok(())
    }

    pub fn list(&self, principal: &Principal) -> Result<Vec<AuthTokenInfo>, AuthError> {
        principal.require(Permission::ManageApiTokens)?;

        let data = self.store.read();
        Ok(data
            .tokens
            .values()
            .map(|t| {
                let login = data.users.get(t.user_id).map(|u| u.login.as_str()).unwrap_or("?");
                AuthTokenInfo::new(t, login)
            })
            .collect())
    }
}

/// Interactive logins
pub struct LoginService {
    store: Arc<Store>,
    events: Arc<EventDispatcher>,
    tracks: Arc<TrackService>,
}

impl LoginService {
    pub fn new(store: Arc<Store>, events: Arc<EventDispatcher>, tracks: Arc<TrackService>) -> Self {
        Self {
            store,
            events,
            tracks,
        }
    }

    pub async fn login(&self, login: &str, password: &str, ip: IpAddr) -> Result<LoginResult, AuthError> {
        let request = self.tracks.request(ip, SOURCE_LOGIN);
        self.tracks.check(&request).await;

        let verdict = {
            let data = self.store.read();
            match data.user_by_login(login) {
                None => Err((None, AuthError::InvalidCredentials)),
                Some(user) if !verify_password(password, &user.password_hash) => {
                    Err((Some(user.id), AuthError::InvalidCredentials))
                }
                Some(user) if user.is_disabled => Err((Some(user.id), AuthError::UserDisabled)),
                Some(user) => Ok((user.id, user.is_change_pass)),
            }
        };

        let (user_id, must_change_password) = match verdict {
            Ok(found) => found,
            Err((user_id, error)) => {
                if let Err(e) = self.tracks.add(&request, user_id).await {
                    tracing::warn!(error = %e, "Could not record track");
                }
                tracing::warn!(login, ip = %ip, reason = %error, "Login failed");
                let event = Event::new("login.fail", "auth").from_ip(ip).with_message(
                    EventMessage::new("Login failed")
                        .add_detail("Login", login)
                        .add_detail("Reason", &error),
                );
                self.events.dispatch(event).await;
                return Err(error);
            }
        };

        let principal = self
            .store
            .write(|data| {
                let user = data.users.get_mut(user_id).ok_or(AuthError::UserNotFound(user_id))?;
                user.login_count += 1;
                user.last_login = Some(Utc::now());
                Principal::from_vault(data, user_id).ok_or(AuthError::UserDisabled)
            })
            .await?;

        tracing::info!(user = %principal.login, ip = %ip, "Login succeeded");
        let event = Event::new("login.success", "auth")
            .by(&principal)
            .from_ip(ip)
            .with_message(EventMessage::new("Login succeeded"));
        self.events.dispatch(event).await;

        Ok(LoginResult {
            principal,
            must_change_password,
        })
    }
}
