//! API token types

use crate::acl::{Permission, Principal};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// An API token bound to a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    pub id: u64,
    /// User the token acts as
    pub user_id: u64,
    /// Human-readable name for this token
    pub name: String,
    /// First characters of the token, for display (e.g. "sp_ab12cd34")
    pub token_prefix: String,
    /// SHA-256 of the full token, hex
    pub token_hash: String,
    /// Actions the token may perform
    pub actions: BTreeSet<Permission>,
    pub created_at: DateTime<Utc>,
    /// None = never expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl AuthToken {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires) => Utc::now() >= expires,
            None => false,
        }
    }

    pub fn display_token(&self) -> String {
        format!("{}...", self.token_prefix)
    }
}

/// Token details safe for display (no hash)
#[derive(Debug, Clone, Serialize)]
pub struct AuthTokenInfo {
    pub id: u64,
    pub user_id: u64,
    pub user_login: String,
    pub name: String,
    pub token_prefix: String,
    pub actions: BTreeSet<Permission>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
}

impl AuthTokenInfo {
    pub fn new(token: &AuthToken, user_login: impl Into<String>) -> Self {
        Self {
            id: token.id,
            user_id: token.user_id,
            user_login: user_login.into(),
            name: token.name.clone(),
            token_prefix: token.token_prefix.clone(),
            actions: token.actions.clone(),
            created_at: token.created_at,
            expires_at: token.expires_at,
            last_used: token.last_used,
        }
    }
}

/// A validated API token and the user it acts as
#[derive(Debug, Clone)]
pub struct TokenAuth {
    pub token_id: u64,
    /// The token's user, with permissions cut down to the token's actions
    pub principal: Principal,
    pub actions: BTreeSet<Permission>,
}

impl TokenAuth {
    pub fn new(token: &AuthToken, mut principal: Principal) -> Self {
        let actions: BTreeSet<Permission> = if principal.is_admin_app {
            token.actions.clone()
        } else {
            token
                .actions
                .intersection(&principal.permissions)
                .copied()
                .collect()
        };
        principal.permissions = actions.clone();
        Self {
            token_id: token.id,
            principal,
            actions,
        }
    }

    /// The token must list the action explicitly; admin status does not
    /// widen a token.
    pub fn can(&self, action: Permission) -> bool {
        self.actions.contains(&action)
    }
}

/// Outcome of a successful login
#[derive(Debug, Clone)]
pub struct LoginResult {
    pub principal: Principal,
    pub must_change_password: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(actions: &[Permission]) -> AuthToken {
        AuthToken {
            id: 1,
            user_id: 2,
            name: "ci".to_string(),
            token_prefix: "sp_abcd1234".to_string(),
            token_hash: "hash".to_string(),
            actions: actions.iter().copied().collect(),
            created_at: Utc::now(),
            expires_at: None,
            last_used: None,
        }
    }

    #[test]
    fn test_token_expiration() {
        let key = token(&[Permission::AccountView]);
        assert!(!key.is_expired());

        let expired = AuthToken {
            expires_at: Some(Utc::now() - chrono::Duration::hours(1)),
            ..key.clone()
        };
        assert!(expired.is_expired());
        assert_eq!(key.display_token(), "sp_abcd1234...");
    }

    #[test]
    fn test_actions_are_cut_to_profile() {
        let mut user = Principal {
            is_admin_app: false,
            is_admin_acc: false,
            ..Principal::system()
        };
        user.permissions = [Permission::AccountView].into_iter().collect();

        let auth = TokenAuth::new(&token(&[Permission::AccountView, Permission::AccountDelete]), user);
        assert!(auth.can(Permission::AccountView));
        assert!(!auth.can(Permission::AccountDelete));
        assert!(!auth.principal.has(Permission::AccountDelete));
    }

    #[test]
    fn test_admin_token_is_still_limited_to_its_actions() {
        let auth = TokenAuth::new(&token(&[Permission::AccountView]), Principal::system());
        assert!(auth.can(Permission::AccountView));
        assert!(!auth.can(Permission::AccountViewPass));
    }
}
