//! Authentication
//!
//! - Interactive logins, rate limited through [`crate::track`]
//! - API tokens scoped to a subset of the user's profile permissions

mod manager;
mod middleware;
mod types;

pub use manager::{LoginService, TokenManager, TOKEN_PREFIX};
pub use middleware::{authenticate, extract_bearer};
pub use types::{AuthToken, AuthTokenInfo, LoginResult, TokenAuth};

use crate::acl::AclError;
use crate::storage::StorageError;
use chrono::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing authentication: Authorization header required")]
    MissingAuth,

    #[error("Invalid authentication scheme: expected 'Bearer'")]
    InvalidScheme,

    #[error("Invalid API token")]
    InvalidToken,

    #[error("API token expired")]
    TokenExpired,

    #[error("Wrong login or password")]
    InvalidCredentials,

    #[error("User is disabled")]
    UserDisabled,

    #[error("User {0} not found")]
    UserNotFound(u64),

    #[error("API token {0} not found")]
    TokenNotFound(u64),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Acl(#[from] AclError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Parse token lifetimes such as "30d", "24h", "1w" or "never"
pub fn parse_expiration(s: &str) -> Result<Option<Duration>, String> {
    let s = s.trim().to_lowercase();
    if s == "never" || s.is_empty() {
        return Ok(None);
    }

    let (num_str, unit) = match s.char_indices().last() {
        Some((i, c @ ('h' | 'd' | 'w' | 'm'))) => (&s[..i], c),
        _ => {
            return Err(format!(
                "Invalid duration format: {}. Use format like '30d', '24h', '1w'",
                s
            ))
        }
    };

    let num: i64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: {}", num_str))?;
    if num <= 0 {
        return Err(format!("Duration must be positive: {}", s));
    }

    let duration = match unit {
        'h' => Duration::hours(num),
        'd' => Duration::days(num),
        'w' => Duration::weeks(num),
        _ => Duration::days(num * 30), // approximate month
    };
    Ok(Some(duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_expiration() {
        assert_eq!(parse_expiration("never").unwrap(), None);
        assert_eq!(parse_expiration("").unwrap(), None);
        assert_eq!(parse_expiration("24h").unwrap(), Some(Duration::hours(24)));
        assert_eq!(parse_expiration("30D").unwrap(), Some(Duration::days(30)));
        assert_eq!(parse_expiration("2w").unwrap(), Some(Duration::weeks(2)));
        assert_eq!(parse_expiration("1m").unwrap(), Some(Duration::days(30)));
        assert!(parse_expiration("10y").is_err());
        assert!(parse_expiration("xd").is_err());
        assert!(parse_expiration("0d").is_err());
    }
}
