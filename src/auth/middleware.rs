//! Request authentication for the JSON API
//!
//! Extracts the bearer token from the `Authorization` header and resolves
//! it through the [`TokenManager`].

use super::manager::TokenManager;
use super::types::TokenAuth;
use super::AuthError;
use std::net::IpAddr;

/// Extract an API token from an Authorization header
///
/// Expected format: `Authorization: Bearer sp_...`
pub fn extract_bearer(auth_header: Option<&str>) -> Result<String, AuthError> {
    let header = auth_header.ok_or(AuthError::MissingAuth)?;

    let Some((scheme, token)) = header.split_once(' ') else {
        return Err(AuthError::InvalidScheme);
    };
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidScheme);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::InvalidToken);
    }
    Ok(token.to_string())
}

/// Full flow: extract the token from the header and validate it
pub async fn authenticate(
    tokens: &TokenManager,
    auth_header: Option<&str>,
    ip: IpAddr,
) -> Result<TokenAuth, AuthError> {
    let token = extract_bearer(auth_header)?;
    tokens.validate(&token, ip).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bearer_valid() {
        assert_eq!(extract_bearer(Some("Bearer sp_abc123")).unwrap(), "sp_abc123");
    }

    #[test]
    fn test_extract_bearer_case_insensitive() {
        assert_eq!(extract_bearer(Some("bearer sp_abc123")).unwrap(), "sp_abc123");
        assert_eq!(extract_bearer(Some("BEARER  sp_abc123 ")).unwrap(), "sp_abc123");
    }

    #[test]
    fn test_extract_bearer_missing() {
        assert!(matches!(extract_bearer(None), Err(AuthError::MissingAuth)));
    }

    #[test]
    fn test_extract_bearer_wrong_scheme() {
        assert!(matches!(extract_bearer(Some("Basic abc123")), Err(AuthError::InvalidScheme)));
        assert!(matches!(extract_bearer(Some("sp_abc123")), Err(AuthError::InvalidScheme)));
        assert!(matches!(extract_bearer(Some("Bearer ")), Err(AuthError::InvalidToken)));
    }
}
