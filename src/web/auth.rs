//! Session authentication and CSRF protection for the web UI

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, FromRef, FromRequest, FromRequestParts, Request},
    http::{header, request::Parts, Method, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Form,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tower_sessions::Session;

use crate::acl::Principal;
use crate::server::SyspassApp;

/// Session key for storing authentication state
const SESSION_KEY: &str = "syspass_user";
/// Session key for storing CSRF token
const CSRF_KEY: &str = "syspass_csrf";
/// Form field carrying the CSRF token
pub const CSRF_FIELD: &str = "csrf_token";

/// Session data stored server-side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSession {
    pub user_id: u64,
    pub login: String,
    pub authenticated_at: i64,
    /// Last request, for the inactivity timeout
    pub last_seen: i64,
    /// Set when the user must pick a new password before anything else
    #[serde(default)]
    pub must_change_password: bool,
}

impl WebSession {
    pub fn new(user_id: u64, login: &str, must_change_password: bool) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            user_id,
            login: login.to_string(),
            authenticated_at: now,
            last_seen: now,
            must_change_password,
        }
    }

    /// Whether the session has been idle for less than `timeout`
    pub fn is_valid(&self, timeout: Duration) -> bool {
        let now = chrono::Utc::now().timestamp();
        now - self.last_seen < timeout.as_secs() as i64
    }
}

/// Address of the connected client. Falls back to localhost when the
/// server was not started with connect info (e.g. in tests).
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        Ok(ClientIp(ip))
    }
}

/// User agent header, if any
pub fn user_agent(parts: &axum::http::HeaderMap) -> Option<String> {
    parts
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Extractor for requiring a logged-in user
///
/// Loads the session, enforces the inactivity timeout and resolves the
/// current [`Principal`]. Disabled or deleted users are logged out.
pub struct RequireUser {
    pub principal: Principal,
    pub session: Session,
    pub csrf_token: String,
}

impl<S> FromRequestParts<S> for RequireUser
where
    Arc<SyspassApp>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = Arc::<SyspassApp>::from_ref(state);
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|_| Redirect::to("/login").into_response())?;

        let web_session: Option<WebSession> = session.get(SESSION_KEY).await.ok().flatten();
        let mut web_session = match web_session {
            Some(ws) if ws.is_valid(app.config().security.session_timeout) => ws,
            Some(ws) => {
                tracing::debug!(user = %ws.login, "Session expired");
                let _ = session.flush().await;
                return Err(Redirect::to("/login").into_response());
            }
            None => return Err(Redirect::to("/login").into_response()),
        };

        let Some(principal) = app.principal(web_session.user_id) else {
            let _ = session.flush().await;
            return Err(Redirect::to("/login").into_response());
        };

        if web_session.must_change_password && parts.uri.path() != "/password" {
            return Err(Redirect::to("/password").into_response());
        }

        web_session.last_seen = chrono::Utc::now().timestamp();
        session
            .insert(SESSION_KEY, web_session)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())?;

        let csrf_token = get_or_create_csrf_token(&session)
            .await
            .map_err(IntoResponse::into_response)?;

        Ok(RequireUser {
            principal,
            session,
            csrf_token,
        })
    }
}

/// Helper to set the session after successful login
pub async fn set_authenticated_session(
    session: &Session,
    user_id: u64,
    login: &str,
    must_change_password: bool,
) -> Result<(), StatusCode> {
    // New identity, new session id
    session
        .cycle_id()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let web_session = WebSession::new(user_id, login, must_change_password);
    session
        .insert(SESSION_KEY, web_session)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    generate_csrf_token(session).await?;
    Ok(())
}

/// Clear the forced password change flag
pub async fn clear_password_change(session: &Session) -> Result<(), StatusCode> {
    let ws: Option<WebSession> = session.get(SESSION_KEY).await.ok().flatten();
    if let Some(mut ws) = ws {
        ws.must_change_password = false;
        session
            .insert(SESSION_KEY, ws)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    }
    Ok(())
}

/// Helper to clear the session on logout
pub async fn clear_session(session: &Session) -> Result<(), StatusCode> {
    session.flush().await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(())
}

/// Generate a new CSRF token and store it in the session
pub async fn generate_csrf_token(session: &Session) -> Result<String, StatusCode> {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let token = URL_SAFE_NO_PAD.encode(bytes);

    session
        .insert(CSRF_KEY, token.clone())
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(token)
}

/// Get the current CSRF token from the session, generating one if needed
pub async fn get_or_create_csrf_token(session: &Session) -> Result<String, StatusCode> {
    if let Ok(Some(token)) = session.get::<String>(CSRF_KEY).await {
        return Ok(token);
    }
    generate_csrf_token(session).await
}

/// Validate a CSRF token against the session using constant-time comparison
pub async fn validate_csrf_token(session: &Session, token: &str) -> bool {
    let stored: Option<String> = session.get(CSRF_KEY).await.ok().flatten();

    match stored {
        Some(stored_token) => {
            let stored_bytes = stored_token.as_bytes();
            let provided_bytes = token.as_bytes();

            if stored_bytes.len() != provided_bytes.len() {
                return false;
            }
            stored_bytes.ct_eq(provided_bytes).into()
        }
        None => false,
    }
}

fn csrf_rejection() -> Response {
    (StatusCode::FORBIDDEN, "Invalid or missing CSRF token").into_response()
}

#[derive(Deserialize)]
struct CsrfField {
    #[serde(default)]
    csrf_token: String,
}

/// A urlencoded form whose `csrf_token` field has been checked against the
/// session
pub struct CsrfForm<T>(pub T);

impl<S, T> FromRequest<S> for CsrfForm<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();
        let session = Session::from_request_parts(&mut parts, state)
            .await
            .map_err(IntoResponse::into_response)?;
        let content_type = parts.headers.get(header::CONTENT_TYPE).cloned();

        let bytes = Bytes::from_request(Request::from_parts(parts, body), state)
            .await
            .map_err(IntoResponse::into_response)?;

        // The body is parsed twice: once for the token, once for the payload
        let rebuild = |bytes: Bytes| {
            let mut builder = Request::builder().method(Method::POST);
            if let Some(ct) = &content_type {
                builder = builder.header(header::CONTENT_TYPE, ct);
            }
            builder
                .body(Body::from(bytes))
                .map_err(|_| StatusCode::BAD_REQUEST.into_response())
        };

        let Form(field) = Form::<CsrfField>::from_request(rebuild(bytes.clone())?, state)
            .await
            .map_err(IntoResponse::into_response)?;
        if !validate_csrf_token(&session, &field.csrf_token).await {
            tracing::warn!("Rejected form post with a bad CSRF token");
            return Err(csrf_rejection());
        }

        let Form(value) = Form::<T>::from_request(rebuild(bytes)?, state)
            .await
            .map_err(IntoResponse::into_response)?;
        Ok(CsrfForm(value))
    }
}

/// Check a token taken from somewhere other than a urlencoded body, e.g. a
/// multipart field
pub async fn require_csrf(session: &Session, token: &str) -> Result<(), Response> {
    if validate_csrf_token(session, token).await {
        Ok(())
    } else {
        Err(csrf_rejection())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_web_session_timeout() {
        let session = WebSession::new(1, "admin", false);
        assert!(session.is_valid(Duration::from_secs(60)));

        let idle = WebSession {
            last_seen: chrono::Utc::now().timestamp() - 3600,
            ..session
        };
        assert!(!idle.is_valid(Duration::from_secs(60)));
        assert!(idle.is_valid(Duration::from_secs(7200)));
    }

    #[test]
    fn test_csrf_token_generation() {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        // Base64 URL-safe encoding of 32 bytes = 43 characters
        assert_eq!(token.len(), 43);
        assert!(token.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_'));
    }
}
