//! JSON API handlers with bearer token authentication
//!
//! These endpoints let scripts and external tools work with accounts using
//! API tokens instead of a browser session. A token only grants the actions
//! it was created with.

use axum::{
    extract::{FromRef, FromRequestParts, Json, Path, Query, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::accounts::AccountRequest;
use crate::acl::Permission;
use crate::auth::{authenticate, TokenAuth};
use crate::search::AccountSearchFilter;
use crate::server::SyspassApp;
use crate::SyspassError;

use super::auth::ClientIp;
use super::error::error_status;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
    code: String,
}

impl ApiError {
    fn new(code: &str, error: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            error: error.into(),
        }
    }
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (status, Json(ApiError::new(code, message))).into_response()
}

/// Render a service failure as `{error, code}`
pub fn error_json(err: SyspassError) -> Response {
    let (status, code) = error_status(&err);
    if status.is_server_error() {
        tracing::error!(error = %err, "API request failed");
    }
    error_response(status, code, err.to_string())
}

/// Extractor for a request carrying a valid API token
pub struct ApiAuth(pub TokenAuth);

impl ApiAuth {
    fn require(&self, action: Permission) -> Result<(), Response> {
        if self.0.can(action) {
            Ok(())
        } else {
            Err(error_response(
                StatusCode::FORBIDDEN,
                "permission_denied",
                format!("API token does not allow '{}'", action.as_str()),
            ))
        }
    }
}

impl<S> FromRequestParts<S> for ApiAuth
where
    Arc<SyspassApp>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = Arc::<SyspassApp>::from_ref(state);
        let ClientIp(ip) = match ClientIp::from_request_parts(parts, state).await {
            Ok(ip) => ip,
            Err(never) => match never {},
        };
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        authenticate(&app.tokens, header, ip)
            .await
            .map(ApiAuth)
            .map_err(|e| error_json(e.into()))
    }
}

// ============== Accounts ==============

#[derive(Deserialize, Default)]
pub struct SearchQuery {
    #[serde(default)]
    q: String,
    #[serde(default)]
    offset: usize,
    limit: Option<usize>,
}

pub async fn api_search(
    State(app): State<Arc<SyspassApp>>,
    auth: ApiAuth,
    Query(query): Query<SearchQuery>,
) -> Response {
    if let Err(rejection) = auth.require(Permission::AccountView) {
        return rejection;
    }
    let filter = AccountSearchFilter {
        query: query.q,
        offset: query.offset,
        limit: query.limit,
        ..Default::default()
    };
    Json(app.search.search(&auth.0.principal, &filter)).into_response()
}

pub async fn api_account(
    State(app): State<Arc<SyspassApp>>,
    auth: ApiAuth,
    Path(id): Path<u64>,
) -> Response {
    if let Err(rejection) = auth.require(Permission::AccountView) {
        return rejection;
    }
    match app.accounts.view(&auth.0.principal, id).await {
        Ok(account) => Json(account).into_response(),
        Err(e) => error_json(e.into()),
    }
}

pub async fn api_account_password(
    State(app): State<Arc<SyspassApp>>,
    auth: ApiAuth,
    Path(id): Path<u64>,
) -> Response {
    if let Err(rejection) = auth.require(Permission::AccountViewPass) {
        return rejection;
    }
    match app.accounts.view_password(&auth.0.principal, id).await {
        Ok(password) => Json(password).into_response(),
        Err(e) => error_json(e.into()),
    }
}

#[derive(Serialize)]
pub struct CreatedResponse {
    pub id: u64,
}

pub async fn api_account_create(
    State(app): State<Arc<SyspassApp>>,
    auth: ApiAuth,
    Json(request): Json<AccountRequest>,
) -> Response {
    if let Err(rejection) = auth.require(Permission::AccountCreate) {
        return rejection;
    }
    match app.accounts.create(&auth.0.principal, request).await {
        Ok(id) => (StatusCode::CREATED, Json(CreatedResponse { id })).into_response(),
        Err(e) => error_json(e.into()),
    }
}

pub async fn api_account_delete(
    State(app): State<Arc<SyspassApp>>,
    auth: ApiAuth,
    Path(id): Path<u64>,
) -> Response {
    if let Err(rejection) = auth.require(Permission::AccountDelete) {
        return rejection;
    }
    match app.accounts.delete(&auth.0.principal, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_json(e.into()),
    }
}

// ============== Categories, clients, tags ==============

#[derive(Serialize)]
pub struct ItemInfo {
    pub id: u64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

pub async fn api_categories(State(app): State<Arc<SyspassApp>>, auth: ApiAuth) -> Response {
    if let Err(rejection) = auth.require(Permission::AccountView) {
        return rejection;
    }
    let items: Vec<ItemInfo> = app
        .categories
        .all()
        .into_iter()
        .map(|c| ItemInfo {
            id: c.id,
            name: c.name,
            description: c.description,
        })
        .collect();
    Json(items).into_response()
}

pub async fn api_clients(State(app): State<Arc<SyspassApp>>, auth: ApiAuth) -> Response {
    if let Err(rejection) = auth.require(Permission::AccountView) {
        return rejection;
    }
    let full_group_access = app.config().accounts.full_group_access;
    let items: Vec<ItemInfo> = app
        .clients
        .all_for_user(&auth.0.principal, full_group_access)
        .into_iter()
        .map(|c| ItemInfo {
            id: c.id,
            name: c.name,
            description: c.description,
        })
        .collect();
    Json(items).into_response()
}

pub async fn api_tags(State(app): State<Arc<SyspassApp>>, auth: ApiAuth) -> Response {
    if let Err(rejection) = auth.require(Permission::AccountView) {
        return rejection;
    }
    let items: Vec<ItemInfo> = app
        .tags
        .all()
        .into_iter()
        .map(|t| ItemInfo {
            id: t.id,
            name: t.name,
            description: None,
        })
        .collect();
    Json(items).into_response()
}

// ============== Health Check ==============

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint (no auth required)
pub async fn api_health(State(app): State<Arc<SyspassApp>>) -> Response {
    match app.health_check().await {
        Ok(()) => Json(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
        .into_response(),
        Err(e) => error_json(e),
    }
}
