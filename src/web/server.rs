//! Web server implementation using Axum

use crate::server::SyspassApp;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};

use super::{api, routes};

/// Room for multipart framing around an uploaded file
const UPLOAD_OVERHEAD: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub app: Arc<SyspassApp>,
}

impl FromRef<AppState> for Arc<SyspassApp> {
    fn from_ref(state: &AppState) -> Self {
        state.app.clone()
    }
}

fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(api::api_health))
        .route("/accounts", get(api::api_search).post(api::api_account_create))
        .route(
            "/accounts/{id}",
            get(api::api_account).delete(api::api_account_delete),
        )
        .route("/accounts/{id}/password", get(api::api_account_password))
        .route("/categories", get(api::api_categories))
        .route("/clients", get(api::api_clients))
        .route("/tags", get(api::api_tags))
}

/// Build the router with all routes
pub fn build_router(app: Arc<SyspassApp>) -> Router {
    // Session store for login sessions
    let timeout = app.config().security.session_timeout;
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false) // Set to true in production with HTTPS
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(
            tower_sessions::cookie::time::Duration::seconds(timeout.as_secs() as i64),
        ));

    let upload_limit = app.config().accounts.max_file_size_kb * 1024 + UPLOAD_OVERHEAD;

    // Static files (CSS)
    let static_dir = ServeDir::new("static");

    Router::new()
        // Public routes
        .route("/login", get(routes::login_page).post(routes::login_submit))
        .route("/logout", post(routes::logout))
        .route("/link/{hash}", get(routes::public_link))
        // Protected routes (require auth)
        .route("/password", get(routes::password_page).post(routes::password_submit))
        .route("/", get(routes::accounts_list))
        .route("/accounts", get(routes::accounts_list))
        .route("/accounts/new", get(routes::account_new).post(routes::account_create))
        .route("/accounts/deleted", get(routes::deleted_accounts))
        .route("/accounts/{id}", get(routes::account_view))
        .route("/accounts/{id}/edit", get(routes::account_edit).post(routes::account_update))
        .route(
            "/accounts/{id}/password",
            get(routes::account_password).post(routes::account_password_update),
        )
        .route("/accounts/{id}/delete", post(routes::account_delete))
        .route("/accounts/{id}/duplicate", post(routes::account_duplicate))
        .route("/accounts/{id}/favorite", post(routes::account_favorite))
        .route("/accounts/{id}/history", get(routes::account_history))
        .route(
            "/accounts/{id}/files",
            post(routes::file_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/accounts/{id}/link", post(routes::link_create))
        .route("/history/{id}/restore", post(routes::history_restore))
        .route("/files/{id}", get(routes::file_download))
        .route("/files/{id}/delete", post(routes::file_delete))
        .route("/links", get(routes::links_list))
        .route("/links/{id}/refresh", post(routes::link_refresh))
        .route("/links/{id}/delete", post(routes::link_delete))
        .route("/categories", get(routes::categories_list).post(routes::category_create))
        .route("/categories/{id}/delete", post(routes::category_delete))
        .route("/clients", get(routes::clients_list).post(routes::client_create))
        .route("/clients/{id}/delete", post(routes::client_delete))
        .route("/tags", get(routes::tags_list).post(routes::tag_create))
        .route("/tags/{id}/delete", post(routes::tag_delete))
        .route("/users", get(routes::users_list).post(routes::user_create))
        .route("/users/{id}/toggle", post(routes::user_toggle))
        .route("/users/{id}/delete", post(routes::user_delete))
        .route("/groups", get(routes::groups_list).post(routes::group_create))
        .route("/groups/{id}/delete", post(routes::group_delete))
        .route("/profiles", get(routes::profiles_list).post(routes::profile_create))
        .route("/profiles/{id}/delete", post(routes::profile_delete))
        .route("/tokens", get(routes::tokens_list).post(routes::token_create))
        .route("/tokens/{id}/revoke", post(routes::token_revoke))
        .route("/eventlog", get(routes::eventlog))
        .route("/eventlog/clear", post(routes::eventlog_clear))
        .route("/notifications", get(routes::notifications_list))
        .route("/notifications/{id}/read", post(routes::notification_read))
        .route("/notifications/{id}/delete", post(routes::notification_delete))
        .route("/tracks", get(routes::tracks_list))
        .route("/tracks/clear", post(routes::tracks_clear))
        .route("/tracks/{id}/unlock", post(routes::track_unlock))
        .route("/plugins", get(routes::plugins_list))
        .route("/plugins/{name}/enable", post(routes::plugin_enable))
        .route("/plugins/{name}/disable", post(routes::plugin_disable))
        .route("/tasks/{id}/status", get(routes::task_status))
        .route("/config", get(routes::config_page))
        .route("/config/masterpass", post(routes::masterpass_change))
        .route("/config/export", post(routes::export_run))
        .route("/config/exports/{name}", get(routes::export_download))
        .route("/config/upgrade", post(routes::upgrade_run))
        // JSON API
        .nest("/api", api_router())
        // Static files
        .nest_service("/static", static_dir)
        // Layers
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { app })
}

/// HTTP front end for a [`SyspassApp`]
pub struct WebServer {
    bind: String,
    app: Arc<SyspassApp>,
}

impl WebServer {
    /// Create a new web server. `bind` overrides the configured address.
    pub fn new(app: Arc<SyspassApp>, bind: Option<String>) -> Self {
        let bind = bind.unwrap_or_else(|| app.config().server.bind.clone());
        Self { bind, app }
    }

    /// Run the web server
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let router = build_router(self.app);
        let listener = tokio::net::TcpListener::bind(&self.bind).await?;

        tracing::info!(bind = %self.bind, "Starting sysPass web UI");

        // Client addresses feed login tracking
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }

    /// Get the bind address
    pub fn bind_address(&self) -> &str {
        &self.bind
    }
}
