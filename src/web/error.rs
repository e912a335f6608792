//! Mapping service errors onto HTTP statuses

use askama::Template;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

use crate::accounts::AccountError;
use crate::auth::AuthError;
use crate::install::InstallError;
use crate::items::ItemError;
use crate::links::LinkError;
use crate::notifications::NotificationError;
use crate::plugins::PluginError;
use crate::tasks::TaskError;
use crate::track::TrackError;
use crate::users::UserError;
use crate::SyspassError;

use super::templates::ErrorTemplate;

const FORBIDDEN: (StatusCode, &str) = (StatusCode::FORBIDDEN, "forbidden");
const NOT_FOUND: (StatusCode, &str) = (StatusCode::NOT_FOUND, "not_found");
const INVALID: (StatusCode, &str) = (StatusCode::BAD_REQUEST, "invalid_request");
const CONFLICT: (StatusCode, &str) = (StatusCode::CONFLICT, "conflict");
const INTERNAL: (StatusCode, &str) = (StatusCode::INTERNAL_SERVER_ERROR, "internal_error");

fn account_status(err: &AccountError) -> (StatusCode, &'static str) {
    match err {
        AccountError::NotFound(_) | AccountError::HistoryNotFound(_) | AccountError::FileNotFound(_) => {
            NOT_FOUND
        }
        AccountError::MissingReference { .. } | AccountError::Invalid(_) => INVALID,
        AccountError::FileTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "file_too_large"),
        AccountError::Acl(_) => FORBIDDEN,
        AccountError::Storage(_) => INTERNAL,
    }
}

/// HTTP status and stable error code for a failure
pub fn error_status(err: &SyspassError) -> (StatusCode, &'static str) {
    match err {
        SyspassError::Acl(_) => FORBIDDEN,
        SyspassError::Account(e) => account_status(e),
        SyspassError::Item(e) => match e {
            ItemError::NotFound { .. } => NOT_FOUND,
            ItemError::AlreadyExists { .. } | ItemError::InUse { .. } => CONFLICT,
            ItemError::EmptyName => INVALID,
            ItemError::Acl(_) => FORBIDDEN,
            ItemError::Storage(_) => INTERNAL,
        },
        SyspassError::User(e) => match e {
            UserError::NotFound(_) | UserError::GroupNotFound(_) | UserError::ProfileNotFound(_) => {
                NOT_FOUND
            }
            UserError::LoginTaken(_)
            | UserError::GroupExists(_)
            | UserError::ProfileExists(_)
            | UserError::OwnsAccounts { .. }
            | UserError::GroupInUse { .. }
            | UserError::ProfileInUse(_) => CONFLICT,
            UserError::SelfDelete | UserError::WeakPassword(_) | UserError::Invalid(_) => INVALID,
            UserError::Acl(_) => FORBIDDEN,
            UserError::Crypto(_) | UserError::Storage(_) => INTERNAL,
        },
        SyspassError::Link(e) => match e {
            LinkError::Disabled => (StatusCode::FORBIDDEN, "links_disabled"),
            LinkError::NotFound => NOT_FOUND,
            LinkError::Expired => (StatusCode::GONE, "link_expired"),
            LinkError::AlreadyExists(_) => CONFLICT,
            LinkError::Account(e) => account_status(e),
            LinkError::Acl(_) => FORBIDDEN,
            LinkError::Storage(_) => INTERNAL,
        },
        SyspassError::Track(e) => match e {
            TrackError::NotFound(_) => NOT_FOUND,
            TrackError::Acl(_) => FORBIDDEN,
            TrackError::Storage(_) => INTERNAL,
        },
        SyspassError::Task(e) => match e {
            TaskError::NotFound(_) => NOT_FOUND,
            TaskError::InvalidId(_) => INVALID,
            TaskError::Io(_) | TaskError::Serialization(_) => INTERNAL,
        },
        SyspassError::Plugin(e) => match e {
            PluginError::NotFound(_) => NOT_FOUND,
            PluginError::Unavailable(_) => CONFLICT,
            PluginError::Acl(_) => FORBIDDEN,
            PluginError::Failed { .. } | PluginError::Storage(_) => INTERNAL,
        },
        SyspassError::Install(e) => match e {
            InstallError::VaultExists(_) => CONFLICT,
            InstallError::Invalid(_) | InstallError::WeakPassword { .. } => INVALID,
            InstallError::WrongMasterPassword => (StatusCode::FORBIDDEN, "wrong_master_password"),
            InstallError::Acl(_) => FORBIDDEN,
            _ => INTERNAL,
        },
        SyspassError::Auth(e) => match e {
            AuthError::MissingAuth | AuthError::InvalidScheme => {
                (StatusCode::UNAUTHORIZED, "missing_token")
            }
            AuthError::InvalidToken | AuthError::InvalidCredentials | AuthError::UserDisabled => {
                (StatusCode::UNAUTHORIZED, "invalid_token")
            }
            AuthError::TokenExpired => (StatusCode::UNAUTHORIZED, "token_expired"),
            AuthError::UserNotFound(_) | AuthError::TokenNotFound(_) => NOT_FOUND,
            AuthError::Invalid(_) => INVALID,
            AuthError::Acl(_) => FORBIDDEN,
            AuthError::Storage(_) => INTERNAL,
        },
        SyspassError::Notification(e) => match e {
            NotificationError::NotFound(_) => NOT_FOUND,
            NotificationError::Sticky => FORBIDDEN,
            NotificationError::Storage(_) => INTERNAL,
        },
        SyspassError::Storage(_) | SyspassError::Config(_) | SyspassError::Crypto(_) => INTERNAL,
    }
}

/// A failed page request, rendered as an HTML error page
#[derive(Debug)]
pub struct WebError(pub SyspassError);

impl<E> From<E> for WebError
where
    SyspassError: From<E>,
{
    fn from(err: E) -> Self {
        WebError(SyspassError::from(err))
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, _) = error_status(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::debug!(error = %self.0, status = %status, "Request rejected");
        }
        let template = ErrorTemplate {
            status: status.as_u16(),
            message: self.0.to_string(),
        };
        (
            status,
            Html(template.render().unwrap_or_else(|e| format!("Template error: {}", e))),
        )
            .into_response()
    }
}
