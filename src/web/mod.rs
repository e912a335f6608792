//! Web UI and JSON API
//!
//! Server-side rendered pages for day-to-day use and administration, plus
//! a small token-authenticated JSON API under `/api`.

mod api;
mod auth;
mod error;
mod routes;
mod server;
mod templates;

pub use auth::{ClientIp, RequireUser, WebSession};
pub use error::{error_status, WebError};
pub use server::{build_router, AppState, WebServer};
