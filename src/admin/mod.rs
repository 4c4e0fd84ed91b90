//! Read-only introspection endpoints.

pub mod handlers;

use axum::{routing::get, Router};

use crate::http::server::AppState;

/// Admin routes, merged into the main router before state is applied.
pub fn router() -> Router<AppState> {
    Router::new().route("/admin/status", get(handlers::get_status))
}
