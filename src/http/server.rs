//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with all handlers
//! - Wire up middleware (tracing, timeout, body limit, request ID)
//! - Bind the server to a listener and stop on shutdown

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::config::AppConfig;
use crate::http::handlers;
use crate::scraping::ScrapeTriggerService;

/// Header carrying the request correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ScrapeTriggerService>,
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(state: AppState, config: &AppConfig) -> Router {
    let request_id = axum::http::HeaderName::from_static(X_REQUEST_ID);

    Router::new()
        .route("/scrape", post(handlers::trigger_single))
        .route("/scrape/batch", post(handlers::trigger_batch))
        .route("/scrape/date", post(handlers::trigger_date))
        .route(
            "/scrape/status",
            get(handlers::today_status).put(handlers::update_status),
        )
        .route("/health", get(handlers::health))
        .merge(admin::router())
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(config.timeouts.max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}

/// HTTP server for the coordinator API.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState, config: &AppConfig) -> Self {
        Self {
            router: build_router(state, config),
        }
    }

    /// Serve until a shutdown signal arrives on `shutdown`.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
