//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every component from a validated config, in dependency order
//! - Bind the listener last, once everything it serves is ready
//! - Flush the store snapshot after the server has drained

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::AppConfig;
use crate::http::{AppState, HttpServer};
use crate::lifecycle::{signals, Shutdown};
use crate::rate_limit::{Clock, CoordinatorSettings, RateLimitCoordinator, SystemClock};
use crate::resilience::retries::RetryPolicy;
use crate::resilience::{BreakerSettings, CircuitBreaker};
use crate::scraping::{ScrapeTriggerService, ScraperClient, ScraperError};
use crate::storage::{MemoryStore, StoreError};

/// Name of the breaker guarding the scraper.
pub const SCRAPER_CIRCUIT: &str = "scraper";

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to open store: {0}")]
    Store(#[from] StoreError),

    #[error("failed to build scraper client: {0}")]
    Scraper(#[from] ScraperError),

    #[error("failed to bind listener: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the server needs, plus the store handle for the final flush.
pub struct Components {
    pub state: AppState,
    pub store: MemoryStore,
}

/// Wire up store, coordinator, breaker, scraper client and service.
pub fn build_components(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Components, StartupError> {
    let store = match &config.storage.persistence_path {
        Some(path) => MemoryStore::load_from_file(Path::new(path))?,
        None => MemoryStore::new(None),
    };
    let shared = Arc::new(store.clone());

    let coordinator = Arc::new(RateLimitCoordinator::new(
        shared.clone(),
        clock,
        CoordinatorSettings::from_config(&config.rate_limit, &config.retries),
    ));

    let breaker = config.circuit_breaker.enabled.then(|| {
        Arc::new(CircuitBreaker::new(
            SCRAPER_CIRCUIT,
            BreakerSettings::from(&config.circuit_breaker),
        ))
    });

    let client = ScraperClient::new(&config.scraper)?;
    tracing::info!(
        endpoint = %client.endpoint(),
        breaker = config.circuit_breaker.enabled,
        staleness_window_secs = config.rate_limit.staleness_window_secs,
        "Components initialized"
    );

    let service = Arc::new(ScrapeTriggerService::new(
        coordinator,
        shared,
        client,
        breaker,
        RetryPolicy::from(&config.retries),
    ));

    Ok(Components {
        state: AppState { service },
        store,
    })
}

/// Run the service until SIGINT/SIGTERM.
pub async fn run(config: AppConfig) -> Result<(), StartupError> {
    let components = build_components(&config, Arc::new(SystemClock))?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    HttpServer::new(components.state, &config)
        .run(listener, shutdown.subscribe())
        .await?;

    if let Err(e) = components.store.save_to_file() {
        tracing::error!(error = %e, "Failed to write store snapshot");
    }
    Ok(())
}
