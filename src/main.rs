//! Scrape coordinator service.
//!
//! # Architecture Overview
//!
//! ```text
//!   POST /scrape, /scrape/batch, /scrape/date          PUT /scrape/status
//!          │                                                 │ (scraper webhook)
//!          ▼                                                 ▼
//!   ┌──────────────┐    ┌─────────────────────┐    ┌──────────────────┐
//!   │ http server  │───▶│ ScrapeTriggerService│───▶│RateLimitCoordinator│
//!   └──────────────┘    └─────────┬───────────┘    └────────┬─────────┘
//!                                 │                         │ retry + backoff
//!                        circuit breaker                    ▼
//!                                 │                  ┌─────────────┐
//!                                 ▼                  │ document    │
//!                          external scraper          │ store       │
//!                                                    └─────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use scrape_coordinator::config::loader::{load_config, load_from_env};
use scrape_coordinator::lifecycle;
use scrape_coordinator::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "scrape-coordinator", version)]
#[command(about = "Coordinates rate-limited scrape requests", long_about = None)]
struct Args {
    /// Path to a TOML config file. Defaults plus environment when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "scrape-coordinator starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        config = ?args.config,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    lifecycle::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
