//! Scrape request coordination.
//!
//! Guarantees at most one scrape run in flight per day, heals runs whose
//! completion signal was lost, and sheds load from a failing scraper.

// Core
pub mod rate_limit;
pub mod scraping;
pub mod storage;

// Surfaces
pub mod admin;
pub mod http;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::AppConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use rate_limit::RateLimitCoordinator;
pub use scraping::ScrapeTriggerService;
