//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Store call (coordinator):
//!     → retries.rs (classify failure, back off, try again)
//!     → backoff.rs (delay schedule)
//!
//! Scraper trigger (dispatch):
//!     → circuit_breaker.rs (fail fast while the scraper is down)
//!     → never retried
//! ```
//!
//! # Design Decisions
//! - Retries only for idempotent store operations
//! - Circuit breaker prevents cascading failures into the scraper
//! - Both are plain async wrappers, composable around any future

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{BreakerSettings, CircuitBreaker, CircuitError, CircuitSnapshot, CircuitState};
pub use retries::{retry, retry_if, RetryError, RetryPolicy, Retryable};
