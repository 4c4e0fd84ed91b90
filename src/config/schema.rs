//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Environment variable that overrides `scraper.base_url`.
pub const SCRAPER_URL_ENV: &str = "SCRAPER_API_URL";

/// Root configuration for the scrape coordinator.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Inbound request limits.
    pub timeouts: TimeoutConfig,

    /// External scraper endpoint.
    pub scraper: ScraperConfig,

    /// Retry configuration for store operations.
    pub retries: RetryConfig,

    /// Circuit breaker around the scraper trigger.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Daily rate-limit record settings.
    pub rate_limit: RateLimitConfig,

    /// Document store settings.
    pub storage: StorageConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Apply environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(SCRAPER_URL_ENV) {
            if !url.trim().is_empty() {
                self.scraper.base_url = Some(url);
            }
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:7071").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7071".to_string(),
        }
    }
}

/// Timeout configuration for inbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time allowed per inbound request in seconds.
    pub request_secs: u64,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            max_body_bytes: 64 * 1024,
        }
    }
}

/// External scraper endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Base URL of the scraper API. Required.
    pub base_url: Option<String>,

    /// Path appended to the base URL for trigger calls.
    pub trigger_path: String,

    /// Outbound socket timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            trigger_path: "/api/scrape".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays.
    pub multiplier: f64,

    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Wrap the scraper trigger in a circuit breaker.
    pub enabled: bool,

    /// Consecutive failures before opening.
    pub threshold: u32,

    /// Time to stay open before a trial call, in milliseconds.
    pub open_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 5,
            open_timeout_ms: 60_000,
        }
    }
}

/// Rate-limit record configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// A running record not updated for this long is treated as abandoned.
    /// 30 minutes is a heuristic; calibrate against observed scraper runs.
    pub staleness_window_secs: u64,

    /// A pending record not updated for this long stops blocking new
    /// requests. Unset: pending blocks until the scraper reports.
    pub pending_staleness_window_secs: Option<u64>,

    /// Offset from UTC, in minutes, used to compute "today".
    pub utc_offset_minutes: i32,

    /// Conditional-write conflicts tolerated before giving up.
    pub max_conflict_rounds: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            staleness_window_secs: 30 * 60,
            pending_staleness_window_secs: None,
            utc_offset_minutes: 0,
            max_conflict_rounds: 3,
        }
    }
}

/// Document store configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON snapshot loaded at startup and written on shutdown.
    pub persistence_path: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.retries.max_attempts, 3);
        assert_eq!(config.retries.initial_delay_ms, 1000);
        assert_eq!(config.retries.max_delay_ms, 30_000);
        assert_eq!(config.circuit_breaker.threshold, 5);
        assert_eq!(config.circuit_breaker.open_timeout_ms, 60_000);
        assert_eq!(config.rate_limit.staleness_window_secs, 1800);
        assert!(config.rate_limit.pending_staleness_window_secs.is_none());
        assert!(config.scraper.base_url.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [scraper]
            base_url = "http://scraper.internal:8000"

            [rate_limit]
            staleness_window_secs = 900
            "#,
        )
        .unwrap();

        assert_eq!(config.scraper.base_url.as_deref(), Some("http://scraper.internal:8000"));
        assert_eq!(config.scraper.trigger_path, "/api/scrape");
        assert_eq!(config.rate_limit.staleness_window_secs, 900);
        assert_eq!(config.rate_limit.max_conflict_rounds, 3);
        assert_eq!(config.listener.bind_address, "0.0.0.0:7071");
    }
}
