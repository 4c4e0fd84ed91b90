//! Configuration validation.
//!
//! Serde handles syntax; this module checks values:
//! - the scraper base URL is present and parses as http(s)
//! - timeouts, thresholds and attempt limits are non-zero
//! - addresses parse as socket addresses
//!
//! Returns every error found, not just the first.

use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::AppConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("scraper.base_url is required (set it in the config file or SCRAPER_API_URL)")]
    MissingScraperUrl,

    #[error("scraper.base_url '{0}' is not a valid http(s) URL")]
    InvalidScraperUrl(String),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} '{value}' is not a valid socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("retries.multiplier must be at least 1.0 (got {0})")]
    InvalidMultiplier(f64),

    #[error("retries.max_delay_ms ({max}) is below retries.initial_delay_ms ({initial})")]
    DelayOrder { initial: u64, max: u64 },

    #[error("rate_limit.utc_offset_minutes {0} is outside -1439..=1439")]
    InvalidUtcOffset(i32),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match config.scraper.base_url.as_deref().map(str::trim) {
        None | Some("") => errors.push(ValidationError::MissingScraperUrl),
        Some(raw) => match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => errors.push(ValidationError::InvalidScraperUrl(raw.to_string())),
        },
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if config.rate_limit.pending_staleness_window_secs == Some(0) {
        errors.push(ValidationError::Zero {
            field: "rate_limit.pending_staleness_window_secs",
        });
    }

    let non_zero: [(&'static str, u64); 7] = [
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("timeouts.max_body_bytes", config.timeouts.max_body_bytes as u64),
        ("scraper.request_timeout_ms", config.scraper.request_timeout_ms),
        ("retries.max_attempts", config.retries.max_attempts as u64),
        ("circuit_breaker.threshold", config.circuit_breaker.threshold as u64),
        ("rate_limit.staleness_window_secs", config.rate_limit.staleness_window_secs),
        ("rate_limit.max_conflict_rounds", config.rate_limit.max_conflict_rounds as u64),
    ];
    for (field, value) in non_zero {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    if config.retries.multiplier < 1.0 || !config.retries.multiplier.is_finite() {
        errors.push(ValidationError::InvalidMultiplier(config.retries.multiplier));
    }

    if config.retries.max_delay_ms < config.retries.initial_delay_ms {
        errors.push(ValidationError::DelayOrder {
            initial: config.retries.initial_delay_ms,
            max: config.retries.max_delay_ms,
        });
    }

    if config.rate_limit.utc_offset_minutes.abs() >= 24 * 60 {
        errors.push(ValidationError::InvalidUtcOffset(config.rate_limit.utc_offset_minutes));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
