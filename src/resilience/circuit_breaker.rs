//! Circuit breaker for the external scraper.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: scraper assumed down, calls fail fast
//! - Half-Open: testing if the scraper recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: first call at or after next_attempt_at
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open: trial call fails
//! ```
//!
//! # Design Decisions
//! - Fail fast in Open state (the wrapped operation is never invoked)
//! - Single trial in Half-Open; concurrent callers are refused until it settles
//! - A trial that is dropped before completing releases the slot

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

/// Breaker tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit.
    pub threshold: u32,
    /// Time spent Open before a trial call is let through.
    pub open_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: 5,
            open_timeout: Duration::from_millis(60_000),
        }
    }
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            threshold: config.threshold,
            open_timeout: Duration::from_millis(config.open_timeout_ms),
        }
    }
}

/// Errors returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The call was refused without invoking the operation.
    #[error("circuit '{name}' is open, retry after {retry_after:?}")]
    Open {
        name: &'static str,
        retry_after: Duration,
    },

    /// The operation ran and failed.
    #[error(transparent)]
    Inner(E),
}

/// Point-in-time view of a breaker, for the admin endpoint and tests.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub name: &'static str,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    next_attempt_at: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

/// A three-state circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
}

/// Admission ticket for one call. Releases a Half-Open trial slot if the
/// call is dropped before reporting an outcome.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    fn success(mut self) {
        self.settled = true;
        self.breaker.on_success();
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure();
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            tracing::debug!(circuit = self.breaker.name, "Trial call abandoned");
            self.breaker.lock().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(name: &'static str, settings: BreakerSettings) -> Self {
        metrics::record_circuit_state(name, CircuitState::Closed);
        Self {
            name,
            settings,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                next_attempt_at: None,
                last_failure_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Run `op` through the breaker.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire()?;

        match op().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    /// Whether a call made now would be let through. Does not consume the
    /// Half-Open trial.
    pub fn permits_call(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner
                .next_attempt_at
                .map_or(true, |at| Instant::now() >= at),
            CircuitState::HalfOpen => !inner.trial_in_flight,
        }
    }

    /// Time until an Open circuit lets a trial through; zero otherwise.
    pub fn retry_after(&self) -> Duration {
        let inner = self.lock();
        match (inner.state, inner.next_attempt_at) {
            (CircuitState::Open, Some(at)) => at.saturating_duration_since(Instant::now()),
            _ => Duration::ZERO,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn last_failure_at(&self) -> Option<DateTime<Utc>> {
        self.lock().last_failure_at
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            name: self.name,
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_at: inner.last_failure_at,
        }
    }

    fn acquire<E>(&self) -> Result<Permit<'_>, CircuitError<E>> {
        let mut inner = self.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => Ok(self.permit(false)),
            CircuitState::Open => match inner.next_attempt_at {
                Some(at) if now < at => Err(CircuitError::Open {
                    name: self.name,
                    retry_after: at - now,
                }),
                _ => {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    tracing::info!(circuit = self.name, "Circuit half-open, allowing trial call");
                    metrics::record_circuit_state(self.name, CircuitState::HalfOpen);
                    Ok(self.permit(true))
                }
            },
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(CircuitError::Open {
                        name: self.name,
                        retry_after: Duration::ZERO,
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(self.permit(true))
                }
            }
        }
    }

    fn permit(&self, trial: bool) -> Permit<'_> {
        Permit {
            breaker: self,
            trial,
            settled: false,
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        inner.trial_in_flight = false;

        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.next_attempt_at = None;
            tracing::info!(circuit = self.name, "Circuit closed after successful trial");
            metrics::record_circuit_state(self.name, CircuitState::Closed);
        }
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(Utc::now());
        inner.trial_in_flight = false;

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failure_count >= self.settings.threshold,
            CircuitState::Open => false,
        };

        if should_open {
            inner.state = CircuitState::Open;
            inner.next_attempt_at = Some(Instant::now() + self.settings.open_timeout);
            tracing::warn!(
                circuit = self.name,
                failures = inner.failure_count,
                open_for = ?self.settings.open_timeout,
                "Circuit opened"
            );
            metrics::record_circuit_state(self.name, CircuitState::Open);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
