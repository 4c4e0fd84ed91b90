//! Daily rate-limit coordination.
//!
//! # Responsibilities
//! - Decide whether a new scrape cycle may start today
//! - Apply status callbacks from the scraper
//! - Treat records stuck in `running` past the staleness window as finished
//! - Keep `pending` records blocking unless a pending window is configured
//!
//! # Design Decisions
//! - Every store call goes through the retry executor
//! - Writes are conditional (create-if-absent, replace-if-match); a writer
//!   that loses a race re-reads and decides again
//! - Missing or malformed `updatedAt` on a running record means "still
//!   running": double-starting a scrape is worse than waiting

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{RateLimitConfig, RetryConfig};
use crate::rate_limit::clock::{date_key, Clock};
use crate::rate_limit::record::{InvalidTransition, RateLimitRecord, ScrapeStatus};
use crate::resilience::retries::{retry, RetryError, RetryPolicy};
use crate::storage::{RateLimitStore, StoreError, Versioned};

/// Errors surfaced by the coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("rate-limit record {id} for {date} not found")]
    NotFound { id: String, date: String },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("status '{0}' cannot open a scrape cycle")]
    NotRequestable(ScrapeStatus),

    #[error("storage error: {0}")]
    Storage(#[from] RetryError<StoreError>),

    #[error("record for {date} kept changing underneath us after {rounds} round(s)")]
    Contention { date: String, rounds: u32 },
}

/// Result of [`RateLimitCoordinator::create_or_update_record`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    /// A cycle is already in flight; the request was not accepted.
    pub is_already_running: bool,
    pub record: RateLimitRecord,
}

/// Coordinator tuning, usually built from [`RateLimitConfig`].
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub staleness_window: Duration,
    /// When set, a `pending` record untouched this long stops blocking.
    /// `None` keeps pending records blocking until the scraper reports.
    pub pending_staleness_window: Option<Duration>,
    pub utc_offset_minutes: i32,
    pub max_conflict_rounds: u32,
    pub retry: RetryPolicy,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            staleness_window: Duration::from_secs(30 * 60),
            pending_staleness_window: None,
            utc_offset_minutes: 0,
            max_conflict_rounds: 3,
            retry: RetryPolicy::default(),
        }
    }
}

impl CoordinatorSettings {
    pub fn from_config(rate_limit: &RateLimitConfig, retries: &RetryConfig) -> Self {
        Self {
            staleness_window: Duration::from_secs(rate_limit.staleness_window_secs),
            pending_staleness_window: rate_limit.pending_staleness_window_secs.map(Duration::from_secs),
            utc_offset_minutes: rate_limit.utc_offset_minutes,
            max_conflict_rounds: rate_limit.max_conflict_rounds.max(1),
            retry: RetryPolicy::from(retries),
        }
    }
}

/// `true` while a running record is fresher than `window`.
///
/// Exactly `window` elapsed counts as stale. Absent or unparsable
/// `updated_at` counts as running.
pub fn is_actually_running(
    record: Option<&RateLimitRecord>,
    now: chrono::DateTime<chrono::Utc>,
    window: Duration,
) -> bool {
    let Some(record) = record else {
        return false;
    };
    if record.status != ScrapeStatus::Running {
        return false;
    }
    match record.updated_at_parsed() {
        None => true,
        Some(updated_at) => now.signed_duration_since(updated_at) < window_delta(window),
    }
}

fn window_delta(window: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(window.as_millis().min(i64::MAX as u128) as i64)
}

/// Owns the lifecycle of the per-day rate-limit record.
pub struct RateLimitCoordinator {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    settings: CoordinatorSettings,
}

impl RateLimitCoordinator {
    pub fn new(store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>, settings: CoordinatorSettings) -> Self {
        Self { store, clock, settings }
    }

    /// Today's partition key.
    pub fn today(&self) -> String {
        date_key(self.clock.now(), self.settings.utc_offset_minutes)
    }

    pub fn staleness_window(&self) -> Duration {
        self.settings.staleness_window
    }

    /// Today's record, if any.
    pub async fn get_today_record(&self) -> Result<Option<RateLimitRecord>, CoordinatorError> {
        let date = self.today();
        let store = &self.store;
        let mut hits = retry(&self.settings.retry, "query_rate_limit", || store.query_by_date(&date)).await?;

        // One document per date; the newest wins should a foreign writer
        // ever have produced more.
        hits.sort_by(|a, b| a.document.updated_at.cmp(&b.document.updated_at));
        Ok(hits.pop().map(|v| v.document))
    }

    /// Staleness check against the coordinator's clock and window.
    pub fn is_actually_running(&self, record: Option<&RateLimitRecord>) -> bool {
        is_actually_running(record, self.clock.now(), self.settings.staleness_window)
    }

    /// Accept a new request for today unless a cycle is in flight.
    pub async fn create_or_update_record(
        &self,
        requested: ScrapeStatus,
    ) -> Result<RecordOutcome, CoordinatorError> {
        if !requested.is_requestable() {
            return Err(CoordinatorError::NotRequestable(requested));
        }

        let date = self.today();
        let id = RateLimitRecord::id_for(&date);
        let rounds = self.settings.max_conflict_rounds;

        for round in 1..=rounds {
            let existing = self.read(&id, &date).await?;
            let now = self.clock.now();

            let write = match existing {
                None => {
                    let record = RateLimitRecord::new(&date, requested, now);
                    let store = &self.store;
                    retry(&self.settings.retry, "create_rate_limit", || store.create(&record)).await
                }
                Some(current) => {
                    if self.blocks_new_cycle(&current.document, now) {
                        tracing::info!(
                            date = %date,
                            status = %current.document.status,
                            count = current.document.count,
                            "Scrape already in flight, rejecting request"
                        );
                        return Ok(RecordOutcome {
                            is_already_running: true,
                            record: current.document,
                        });
                    }

                    if !current.document.status.is_settled() {
                        tracing::warn!(
                            date = %date,
                            status = %current.document.status,
                            updated_at = ?current.document.updated_at,
                            "Record is stale, treating previous cycle as abandoned"
                        );
                    }

                    let mut record = current.document.clone();
                    record.start_new_cycle(requested, now);
                    self.replace(&record, &current.etag).await
                }
            };

            match write {
                Ok(saved) => {
                    tracing::info!(
                        date = %date,
                        status = %saved.document.status,
                        count = saved.document.count,
                        "Scrape request accepted"
                    );
                    return Ok(RecordOutcome {
                        is_already_running: false,
                        record: saved.document,
                    });
                }
                Err(e) if e.inner().is_conflict() => {
                    tracing::warn!(date = %date, round, "Lost conditional write, re-reading record");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CoordinatorError::Contention { date, rounds })
    }

    /// Apply a status reported by the scraper.
    pub async fn update_status(
        &self,
        id: &str,
        date: &str,
        status: ScrapeStatus,
    ) -> Result<RateLimitRecord, CoordinatorError> {
        let rounds = self.settings.max_conflict_rounds;

        for round in 1..=rounds {
            let current = self.read(id, date).await?.ok_or_else(|| CoordinatorError::NotFound {
                id: id.to_string(),
                date: date.to_string(),
            })?;

            // Repeated callbacks for a finished or pending cycle change nothing.
            if current.document.status == status && status != ScrapeStatus::Running {
                tracing::debug!(id, date, status = %status, "Duplicate status callback ignored");
                return Ok(current.document);
            }

            let mut record = current.document.clone();
            record.apply_status(status, self.clock.now())?;

            match self.replace(&record, &current.etag).await {
                Ok(saved) => {
                    tracing::info!(
                        id,
                        date,
                        from = %current.document.status,
                        to = %status,
                        "Rate-limit status updated"
                    );
                    return Ok(saved.document);
                }
                Err(e) if e.inner().is_conflict() => {
                    tracing::warn!(id, date, round, "Status update raced another writer, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CoordinatorError::Contention {
            date: date.to_string(),
            rounds,
        })
    }

    /// Whether `record` still holds today's slot.
    fn blocks_new_cycle(&self, record: &RateLimitRecord, now: chrono::DateTime<chrono::Utc>) -> bool {
        match record.status {
            ScrapeStatus::Running => is_actually_running(Some(record), now, self.settings.staleness_window),
            ScrapeStatus::Pending => match (self.settings.pending_staleness_window, record.updated_at_parsed()) {
                (Some(window), Some(updated_at)) => now.signed_duration_since(updated_at) < window_delta(window),
                _ => true,
            },
            ScrapeStatus::Completed | ScrapeStatus::Failed => false,
        }
    }

    async fn read(
        &self,
        id: &str,
        date: &str,
    ) -> Result<Option<Versioned<RateLimitRecord>>, RetryError<StoreError>> {
        let store = &self.store;
        retry(&self.settings.retry, "read_rate_limit", || store.read(id, date)).await
    }

    async fn replace(
        &self,
        record: &RateLimitRecord,
        etag: &str,
    ) -> Result<Versioned<RateLimitRecord>, RetryError<StoreError>> {
        let store = &self.store;
        retry(&self.settings.retry, "replace_rate_limit", || store.replace(record, etag)).await
    }
}
