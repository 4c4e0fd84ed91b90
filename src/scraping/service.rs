//! Scrape trigger service.
//!
//! # Responsibilities
//! - Pick the dates a single or batch trigger should send
//! - Ask the coordinator for today's slot before contacting the scraper
//! - Dispatch single/batch triggers in a detached task
//! - Await and interpret the scraper's answer for by-date triggers
//!
//! # Design Decisions
//! - The breaker is consulted before a record is touched, so an open
//!   circuit never consumes today's slot
//! - A dispatch the scraper answered with a refusal, or that provably never
//!   left this process, releases the slot (`failed`). A timeout or dropped
//!   connection may hide a live run, so the slot stays `pending`
//! - Only network failures and 5xx answers count against the breaker

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::Instrument;

use crate::observability::metrics;
use crate::rate_limit::{CoordinatorError, RateLimitCoordinator, RateLimitRecord, ScrapeStatus};
use crate::resilience::retries::{retry, RetryError, RetryPolicy};
use crate::resilience::{CircuitBreaker, CircuitError};
use crate::scraping::client::{ScraperClient, ScraperError, ScraperResponse};
use crate::scraping::target::{select_scrape_dates, validate_date_key, InvalidDate};
use crate::storage::{StoreError, TargetDateStore};

/// Source tag of the manual trigger.
pub const SOURCE_MANUAL: &str = "manual";
/// Default source tag of the batch trigger.
pub const SOURCE_BATCH: &str = "batch";
/// Source tag of the by-date trigger.
pub const SOURCE_DATE: &str = "date";

const ALREADY_RUNNING_MESSAGE: &str = "A scrape is already in progress for today. Try again later.";

/// How a trigger request was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The scraper has (or will shortly have) the request.
    Accepted,
    /// Today's slot is taken, by us or by the scraper.
    AlreadyRunning,
    /// No eligible target dates.
    NothingToScrape,
    /// The scraper refused the request as malformed.
    Rejected,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Accepted => "accepted",
            Disposition::AlreadyRunning => "already_running",
            Disposition::NothingToScrape => "nothing_to_scrape",
            Disposition::Rejected => "rejected",
        }
    }
}

/// Caller-visible result of a trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerOutcome {
    #[serde(skip)]
    pub disposition: Disposition,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_dates: Option<Vec<String>>,
}

impl TriggerOutcome {
    fn accepted(message: impl Into<String>, target_dates: Vec<String>) -> Self {
        Self {
            disposition: Disposition::Accepted,
            success: true,
            message: message.into(),
            target_dates: Some(target_dates),
        }
    }

    fn refused(disposition: Disposition, message: impl Into<String>) -> Self {
        Self {
            disposition,
            success: false,
            message: message.into(),
            target_dates: None,
        }
    }
}

/// Which unbooked dates a batch trigger sends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateWindow {
    /// Every unbooked date.
    #[default]
    All,
    /// Only today's and later unbooked dates.
    Upcoming,
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid request: {0}")]
    Validation(#[from] InvalidDate),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("failed to load target dates: {0}")]
    TargetDates(#[source] RetryError<StoreError>),

    #[error("scraper circuit is open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    #[error("scraper call failed: {0}")]
    Scraper(#[source] ScraperError),
}

impl TriggerError {
    /// The scraper may be running this trigger despite the error.
    fn may_have_started(&self) -> bool {
        matches!(self, TriggerError::Scraper(e) if e.may_have_started())
    }
}

/// Sends triggers to the scraper through the breaker. Cheap to clone into
/// detached tasks.
#[derive(Debug, Clone)]
struct Dispatcher {
    client: ScraperClient,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl Dispatcher {
    fn permits_call(&self) -> Result<(), TriggerError> {
        match &self.breaker {
            Some(breaker) if !breaker.permits_call() => Err(TriggerError::CircuitOpen {
                retry_after: breaker.retry_after(),
            }),
            _ => Ok(()),
        }
    }

    async fn send(&self, dates: &[String], source: &str) -> Result<ScraperResponse, TriggerError> {
        let client = &self.client;
        let call = move || async move {
            let response = client.trigger(dates, source).await?;
            if response.status >= 500 {
                return Err(ScraperError::Status {
                    status: response.status,
                    body: response.body,
                });
            }
            Ok::<_, ScraperError>(response)
        };

        let result = match &self.breaker {
            Some(breaker) => breaker.call(call).await,
            None => call().await.map_err(CircuitError::Inner),
        };

        match result {
            Ok(response) => Ok(response),
            // 5xx is a breaker failure but still a scraper answer.
            Err(CircuitError::Inner(ScraperError::Status { status, body })) => {
                Ok(ScraperResponse { status, body })
            }
            Err(CircuitError::Inner(e)) => Err(TriggerError::Scraper(e)),
            Err(CircuitError::Open { retry_after, .. }) => Err(TriggerError::CircuitOpen { retry_after }),
        }
    }
}

/// Entry point for the manual, batch and by-date trigger paths.
pub struct ScrapeTriggerService {
    coordinator: Arc<RateLimitCoordinator>,
    targets: Arc<dyn TargetDateStore>,
    dispatcher: Dispatcher,
    retry: RetryPolicy,
}

impl ScrapeTriggerService {
    pub fn new(
        coordinator: Arc<RateLimitCoordinator>,
        targets: Arc<dyn TargetDateStore>,
        client: ScraperClient,
        breaker: Option<Arc<CircuitBreaker>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            coordinator,
            targets,
            dispatcher: Dispatcher { client, breaker },
            retry,
        }
    }

    pub fn coordinator(&self) -> &Arc<RateLimitCoordinator> {
        &self.coordinator
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.dispatcher.breaker.as_ref()
    }

    /// Manual trigger: every unbooked date.
    pub async fn execute_single_scraping(&self) -> Result<TriggerOutcome, TriggerError> {
        self.execute_batch_scraping(SOURCE_MANUAL, DateWindow::All).await
    }

    /// Batch trigger.
    pub async fn execute_batch_scraping(
        &self,
        source: &str,
        window: DateWindow,
    ) -> Result<TriggerOutcome, TriggerError> {
        self.dispatcher.permits_call()?;

        let targets = &self.targets;
        let registered = retry(&self.retry, "list_target_dates", || targets.list_target_dates())
            .await
            .map_err(TriggerError::TargetDates)?;

        let today = self.coordinator.today();
        let cutoff = (window == DateWindow::Upcoming).then_some(today.as_str());
        let dates = match select_scrape_dates(&registered, cutoff) {
            Ok(dates) => dates,
            Err(reason) => {
                tracing::info!(source, registered = registered.len(), reason = %reason, "Nothing to scrape");
                return Ok(TriggerOutcome::refused(Disposition::NothingToScrape, reason.to_string()));
            }
        };

        let slot = self.coordinator.create_or_update_record(ScrapeStatus::Pending).await?;
        if slot.is_already_running {
            return Ok(TriggerOutcome::refused(Disposition::AlreadyRunning, ALREADY_RUNNING_MESSAGE));
        }

        tracing::info!(
            source,
            date = %today,
            record_id = %slot.record.id,
            count = slot.record.count,
            targets = dates.len(),
            "Dispatching scrape"
        );
        self.dispatch(slot.record, dates.clone(), source.to_string());

        let message = format!("Scraping started for {} date(s).", dates.len());
        Ok(TriggerOutcome::accepted(message, dates))
    }

    /// POST the dates to the scraper and return its raw answer.
    pub async fn trigger_scraper_api(&self, dates: &[String], source: &str) -> Result<ScraperResponse, TriggerError> {
        self.dispatcher.send(dates, source).await
    }

    /// By-date trigger. Waits for the scraper's acknowledgement.
    pub async fn trigger_scraping_by_date(&self, date: &str) -> Result<TriggerOutcome, TriggerError> {
        validate_date_key(date)?;
        self.dispatcher.permits_call()?;

        let slot = self.coordinator.create_or_update_record(ScrapeStatus::Pending).await?;
        if slot.is_already_running {
            return Ok(TriggerOutcome::refused(Disposition::AlreadyRunning, ALREADY_RUNNING_MESSAGE));
        }
        let record = slot.record;

        let dates = vec![date.to_string()];
        let response = match self.trigger_scraper_api(&dates, SOURCE_DATE).await {
            Ok(response) => response,
            Err(e) if e.may_have_started() => {
                tracing::error!(date, error = %e, "Scraper call failed after sending, leaving slot pending");
                return Err(e);
            }
            Err(e) => {
                tracing::error!(date, error = %e, "Scraper call failed");
                release(&self.coordinator, &record).await;
                return Err(e);
            }
        };

        let reply = response.reply().unwrap_or_default();
        let outcome = match response.status {
            202 if reply.success => {
                let message = reply
                    .message
                    .unwrap_or_else(|| format!("Scraping started for {date}."));
                return Ok(TriggerOutcome::accepted(message, dates));
            }
            409 => TriggerOutcome::refused(
                Disposition::AlreadyRunning,
                reply.message.unwrap_or_else(|| ALREADY_RUNNING_MESSAGE.to_string()),
            ),
            400 => TriggerOutcome::refused(
                Disposition::Rejected,
                reply.message.unwrap_or_else(|| "The scraper rejected the request.".to_string()),
            ),
            status => {
                tracing::error!(date, status, body = %response.body, "Unexpected scraper answer");
                release(&self.coordinator, &record).await;
                return Err(TriggerError::Scraper(ScraperError::Status {
                    status,
                    body: response.body,
                }));
            }
        };

        tracing::warn!(date, status = response.status, message = %outcome.message, "Scraper refused trigger");
        release(&self.coordinator, &record).await;
        Ok(outcome)
    }

    /// Fire the scraper call in a detached task.
    fn dispatch(&self, record: RateLimitRecord, dates: Vec<String>, source: String) {
        let dispatcher = self.dispatcher.clone();
        let coordinator = self.coordinator.clone();
        let span = tracing::info_span!(
            "scrape_dispatch",
            date = %record.date,
            record_id = %record.id,
            source = %source
        );

        tokio::spawn(
            async move {
                match dispatcher.send(&dates, &source).await {
                    Ok(response) if response.is_success() => {
                        tracing::info!(status = response.status, "Scraper accepted trigger");
                        metrics::record_dispatch("accepted");
                    }
                    Ok(response) => {
                        tracing::warn!(status = response.status, body = %response.body, "Scraper refused trigger");
                        metrics::record_dispatch("refused");
                        release(&coordinator, &record).await;
                    }
                    Err(e) if e.may_have_started() => {
                        tracing::error!(error = %e, "Scraper dispatch failed after sending, leaving slot pending");
                        metrics::record_dispatch("unknown");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Scraper dispatch failed");
                        metrics::record_dispatch("failed");
                        release(&coordinator, &record).await;
                    }
                }
            }
            .instrument(span),
        );
    }
}

/// Mark a cycle failed so the day is not blocked by a trigger that never
/// reached the scraper.
async fn release(coordinator: &RateLimitCoordinator, record: &RateLimitRecord) {
    match coordinator
        .update_status(&record.id, &record.date, ScrapeStatus::Failed)
        .await
    {
        Ok(_) => tracing::info!(date = %record.date, record_id = %record.id, "Released rate-limit slot"),
        Err(e) => tracing::warn!(
            date = %record.date,
            record_id = %record.id,
            error = %e,
            "Could not release rate-limit slot"
        ),
    }
}
