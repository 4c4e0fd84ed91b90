//! Route handlers for the trigger, status and health endpoints.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::rate_limit::{RateLimitRecord, ScrapeStatus};
use crate::scraping::service::SOURCE_BATCH;
use crate::scraping::target::validate_date_key;
use crate::scraping::{DateWindow, Disposition, TriggerError, TriggerOutcome};

/// Body of `POST /scrape/batch`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    #[serde(default)]
    pub source: Option<String>,
    /// Send every unbooked date, overriding `upcoming_only`.
    #[serde(default)]
    pub include_all_target_dates: bool,
    /// Skip dates before today.
    #[serde(default)]
    pub upcoming_only: bool,
}

impl BatchRequest {
    fn window(&self) -> DateWindow {
        if self.upcoming_only && !self.include_all_target_dates {
            DateWindow::Upcoming
        } else {
            DateWindow::All
        }
    }
}

/// Body of `POST /scrape/date`.
#[derive(Debug, Deserialize)]
pub struct DateRequest {
    pub date: Option<String>,
}

/// Body of `PUT /scrape/status`, sent by the scraper.
#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub id: String,
    pub date: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdated {
    pub success: bool,
    pub record: RateLimitRecord,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayStatus {
    pub date: String,
    pub record: Option<RateLimitRecord>,
    pub actually_running: bool,
}

fn outcome_status(disposition: Disposition) -> StatusCode {
    match disposition {
        Disposition::Accepted => StatusCode::ACCEPTED,
        Disposition::AlreadyRunning => StatusCode::CONFLICT,
        Disposition::NothingToScrape | Disposition::Rejected => StatusCode::BAD_REQUEST,
    }
}

/// Render a trigger result and count it.
fn trigger_response(
    path: &'static str,
    start: Instant,
    result: Result<TriggerOutcome, TriggerError>,
) -> Result<Response, ApiError> {
    match result {
        Ok(outcome) => {
            metrics::record_trigger(path, outcome.disposition.as_str(), start);
            Ok((outcome_status(outcome.disposition), Json(outcome)).into_response())
        }
        Err(e) => {
            metrics::record_trigger(path, "error", start);
            Err(e.into())
        }
    }
}

/// `POST /scrape`
pub async fn trigger_single(State(state): State<AppState>) -> Result<Response, ApiError> {
    let start = Instant::now();
    let result = state.service.execute_single_scraping().await;
    trigger_response("/scrape", start, result)
}

/// `POST /scrape/batch`
pub async fn trigger_batch(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let start = Instant::now();

    // The scheduler posts without a body.
    let request: BatchRequest = if body.iter().all(u8::is_ascii_whitespace) {
        BatchRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            metrics::record_trigger("/scrape/batch", "invalid", start);
            ApiError::BadRequest(format!("Invalid request body: {e}"))
        })?
    };

    let source = request.source.as_deref().unwrap_or(SOURCE_BATCH);
    let result = state
        .service
        .execute_batch_scraping(source, request.window())
        .await;
    trigger_response("/scrape/batch", start, result)
}

/// `POST /scrape/date`
pub async fn trigger_date(
    State(state): State<AppState>,
    payload: Result<Json<DateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let start = Instant::now();

    let date = match payload {
        Ok(Json(DateRequest { date: Some(date) })) => date,
        Ok(_) => {
            metrics::record_trigger("/scrape/date", "invalid", start);
            return Err(ApiError::BadRequest("Field 'date' is required.".to_string()));
        }
        Err(rejection) => {
            metrics::record_trigger("/scrape/date", "invalid", start);
            return Err(ApiError::BadRequest(rejection.body_text()));
        }
    };

    let result = state.service.trigger_scraping_by_date(date.trim()).await;
    trigger_response("/scrape/date", start, result)
}

/// `PUT /scrape/status`
pub async fn update_status(
    State(state): State<AppState>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<StatusUpdated>, ApiError> {
    let Json(update) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let status: ScrapeStatus = update
        .status
        .parse()
        .map_err(|e: crate::rate_limit::record::UnknownStatus| ApiError::BadRequest(e.to_string()))?;
    validate_date_key(&update.date).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let record = state
        .service
        .coordinator()
        .update_status(&update.id, &update.date, status)
        .await?;

    Ok(Json(StatusUpdated {
        success: true,
        record,
    }))
}

/// `GET /scrape/status`
pub async fn today_status(State(state): State<AppState>) -> Result<Json<TodayStatus>, ApiError> {
    let coordinator = state.service.coordinator();
    let record = coordinator.get_today_record().await?;
    let actually_running = coordinator.is_actually_running(record.as_ref());

    Ok(Json(TodayStatus {
        date: coordinator.today(),
        record,
        actually_running,
    }))
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
