//! HTTP error mapping.
//!
//! Handlers return `Result<_, ApiError>`. Internal detail is logged; the
//! caller only sees `{"success": false, "message": ...}` with a generic
//! message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::rate_limit::CoordinatorError;
use crate::scraping::TriggerError;

pub const UNAVAILABLE_MESSAGE: &str = "Service temporarily unavailable. Please try again later.";
pub const CIRCUIT_OPEN_MESSAGE: &str = "Service unavailable, try later.";
pub const INTERNAL_MESSAGE: &str = "Failed to start scraping. Please try again later.";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    /// Malformed body or parameters.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Trigger(e) => match e {
                TriggerError::Validation(_) => StatusCode::BAD_REQUEST,
                TriggerError::Coordinator(e) => coordinator_status(e),
                TriggerError::TargetDates(_) | TriggerError::CircuitOpen { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                TriggerError::Scraper(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Coordinator(e) => coordinator_status(e),
        }
    }

    fn client_message(&self) -> String {
        match self {
            ApiError::BadRequest(m) => m.clone(),
            ApiError::Trigger(TriggerError::Validation(e)) => e.to_string(),
            ApiError::Trigger(TriggerError::CircuitOpen { .. }) => CIRCUIT_OPEN_MESSAGE.to_string(),
            ApiError::Trigger(TriggerError::Coordinator(e)) | ApiError::Coordinator(e) => {
                coordinator_message(e)
            }
            ApiError::Trigger(TriggerError::TargetDates(_)) => UNAVAILABLE_MESSAGE.to_string(),
            ApiError::Trigger(TriggerError::Scraper(_)) => INTERNAL_MESSAGE.to_string(),
        }
    }
}

fn coordinator_status(e: &CoordinatorError) -> StatusCode {
    match e {
        CoordinatorError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoordinatorError::InvalidTransition(_) | CoordinatorError::NotRequestable(_) => {
            StatusCode::BAD_REQUEST
        }
        CoordinatorError::Storage(_) | CoordinatorError::Contention { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

fn coordinator_message(e: &CoordinatorError) -> String {
    match e {
        CoordinatorError::NotFound { .. } => "Record not found.".to_string(),
        CoordinatorError::InvalidTransition(t) => {
            format!("Cannot change status from {} to {}.", t.from, t.to)
        }
        CoordinatorError::NotRequestable(s) => format!("Status '{s}' cannot be requested."),
        CoordinatorError::Storage(_) | CoordinatorError::Contention { .. } => {
            UNAVAILABLE_MESSAGE.to_string()
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let body = json!({ "success": false, "message": self.client_message() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::record::{InvalidTransition, ScrapeStatus};
    use crate::scraping::target::InvalidDate;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let validation = ApiError::from(TriggerError::Validation(InvalidDate::Format));
        assert_eq!(validation.status(), StatusCode::BAD_REQUEST);

        let open = ApiError::from(TriggerError::CircuitOpen {
            retry_after: Duration::from_secs(30),
        });
        assert_eq!(open.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(open.client_message(), CIRCUIT_OPEN_MESSAGE);

        let missing = ApiError::from(CoordinatorError::NotFound {
            id: "rate-limit-2025-09-15".into(),
            date: "2025-09-15".into(),
        });
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let illegal = ApiError::from(CoordinatorError::InvalidTransition(InvalidTransition {
            from: ScrapeStatus::Completed,
            to: ScrapeStatus::Failed,
        }));
        assert_eq!(illegal.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_scraper_detail_is_hidden() {
        let err = ApiError::from(TriggerError::Scraper(crate::scraping::ScraperError::Status {
            status: 502,
            body: "upstream stack trace".into(),
        }));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.client_message().contains("stack trace"));
    }
}
