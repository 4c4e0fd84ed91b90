use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::rate_limit::RateLimitRecord;
use crate::resilience::CircuitSnapshot;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub today: String,
    pub today_record: Option<RateLimitRecord>,
    pub actually_running: bool,
    pub staleness_window_secs: u64,
    /// `None` when the breaker is disabled.
    pub circuit: Option<CircuitSnapshot>,
}

pub async fn get_status(State(state): State<AppState>) -> Result<Json<SystemStatus>, ApiError> {
    let coordinator = state.service.coordinator();
    let today_record = coordinator.get_today_record().await?;
    let actually_running = coordinator.is_actually_running(today_record.as_ref());
    let circuit = state.service.breaker().map(|b| b.snapshot());

    let status = match &circuit {
        Some(snapshot) if snapshot.state != crate::resilience::CircuitState::Closed => "degraded",
        _ => "operational",
    };

    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status,
        today: coordinator.today(),
        today_record,
        actually_running,
        staleness_window_secs: coordinator.staleness_window().as_secs(),
        circuit,
    }))
}
