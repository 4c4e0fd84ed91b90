//! Shared utilities for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scrape_coordinator::config::AppConfig;
use scrape_coordinator::http::build_router;
use scrape_coordinator::lifecycle::build_components;
use scrape_coordinator::rate_limit::{ManualClock, RateLimitRecord, ScrapeStatus};
use scrape_coordinator::scraping::{ScrapeTriggerService, TargetDate};
use scrape_coordinator::storage::{MemoryStore, RateLimitStore, StoreError, StoreResult, Versioned};

pub const TODAY: &str = "2025-09-15";
pub const TODAY_ID: &str = "rate-limit-2025-09-15";

/// 09:00 UTC on [`TODAY`].
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 15, 9, 0, 0).unwrap()
}

/// Defaults pointed at `scraper_uri`, with millisecond retry delays.
pub fn test_config(scraper_uri: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.scraper.base_url = Some(scraper_uri.to_string());
    config.scraper.request_timeout_ms = 2_000;
    config.retries.initial_delay_ms = 1;
    config.retries.max_delay_ms = 5;
    config
}

pub fn target(date: &str, is_booked: bool) -> TargetDate {
    TargetDate {
        date: date.to_string(),
        label: format!("Session {date}"),
        is_booked,
    }
}

/// A router wired to an in-memory store, a manual clock and a mock scraper.
pub struct TestApp {
    pub router: Router,
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub scraper: MockServer,
    pub service: Arc<ScrapeTriggerService>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let scraper = MockServer::start().await;
        let mut config = test_config(&scraper.uri());
        tweak(&mut config);

        let clock = Arc::new(ManualClock::new(start_time()));
        let components = build_components(&config, clock.clone()).unwrap();
        let service = components.state.service.clone();

        Self {
            router: build_router(components.state, &config),
            store: components.store,
            clock,
            scraper,
            service,
        }
    }

    /// Make the mock scraper answer every trigger with `status` and `body`.
    pub async fn scraper_answers(&self, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(path("/api/scrape"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.scraper)
            .await;
    }

    pub async fn scraper_accepts(&self) {
        self.scraper_answers(202, serde_json::json!({"success": true, "message": "Scraping started"}))
            .await;
    }

    /// Bodies of every trigger the scraper received.
    pub async fn scraper_calls(&self) -> Vec<Value> {
        self.scraper
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(json_request("POST", uri, &body)).await
    }

    pub async fn put(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(json_request("PUT", uri, &body)).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn record(&self, date: &str) -> Option<RateLimitRecord> {
        self.store
            .read(&RateLimitRecord::id_for(date), date)
            .await
            .unwrap()
            .map(|v| v.document)
    }

    /// Poll until today's record reaches `status`; detached dispatches
    /// settle asynchronously.
    pub async fn wait_for_status(&self, status: ScrapeStatus) -> RateLimitRecord {
        for _ in 0..200 {
            if let Some(record) = self.record(TODAY).await {
                if record.status == status {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("record never reached {status}");
    }
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// A store whose first `failures` calls of every kind fail with a
/// transient error.
pub struct FlakyStore {
    pub inner: MemoryStore,
    remaining: AtomicU32,
    pub calls: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore, failures: u32) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    fn trip(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.remaining.load(Ordering::SeqCst);
        if left > 0 {
            self.remaining.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::ConnectionReset);
        }
        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for FlakyStore {
    async fn read(&self, id: &str, date: &str) -> StoreResult<Option<Versioned<RateLimitRecord>>> {
        self.trip()?;
        self.inner.read(id, date).await
    }

    async fn query_by_date(&self, date: &str) -> StoreResult<Vec<Versioned<RateLimitRecord>>> {
        self.trip()?;
        self.inner.query_by_date(date).await
    }

    async fn create(&self, record: &RateLimitRecord) -> StoreResult<Versioned<RateLimitRecord>> {
        self.trip()?;
        self.inner.create(record).await
    }

    async fn replace(
        &self,
        record: &RateLimitRecord,
        if_match: &str,
    ) -> StoreResult<Versioned<RateLimitRecord>> {
        self.trip()?;
        self.inner.replace(record, if_match).await
    }
}
