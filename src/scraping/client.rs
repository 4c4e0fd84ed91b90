//! HTTP client for the external scraper.
//!
//! The scraper accepts `POST {base_url}/{trigger_path}` with
//! `{"dates": [...], "source": "..."}`, starts work in the background and
//! answers right away. Calls are never retried here: a repeated POST would
//! start a second run.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::ScraperConfig;
use crate::resilience::retries::{is_transient_message, Retryable};

#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("scraper base URL is not configured")]
    NotConfigured,

    #[error("invalid scraper URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("scraper answered {status}: {body}")]
    Status { status: u16, body: String },
}

impl ScraperError {
    /// The request may have reached the scraper even though no answer came
    /// back: a timeout or a connection dropped after sending. Only a failed
    /// connect or a request that was never built proves nothing was sent.
    pub fn may_have_started(&self) -> bool {
        match self {
            ScraperError::Network(e) => !(e.is_connect() || e.is_builder()),
            ScraperError::Status { .. } | ScraperError::NotConfigured | ScraperError::InvalidUrl(_) => false,
        }
    }
}

impl Retryable for ScraperError {
    fn is_transient(&self) -> bool {
        match self {
            ScraperError::Network(e) => e.is_timeout() || e.is_connect() || is_transient_message(&e.to_string()),
            ScraperError::Status { status, .. } => *status == 503,
            ScraperError::NotConfigured | ScraperError::InvalidUrl(_) => false,
        }
    }
}

/// Join `trigger_path` under the base URL's path, so a base of
/// `http://host/prefix` keeps its prefix.
fn trigger_endpoint(base: &str, trigger_path: &str) -> Result<Url, url::ParseError> {
    let mut base = Url::parse(base)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(trigger_path.trim_start_matches('/'))
}

#[derive(Debug, Serialize)]
struct TriggerBody<'a> {
    dates: &'a [String],
    source: &'a str,
}

/// JSON the scraper usually answers with.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScraperReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Raw scraper answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ScraperResponse {
    pub status: u16,
    pub body: String,
}

impl ScraperResponse {
    /// The body as a [`ScraperReply`], if it parses.
    pub fn reply(&self) -> Option<ScraperReply> {
        serde_json::from_str(&self.body).ok()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound scraper client.
#[derive(Debug, Clone)]
pub struct ScraperClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl ScraperClient {
    pub fn new(config: &ScraperConfig) -> Result<Self, ScraperError> {
        let base = config.base_url.as_deref().ok_or(ScraperError::NotConfigured)?;
        let endpoint = trigger_endpoint(base, &config.trigger_path)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// POST the trigger and return whatever the scraper answered.
    ///
    /// Only transport failures are errors; every HTTP status resolves.
    pub async fn trigger(&self, dates: &[String], source: &str) -> Result<ScraperResponse, ScraperError> {
        tracing::debug!(endpoint = %self.endpoint, dates = ?dates, source, "Calling scraper");

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&TriggerBody { dates, source })
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        tracing::debug!(status, "Scraper answered");
        Ok(ScraperResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> ScraperConfig {
        ScraperConfig {
            base_url: Some(base_url.to_string()),
            ..ScraperConfig::default()
        }
    }

    #[test]
    fn test_requires_base_url() {
        let err = ScraperClient::new(&ScraperConfig::default()).unwrap_err();
        assert!(matches!(err, ScraperError::NotConfigured));

        let err = ScraperClient::new(&config("not a url")).unwrap_err();
        assert!(matches!(err, ScraperError::InvalidUrl(_)));
    }

    #[test]
    fn test_status_errors_are_answers() {
        let server_error = ScraperError::Status {
            status: 502,
            body: String::new(),
        };
        assert!(!server_error.may_have_started());
        assert!(!server_error.is_transient());
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        assert_eq!(
            trigger_endpoint("http://scraper:8080", "/api/scrape").unwrap().as_str(),
            "http://scraper:8080/api/scrape"
        );
        assert_eq!(
            trigger_endpoint("http://host/prefix", "/api/scrape").unwrap().as_str(),
            "http://host/prefix/api/scrape"
        );
        assert_eq!(
            trigger_endpoint("http://host/prefix/", "api/scrape").unwrap().as_str(),
            "http://host/prefix/api/scrape"
        );
    }

    #[tokio::test]
    async fn test_prefixed_base_url_is_honoured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/jobs/api/scrape"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = ScraperClient::new(&config(&format!("{}/jobs", server.uri()))).unwrap();
        let response = client.trigger(&[], "manual").await.unwrap();
        assert_eq!(response.status, 202);
    }

    #[tokio::test]
    async fn test_trigger_posts_dates_and_source() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/scrape"))
            .and(body_json(serde_json::json!({
                "dates": ["2025-09-15"],
                "source": "manual"
            })))
            .respond_with(
                ResponseTemplate::new(202).set_body_json(serde_json::json!({"success": true, "message": "started"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ScraperClient::new(&config(&server.uri())).unwrap();
        let response = client.trigger(&["2025-09-15".to_string()], "manual").await.unwrap();

        assert_eq!(response.status, 202);
        assert!(response.is_success());
        let reply = response.reply().unwrap();
        assert!(reply.success);
        assert_eq!(reply.message.as_deref(), Some("started"));
    }

    #[tokio::test]
    async fn test_error_statuses_resolve() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_string("busy"))
            .mount(&server)
            .await;

        let client = ScraperClient::new(&config(&server.uri())).unwrap();
        let response = client.trigger(&[], "batch").await.unwrap();
        assert_eq!(response.status, 409);
        assert_eq!(response.body, "busy");
        assert!(response.reply().is_none());
    }

    #[tokio::test]
    async fn test_network_failure_is_error() {
        // Nothing listens on port 9 on the loopback interface.
        let client = ScraperClient::new(&config("http://127.0.0.1:9")).unwrap();
        let err = client.trigger(&[], "manual").await.unwrap_err();
        assert!(matches!(err, ScraperError::Network(_)));
        // Refused connect: nothing was sent.
        assert!(!err.may_have_started());
    }

    #[tokio::test]
    async fn test_timeout_may_have_started() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = ScraperClient::new(&ScraperConfig {
            request_timeout_ms: 50,
            ..config(&server.uri())
        })
        .unwrap();
        let err = client.trigger(&[], "manual").await.unwrap_err();
        assert!(err.may_have_started());
    }
}
