//! The daily rate-limit record and its status state machine.
//!
//! ```text
//! none ──request──▶ Pending ──scraper starts──▶ Running ──▶ Completed | Failed
//!                     ▲                                          │
//!                     └────────────── next request ──────────────┘
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle status of a scrape cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ScrapeStatus {
    /// The cycle has ended, successfully or not.
    pub fn is_settled(self) -> bool {
        matches!(self, ScrapeStatus::Completed | ScrapeStatus::Failed)
    }

    /// Statuses a new request may open a cycle with.
    pub fn is_requestable(self) -> bool {
        matches!(self, ScrapeStatus::Pending | ScrapeStatus::Running)
    }

    /// Transitions reported by the scraper through the status callback.
    ///
    /// Opening a new cycle is not a callback transition; see
    /// [`RateLimitRecord::start_new_cycle`].
    pub fn can_transition_to(self, next: ScrapeStatus) -> bool {
        use ScrapeStatus::*;
        match (self, next) {
            (Pending, Running) | (Pending, Completed) | (Pending, Failed) => true,
            // Running → Running refreshes updatedAt (heartbeat).
            (Running, Running) | (Running, Completed) | (Running, Failed) => true,
            // A released slot whose scraper turns out to be live.
            (Failed, Running) => true,
            (Pending, Pending) | (Running, Pending) => false,
            (Completed, _) | (Failed, _) => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScrapeStatus::Pending => "pending",
            ScrapeStatus::Running => "running",
            ScrapeStatus::Completed => "completed",
            ScrapeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScrapeStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScrapeStatus::Pending),
            "running" => Ok(ScrapeStatus::Running),
            "completed" => Ok(ScrapeStatus::Completed),
            "failed" => Ok(ScrapeStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown scrape status '{0}'")]
pub struct UnknownStatus(pub String);

/// A status change the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ScrapeStatus,
    pub to: ScrapeStatus,
}

/// One document per calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRecord {
    pub id: String,
    /// Partition key, `YYYY-MM-DD`.
    pub date: String,
    pub status: ScrapeStatus,
    pub count: u32,
    pub last_requested_at: String,
    pub created_at: String,
    /// Kept as stored text: documents written elsewhere may carry a missing
    /// or malformed value, and the staleness check must see that.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl RateLimitRecord {
    /// Stable document id for a date.
    pub fn id_for(date: &str) -> String {
        format!("rate-limit-{date}")
    }

    /// First record of the day.
    pub fn new(date: &str, status: ScrapeStatus, now: DateTime<Utc>) -> Self {
        let ts = timestamp(now);
        Self {
            id: Self::id_for(date),
            date: date.to_string(),
            status,
            count: 1,
            last_requested_at: ts.clone(),
            created_at: ts.clone(),
            updated_at: Some(ts),
        }
    }

    /// Reuse the record for a new accepted request.
    pub fn start_new_cycle(&mut self, status: ScrapeStatus, now: DateTime<Utc>) {
        let ts = timestamp(now);
        self.count = self.count.saturating_add(1);
        self.status = status;
        self.last_requested_at = ts.clone();
        self.updated_at = Some(ts);
    }

    /// Apply a status reported by the scraper.
    pub fn apply_status(&mut self, next: ScrapeStatus, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Some(timestamp(now));
        Ok(())
    }

    /// `updatedAt` parsed as RFC 3339, if present and well-formed.
    pub fn updated_at_parsed(&self) -> Option<DateTime<Utc>> {
        self.updated_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}
