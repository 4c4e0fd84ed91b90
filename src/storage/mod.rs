//! Document store contract.
//!
//! # Responsibilities
//! - Point read of a rate-limit record by `(id, partition key = date)`
//! - Equality query on `date`
//! - Conditional writes: create-if-absent and replace-if-ETag-matches
//! - Read-only listing of target dates
//!
//! # Design Decisions
//! - The store is injected as `Arc<dyn ...>`; there is no global client
//! - Every write returns a fresh ETag; a stale ETag is a conflict, never a
//!   silent overwrite
//! - Errors carry enough shape for the retry classifier

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::rate_limit::record::RateLimitRecord;
use crate::resilience::retries::{is_transient_message, Retryable};
use crate::scraping::target::TargetDate;

pub use memory::MemoryStore;

/// A stored document with its version tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub etag: String,
    pub document: T,
}

impl<T> Versioned<T> {
    /// Wrap a freshly written document with a new ETag.
    pub fn fresh(document: T) -> Self {
        Self {
            etag: Uuid::new_v4().to_string(),
            document,
        }
    }
}

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store answered 503.
    #[error("store unavailable (503): {0}")]
    Unavailable(String),

    #[error("connection reset by store")]
    ConnectionReset,

    #[error("connection to store timed out")]
    ConnectionTimeout,

    #[error("store host not found: {0}")]
    DnsNotFound(String),

    #[error("connection to store refused")]
    ConnectionRefused,

    /// create-if-absent found an existing document.
    #[error("document {id} already exists")]
    AlreadyExists { id: String },

    /// replace-if-match saw a different ETag.
    #[error("document {id} was modified concurrently")]
    PreconditionFailed { id: String },

    #[error("document {id} not found")]
    NotFound { id: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else reported by the backend.
    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    /// True when a conditional write lost to a concurrent writer.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::AlreadyExists { .. } | StoreError::PreconditionFailed { .. }
        )
    }
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_)
            | StoreError::ConnectionReset
            | StoreError::ConnectionTimeout
            | StoreError::DnsNotFound(_)
            | StoreError::ConnectionRefused => true,
            StoreError::Backend(message) => is_transient_message(message),
            StoreError::AlreadyExists { .. }
            | StoreError::PreconditionFailed { .. }
            | StoreError::NotFound { .. }
            | StoreError::Serialization(_)
            | StoreError::Io(_) => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage for daily rate-limit records.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Point read by id within the `date` partition.
    async fn read(&self, id: &str, date: &str) -> StoreResult<Option<Versioned<RateLimitRecord>>>;

    /// `WHERE date = :date`.
    async fn query_by_date(&self, date: &str) -> StoreResult<Vec<Versioned<RateLimitRecord>>>;

    /// Insert unless a document with the same id exists in the partition.
    async fn create(&self, record: &RateLimitRecord) -> StoreResult<Versioned<RateLimitRecord>>;

    /// Overwrite only if the stored ETag still equals `if_match`.
    async fn replace(
        &self,
        record: &RateLimitRecord,
        if_match: &str,
    ) -> StoreResult<Versioned<RateLimitRecord>>;
}

/// Read access to registered target dates.
#[async_trait]
pub trait TargetDateStore: Send + Sync {
    async fn list_target_dates(&self) -> StoreResult<Vec<TargetDate>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Unavailable("throttled".into()).is_transient());
        assert!(StoreError::ConnectionReset.is_transient());
        assert!(StoreError::ConnectionTimeout.is_transient());
        assert!(StoreError::DnsNotFound("db.local".into()).is_transient());
        assert!(StoreError::ConnectionRefused.is_transient());
        assert!(StoreError::Backend("Network error while reading".into()).is_transient());

        assert!(!StoreError::Backend("bad query".into()).is_transient());
        assert!(!StoreError::NotFound { id: "x".into() }.is_transient());
        assert!(!StoreError::PreconditionFailed { id: "x".into() }.is_transient());
    }

    #[test]
    fn test_conflict_detection() {
        assert!(StoreError::AlreadyExists { id: "x".into() }.is_conflict());
        assert!(StoreError::PreconditionFailed { id: "x".into() }.is_conflict());
        assert!(!StoreError::ConnectionReset.is_conflict());
    }
}
