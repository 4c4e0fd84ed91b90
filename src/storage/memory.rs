//! In-process document store with JSON snapshot persistence.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::rate_limit::record::RateLimitRecord;
use crate::scraping::target::TargetDate;
use crate::storage::{RateLimitStore, StoreError, StoreResult, TargetDateStore, Versioned};

/// `(partition key, id)`.
type RecordKey = (String, String);

/// On-disk snapshot layout.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    #[serde(default)]
    rate_limits: Vec<RateLimitRecord>,
    #[serde(default)]
    target_dates: Vec<TargetDate>,
}

/// A concurrent document store backed by `DashMap`.
///
/// Conditional writes hold the shard lock for the compare and the swap, so
/// two writers racing on the same ETag cannot both succeed.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<RecordKey, Versioned<RateLimitRecord>>>,
    target_dates: Arc<DashMap<String, TargetDate>>,
    persistence_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new(persistence_path: Option<PathBuf>) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            target_dates: Arc::new(DashMap::new()),
            persistence_path,
        }
    }

    /// Load from a snapshot file if it exists; remember the path for saving.
    pub fn load_from_file(path: &Path) -> StoreResult<Self> {
        let store = Self::new(Some(path.to_path_buf()));
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let snapshot: Snapshot = serde_json::from_reader(reader)?;

            for record in snapshot.rate_limits {
                store.records.insert(
                    (record.date.clone(), record.id.clone()),
                    Versioned::fresh(record),
                );
            }
            for target in snapshot.target_dates {
                store.target_dates.insert(target.date.clone(), target);
            }
            tracing::info!(
                path = %path.display(),
                records = store.records.len(),
                target_dates = store.target_dates.len(),
                "Loaded store snapshot"
            );
        }
        Ok(store)
    }

    /// Write a snapshot if a persistence path is configured.
    pub fn save_to_file(&self) -> StoreResult<()> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };

        let mut snapshot = Snapshot {
            rate_limits: self.records.iter().map(|r| r.value().document.clone()).collect(),
            target_dates: self.target_dates.iter().map(|r| r.value().clone()).collect(),
        };
        snapshot.rate_limits.sort_by(|a, b| a.date.cmp(&b.date));
        snapshot.target_dates.sort_by(|a, b| a.date.cmp(&b.date));

        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &snapshot)?;
        tracing::info!(
            path = %path.display(),
            records = snapshot.rate_limits.len(),
            "Saved store snapshot"
        );
        Ok(())
    }

    /// Register or replace a target date.
    pub fn upsert_target_date(&self, target: TargetDate) {
        self.target_dates.insert(target.date.clone(), target);
    }

    /// Overwrite a record without an ETag check. For seeding and repair.
    pub fn put_record(&self, record: RateLimitRecord) -> Versioned<RateLimitRecord> {
        let versioned = Versioned::fresh(record);
        self.records.insert(
            (versioned.document.date.clone(), versioned.document.id.clone()),
            versioned.clone(),
        );
        versioned
    }

    /// Number of stored rate-limit records.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn read(&self, id: &str, date: &str) -> StoreResult<Option<Versioned<RateLimitRecord>>> {
        Ok(self
            .records
            .get(&(date.to_string(), id.to_string()))
            .map(|r| r.value().clone()))
    }

    async fn query_by_date(&self, date: &str) -> StoreResult<Vec<Versioned<RateLimitRecord>>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.key().0 == date)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn create(&self, record: &RateLimitRecord) -> StoreResult<Versioned<RateLimitRecord>> {
        match self.records.entry((record.date.clone(), record.id.clone())) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists {
                id: record.id.clone(),
            }),
            Entry::Vacant(slot) => {
                let versioned = Versioned::fresh(record.clone());
                slot.insert(versioned.clone());
                Ok(versioned)
            }
        }
    }

    async fn replace(
        &self,
        record: &RateLimitRecord,
        if_match: &str,
    ) -> StoreResult<Versioned<RateLimitRecord>> {
        let key = (record.date.clone(), record.id.clone());
        let mut current = self.records.get_mut(&key).ok_or_else(|| StoreError::NotFound {
            id: record.id.clone(),
        })?;

        if current.etag != if_match {
            return Err(StoreError::PreconditionFailed {
                id: record.id.clone(),
            });
        }

        *current = Versioned::fresh(record.clone());
        Ok(current.clone())
    }
}

#[async_trait]
impl TargetDateStore for MemoryStore {
    async fn list_target_dates(&self) -> StoreResult<Vec<TargetDate>> {
        let mut dates: Vec<TargetDate> = self.target_dates.iter().map(|r| r.value().clone()).collect();
        dates.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(dates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::record::ScrapeStatus;
    use chrono::{TimeZone, Utc};

    fn record(date: &str) -> RateLimitRecord {
        let now = Utc.with_ymd_and_hms(2025, 9, 15, 9, 0, 0).unwrap();
        RateLimitRecord::new(date, ScrapeStatus::Pending, now)
    }

    #[tokio::test]
    async fn test_create_if_absent() {
        let store = MemoryStore::new(None);
        let first = store.create(&record("2025-09-15")).await.unwrap();
        assert_eq!(first.document.count, 1);

        let err = store.create(&record("2025-09-15")).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn test_replace_checks_etag() {
        let store = MemoryStore::new(None);
        let created = store.create(&record("2025-09-15")).await.unwrap();

        let mut updated = created.document.clone();
        updated.count = 2;
        let saved = store.replace(&updated, &created.etag).await.unwrap();
        assert_ne!(saved.etag, created.etag);

        // The old ETag no longer matches.
        updated.count = 3;
        let err = store.replace(&updated, &created.etag).await.unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed { .. }));

        let current = store.read(&updated.id, "2025-09-15").await.unwrap().unwrap();
        assert_eq!(current.document.count, 2);
    }

    #[tokio::test]
    async fn test_replace_missing_is_not_found() {
        let store = MemoryStore::new(None);
        let err = store.replace(&record("2025-09-15"), "etag").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_query_by_date_filters_partition() {
        let store = MemoryStore::new(None);
        store.create(&record("2025-09-15")).await.unwrap();
        store.create(&record("2025-09-16")).await.unwrap();

        let hits = store.query_by_date("2025-09-16").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.id, "rate-limit-2025-09-16");
    }

    #[tokio::test]
    async fn test_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = MemoryStore::new(Some(path.clone()));
        store.create(&record("2025-09-15")).await.unwrap();
        store.upsert_target_date(TargetDate {
            date: "2025-09-20".into(),
            label: "Saturday session".into(),
            is_booked: false,
        });
        store.save_to_file().unwrap();

        let loaded = MemoryStore::load_from_file(&path).unwrap();
        assert_eq!(loaded.record_count(), 1);
        let targets = loaded.list_target_dates().await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].label, "Saturday session");
    }
}
