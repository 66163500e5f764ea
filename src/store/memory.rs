//! In-memory store for tests and local experiments

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ResultCache, RowStore, SchemaProvider, StoreError, StoreResult};
use crate::models::{CacheEntry, RawRow, RowFilter, VersionId, VersionSchema};
use crate::normalize::cell_text;

#[derive(Debug, Default, Clone)]
struct FailurePlan {
    count: bool,
    fetch_at: Option<u64>,
    cache_get: bool,
    cache_upsert: bool,
}

/// Holds schemas, rows and cache entries in process memory.
///
/// Failures can be scripted per operation and calls are counted, so callers
/// can observe how much of the store a run actually touched.
#[derive(Debug, Default)]
pub struct MemoryStore {
    schemas: RwLock<HashMap<VersionId, VersionSchema>>,
    rows: RwLock<HashMap<VersionId, Vec<RawRow>>>,
    cache: RwLock<HashMap<VersionId, CacheEntry>>,
    failures: RwLock<FailurePlan>,
    fetch_calls: AtomicUsize,
    count_calls: AtomicUsize,
    upserts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_version(
        &self,
        version_id: VersionId,
        schema: VersionSchema,
        rows: Vec<RawRow>,
    ) {
        self.schemas.write().await.insert(version_id, schema);
        self.rows.write().await.insert(version_id, rows);
    }

    pub async fn fail_counts(&self) {
        self.failures.write().await.count = true;
    }

    pub async fn fail_fetch_at(&self, offset: u64) {
        self.failures.write().await.fetch_at = Some(offset);
    }

    pub async fn fail_cache_reads(&self) {
        self.failures.write().await.cache_get = true;
    }

    pub async fn fail_cache_writes(&self) {
        self.failures.write().await.cache_upsert = true;
    }

    pub async fn clear_failures(&self) {
        *self.failures.write().await = FailurePlan::default();
    }

    pub async fn cached(&self, version_id: VersionId) -> Option<CacheEntry> {
        self.cache.read().await.get(&version_id).cloned()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    async fn matching_rows(&self, version_id: VersionId, filter: Option<&RowFilter>) -> Vec<RawRow> {
        let rows = self.rows.read().await;
        let Some(rows) = rows.get(&version_id) else {
            return Vec::new();
        };
        rows.iter()
            .filter(|row| filter.map_or(true, |filter| matches_filter(row, filter)))
            .cloned()
            .collect()
    }
}

fn matches_filter(row: &RawRow, filter: &RowFilter) -> bool {
    cell_text(row.get(&filter.column)).as_deref() == Some(filter.value.as_str())
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn count_rows(
        &self,
        version_id: VersionId,
        filter: Option<&RowFilter>,
    ) -> StoreResult<u64> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        if self.failures.read().await.count {
            return Err(StoreError::Unavailable("scripted count failure".to_string()));
        }
        Ok(self.matching_rows(version_id, filter).await.len() as u64)
    }

    async fn fetch_rows(
        &self,
        version_id: VersionId,
        offset: u64,
        limit: u64,
        filter: Option<&RowFilter>,
    ) -> StoreResult<Vec<RawRow>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.failures.read().await.fetch_at == Some(offset) {
            return Err(StoreError::Unavailable(format!(
                "scripted fetch failure at offset {offset}"
            )));
        }
        Ok(self
            .matching_rows(version_id, filter)
            .await
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn distinct_values(
        &self,
        version_id: VersionId,
        column: &str,
    ) -> StoreResult<Vec<String>> {
        let values: BTreeSet<String> = self
            .matching_rows(version_id, None)
            .await
            .iter()
            .filter_map(|row| cell_text(row.get(column)))
            .filter(|value| !value.trim().is_empty())
            .collect();
        Ok(values.into_iter().collect())
    }
}

#[async_trait]
impl ResultCache for MemoryStore {
    async fn get(&self, version_id: VersionId) -> StoreResult<Option<CacheEntry>> {
        if self.failures.read().await.cache_get {
            return Err(StoreError::Unavailable("scripted cache read failure".to_string()));
        }
        Ok(self.cached(version_id).await)
    }

    async fn upsert(&self, version_id: VersionId, entry: &CacheEntry) -> StoreResult<()> {
        if self.failures.read().await.cache_upsert {
            return Err(StoreError::Unavailable("scripted cache write failure".to_string()));
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.cache.write().await.insert(version_id, entry.clone());
        Ok(())
    }
}

#[async_trait]
impl SchemaProvider for MemoryStore {
    async fn get_schema(&self, version_id: VersionId) -> StoreResult<Option<VersionSchema>> {
        Ok(self.schemas.read().await.get(&version_id).cloned())
    }
}
