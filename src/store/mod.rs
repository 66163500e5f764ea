//! Collaborators the aggregation core reads from and writes to.
//!
//! The orchestrator only sees these traits; `crate::db` provides the
//! Postgres implementation and [`memory`] an in-process one.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{CacheEntry, RawRow, RowFilter, VersionId, VersionSchema};

pub mod memory;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("store error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable(err.to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Paged access to the ingested rows of a version.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn count_rows(
        &self,
        version_id: VersionId,
        filter: Option<&RowFilter>,
    ) -> StoreResult<u64>;

    /// Rows in ingestion order, `limit` at most, starting at `offset`.
    async fn fetch_rows(
        &self,
        version_id: VersionId,
        offset: u64,
        limit: u64,
        filter: Option<&RowFilter>,
    ) -> StoreResult<Vec<RawRow>>;

    /// Distinct non-empty values of `column`, sorted.
    async fn distinct_values(&self, version_id: VersionId, column: &str)
        -> StoreResult<Vec<String>>;
}

#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, version_id: VersionId) -> StoreResult<Option<CacheEntry>>;

    /// Inserts or replaces the entry for `version_id`.
    async fn upsert(&self, version_id: VersionId, entry: &CacheEntry) -> StoreResult<()>;
}

#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// `Ok(None)` when the version is unknown.
    async fn get_schema(&self, version_id: VersionId) -> StoreResult<Option<VersionSchema>>;
}
