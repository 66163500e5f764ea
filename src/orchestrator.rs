use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::aggregate::{aggregate_chunk, merge_into};
use crate::config::AggregationConfig;
use crate::error::{AggregationError, AggregationResult};
use crate::filter::validate_filter;
use crate::models::{
    Accumulator, AggregatedResult, AggregationOutcome, CacheEntry, RowFilter, VersionId,
    VersionSchema,
};
use crate::score::compute_result;
use crate::store::{ResultCache, RowStore, SchemaProvider};

/// Drives aggregation runs against injected stores.
///
/// Runs for different versions are independent. Two concurrent runs for the
/// same version both compute the full result and the later cache write wins.
pub struct Aggregator {
    rows: Arc<dyn RowStore>,
    cache: Arc<dyn ResultCache>,
    schemas: Arc<dyn SchemaProvider>,
    config: AggregationConfig,
}

impl Aggregator {
    pub fn new(
        rows: Arc<dyn RowStore>,
        cache: Arc<dyn ResultCache>,
        schemas: Arc<dyn SchemaProvider>,
        config: AggregationConfig,
    ) -> Self {
        Self {
            rows,
            cache,
            schemas,
            config,
        }
    }

    /// Uses one backend for rows, cache and schemas.
    pub fn with_store<S>(store: Arc<S>, config: AggregationConfig) -> Self
    where
        S: RowStore + ResultCache + SchemaProvider + 'static,
    {
        Self::new(store.clone(), store.clone(), store, config)
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Computes satisfaction percentages for a version.
    ///
    /// A filter that selects no rows (or cannot be checked) is dropped and the
    /// run continues unfiltered; the outcome records which filter was applied.
    /// Only unfiltered results are read from and written to the cache.
    pub async fn run_aggregation(
        &self,
        version_id: VersionId,
        filter: Option<RowFilter>,
    ) -> AggregationResult<AggregationOutcome> {
        let span = info_span!("aggregation", %version_id);
        self.run(version_id, filter).instrument(span).await
    }

    async fn run(
        &self,
        version_id: VersionId,
        requested: Option<RowFilter>,
    ) -> AggregationResult<AggregationOutcome> {
        let applied = match requested.clone() {
            Some(filter) => {
                if validate_filter(self.rows.as_ref(), version_id, &filter).await {
                    Some(filter)
                } else {
                    warn!(%filter, "filter selects no rows, aggregating without it");
                    None
                }
            }
            None => None,
        };

        if applied.is_none() {
            if let Some(entry) = self.cached_entry(version_id).await {
                info!(computed_at = %entry.computed_at, "serving cached result");
                return Ok(AggregationOutcome {
                    result: entry.result,
                    from_cache: true,
                    requested_filter: requested,
                    applied_filter: None,
                });
            }
        }

        let schema = self.load_schema(version_id).await?;
        let total = self.row_total(version_id, &schema, applied.as_ref()).await?;
        info!(
            total,
            chunk_size = self.config.chunk_size,
            filtered = applied.is_some(),
            "scanning rows"
        );

        let accumulator = self
            .scan(version_id, &schema, applied.as_ref(), total)
            .await?;
        let result = compute_result(&schema, &accumulator);
        info!(
            faculties = result.faculties.len(),
            global = result.global,
            "aggregation finished"
        );

        if applied.is_none() {
            self.store_entry(version_id, &result, accumulator).await;
        }

        Ok(AggregationOutcome {
            result,
            from_cache: false,
            requested_filter: requested,
            applied_filter: applied,
        })
    }

    /// Recomputes the cached result from its stored accumulator without
    /// reading any rows.
    pub async fn refresh_from_cache(
        &self,
        version_id: VersionId,
    ) -> AggregationResult<AggregatedResult> {
        let schema = self.load_schema(version_id).await?;
        let entry = self
            .cached_entry(version_id)
            .await
            .ok_or(AggregationError::CacheMiss { version_id })?;

        let result = compute_result(&schema, &entry.accumulator);
        info!(%version_id, global = result.global, "re-derived cached result");
        self.store_entry(version_id, &result, entry.accumulator).await;
        Ok(result)
    }

    /// Values a caller can pick from when filtering on `column`.
    pub async fn filter_values(
        &self,
        version_id: VersionId,
        column: &str,
    ) -> AggregationResult<Vec<String>> {
        self.load_schema(version_id).await?;
        self.rows
            .distinct_values(version_id, column)
            .await
            .map_err(|source| AggregationError::row_store(version_id, None, None, source))
    }

    async fn load_schema(&self, version_id: VersionId) -> AggregationResult<VersionSchema> {
        let schema = self
            .schemas
            .get_schema(version_id)
            .await
            .map_err(|source| AggregationError::row_store(version_id, None, None, source))?
            .ok_or(AggregationError::SchemaNotFound { version_id })?;
        schema
            .validate()
            .map_err(|reason| AggregationError::InvalidSchema { version_id, reason })?;
        Ok(schema)
    }

    async fn row_total(
        &self,
        version_id: VersionId,
        schema: &VersionSchema,
        filter: Option<&RowFilter>,
    ) -> AggregationResult<u64> {
        if let (None, Some(stored)) = (filter, schema.row_count) {
            return Ok(stored);
        }
        self.rows
            .count_rows(version_id, filter)
            .await
            .map_err(|source| AggregationError::row_store(version_id, None, filter, source))
    }

    /// Fetches and aggregates pages concurrently, merging them at one point.
    ///
    /// The first failing page aborts the scan; pages still in flight are
    /// dropped with it.
    async fn scan(
        &self,
        version_id: VersionId,
        schema: &VersionSchema,
        filter: Option<&RowFilter>,
        total: u64,
    ) -> AggregationResult<Accumulator> {
        let chunk_size = self.config.chunk_size.max(1);
        let limit = chunk_size as u64;
        let offsets = (0..total).step_by(chunk_size);

        stream::iter(offsets)
            .map(|offset| self.fetch_page(version_id, schema, filter, offset, limit))
            .buffer_unordered(self.config.max_in_flight.max(1))
            .try_fold(Accumulator::default(), |mut acc, page| async move {
                if let Some(page) = page {
                    merge_into(&mut acc, page);
                }
                Ok::<_, AggregationError>(acc)
            })
            .await
    }

    async fn fetch_page(
        &self,
        version_id: VersionId,
        schema: &VersionSchema,
        filter: Option<&RowFilter>,
        offset: u64,
        limit: u64,
    ) -> AggregationResult<Option<Accumulator>> {
        let rows = self
            .rows
            .fetch_rows(version_id, offset, limit, filter)
            .await
            .map_err(|source| AggregationError::row_store(version_id, Some(offset), filter, source))?;
        if rows.is_empty() {
            debug!(offset, "empty page");
            return Ok(None);
        }
        debug!(offset, rows = rows.len(), "aggregating page");
        Ok(Some(aggregate_chunk(schema, &rows)))
    }

    async fn cached_entry(&self, version_id: VersionId) -> Option<CacheEntry> {
        match self.cache.get(version_id).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(%version_id, error = %err, "cache read failed, treating as miss");
                None
            }
        }
    }

    async fn store_entry(
        &self,
        version_id: VersionId,
        result: &AggregatedResult,
        accumulator: Accumulator,
    ) {
        let entry = CacheEntry {
            result: result.clone(),
            accumulator,
            computed_at: Utc::now(),
        };
        if let Err(err) = self.cache.upsert(version_id, &entry).await {
            warn!(%version_id, error = %err, "failed to cache aggregation result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::{sample_rows, schema};
    use crate::store::memory::MemoryStore;
    use uuid::Uuid;

    async fn setup(config: AggregationConfig) -> (Arc<MemoryStore>, Aggregator, VersionId) {
        let store = Arc::new(MemoryStore::new());
        let version = Uuid::new_v4();
        store.insert_version(version, schema(), sample_rows()).await;
        let aggregator = Aggregator::with_store(store.clone(), config);
        (store, aggregator, version)
    }

    fn small_chunks() -> AggregationConfig {
        AggregationConfig::default()
            .with_chunk_size(2)
            .with_max_in_flight(3)
    }

    #[tokio::test]
    async fn chunked_run_matches_single_pass() {
        let (_store, aggregator, version) = setup(small_chunks()).await;
        let outcome = aggregator.run_aggregation(version, None).await.unwrap();

        let expected = compute_result(&schema(), &aggregate_chunk(&schema(), &sample_rows()));
        assert_eq!(outcome.result, expected);
        assert!(!outcome.from_cache);
        assert!(outcome.applied_filter.is_none());
    }

    #[tokio::test]
    async fn sequential_and_parallel_scans_agree() {
        let (_a, sequential, version_a) =
            setup(small_chunks().with_max_in_flight(1)).await;
        let (_b, parallel, version_b) = setup(small_chunks().with_max_in_flight(8)).await;

        let one = sequential.run_aggregation(version_a, None).await.unwrap();
        let many = parallel.run_aggregation(version_b, None).await.unwrap();
        assert_eq!(one.result, many.result);
    }

    #[tokio::test]
    async fn second_unfiltered_run_is_served_from_cache() {
        let (store, aggregator, version) = setup(small_chunks()).await;
        let first = aggregator.run_aggregation(version, None).await.unwrap();
        let fetches = store.fetch_calls();
        assert_eq!(fetches, 4);
        assert_eq!(store.upserts(), 1);

        let second = aggregator.run_aggregation(version, None).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.result, first.result);
        assert_eq!(store.fetch_calls(), fetches);

        let entry = store.cached(version).await.unwrap();
        assert_eq!(entry.accumulator, aggregate_chunk(&schema(), &sample_rows()));
    }

    #[tokio::test]
    async fn filtered_runs_are_computed_fresh_and_not_cached() {
        let (store, aggregator, version) = setup(small_chunks()).await;
        let filter = RowFilter::new("Facultad", "Derecho");

        let outcome = aggregator
            .run_aggregation(version, Some(filter.clone()))
            .await
            .unwrap();
        assert_eq!(outcome.applied_filter, Some(filter));
        assert!(!outcome.from_cache);
        assert_eq!(outcome.result.faculties.len(), 1);
        assert_eq!(outcome.result.faculties[0].name, "DERECHO");
        assert_eq!(store.upserts(), 0);
        assert!(store.cached(version).await.is_none());
    }

    #[tokio::test]
    async fn filter_matching_nothing_falls_back_to_cached_result() {
        let (_store, aggregator, version) = setup(small_chunks()).await;
        let unfiltered = aggregator.run_aggregation(version, None).await.unwrap();

        let outcome = aggregator
            .run_aggregation(version, Some(RowFilter::new("Facultad", "Arquitectura")))
            .await
            .unwrap();
        assert!(outcome.from_cache);
        assert!(outcome.filter_dropped());
        assert!(outcome.applied_filter.is_none());
        assert_eq!(outcome.result, unfiltered.result);
    }

    #[tokio::test]
    async fn empty_version_yields_empty_result() {
        let store = Arc::new(MemoryStore::new());
        let version = Uuid::new_v4();
        store.insert_version(version, schema(), Vec::new()).await;
        let aggregator = Aggregator::with_store(store.clone(), small_chunks());

        let outcome = aggregator.run_aggregation(version, None).await.unwrap();
        assert!(outcome.result.faculties.is_empty());
        assert_eq!(outcome.result.global, 0.0);
        assert_eq!(store.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn stored_row_count_skips_counting_and_tolerates_empty_pages() {
        let store = Arc::new(MemoryStore::new());
        let version = Uuid::new_v4();
        let counted = VersionSchema {
            row_count: Some(12),
            ..schema()
        };
        store.insert_version(version, counted, sample_rows()).await;
        let aggregator = Aggregator::with_store(
            store.clone(),
            AggregationConfig::default().with_chunk_size(3),
        );

        let outcome = aggregator.run_aggregation(version, None).await.unwrap();
        assert_eq!(store.count_calls(), 0);
        assert_eq!(store.fetch_calls(), 4);
        let expected = compute_result(&schema(), &aggregate_chunk(&schema(), &sample_rows()));
        assert_eq!(outcome.result, expected);
    }

    #[tokio::test]
    async fn unknown_version_is_schema_not_found() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = Aggregator::with_store(store, AggregationConfig::default());
        let err = aggregator
            .run_aggregation(Uuid::new_v4(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AggregationError::SchemaNotFound { .. }));
    }

    #[tokio::test]
    async fn colliding_criteria_are_rejected() {
        let store = Arc::new(MemoryStore::new());
        let version = Uuid::new_v4();
        let schema = VersionSchema {
            criteria: vec!["1) Calidad".to_string(), "2)  Calidad".to_string()],
            ..schema()
        };
        store.insert_version(version, schema, sample_rows()).await;
        let aggregator = Aggregator::with_store(store, AggregationConfig::default());

        let err = aggregator.run_aggregation(version, None).await.unwrap_err();
        assert!(matches!(err, AggregationError::InvalidSchema { .. }));
    }

    #[tokio::test]
    async fn page_failure_aborts_without_caching() {
        let (store, aggregator, version) = setup(small_chunks()).await;
        store.fail_fetch_at(4).await;

        let err = aggregator.run_aggregation(version, None).await.unwrap_err();
        match err {
            AggregationError::RowStore { offset, filter, .. } => {
                assert_eq!(offset, Some(4));
                assert!(filter.is_none());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.cached(version).await.is_none());

        store.clear_failures().await;
        let retried = aggregator.run_aggregation(version, None).await.unwrap();
        assert!(!retried.from_cache);
    }

    #[tokio::test]
    async fn count_failure_on_filtered_run_drops_filter() {
        let store = Arc::new(MemoryStore::new());
        let version = Uuid::new_v4();
        let counted = VersionSchema {
            row_count: Some(7),
            ..schema()
        };
        store.insert_version(version, counted, sample_rows()).await;
        let aggregator = Aggregator::with_store(store.clone(), small_chunks());
        store.fail_counts().await;

        let outcome = aggregator
            .run_aggregation(version, Some(RowFilter::new("Facultad", "Derecho")))
            .await
            .unwrap();
        assert!(outcome.filter_dropped());
        assert_eq!(outcome.result.faculties.len(), 3);
    }

    #[tokio::test]
    async fn cache_failures_do_not_fail_the_run() {
        let (store, aggregator, version) = setup(small_chunks()).await;
        store.fail_cache_reads().await;
        store.fail_cache_writes().await;

        let outcome = aggregator.run_aggregation(version, None).await.unwrap();
        assert!(!outcome.from_cache);
        assert!(!outcome.result.faculties.is_empty());
        assert_eq!(store.upserts(), 0);
    }

    #[tokio::test]
    async fn refresh_recomputes_from_cached_accumulator() {
        let (store, aggregator, version) = setup(small_chunks()).await;
        let first = aggregator.run_aggregation(version, None).await.unwrap();
        let fetches = store.fetch_calls();

        let refreshed = aggregator.refresh_from_cache(version).await.unwrap();
        assert_eq!(refreshed, first.result);
        assert_eq!(store.fetch_calls(), fetches);
        assert_eq!(store.upserts(), 2);
    }

    #[tokio::test]
    async fn refresh_without_cache_is_a_cache_miss() {
        let (_store, aggregator, version) = setup(small_chunks()).await;
        let err = aggregator.refresh_from_cache(version).await.unwrap_err();
        assert!(matches!(err, AggregationError::CacheMiss { .. }));
    }

    #[tokio::test]
    async fn filter_values_lists_distinct_cells() {
        let (_store, aggregator, version) = setup(small_chunks()).await;
        let values = aggregator.filter_values(version, "Facultad").await.unwrap();
        assert_eq!(values, vec!["Derecho", "INGENIERIA 1", "Ingeniería", "Medicina"]);
    }
}
