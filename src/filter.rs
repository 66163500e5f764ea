use tracing::{debug, warn};

use crate::models::{RowFilter, VersionId};
use crate::store::RowStore;

/// Whether `filter` selects at least one row of the version.
///
/// A failing existence check counts as "no": the run then proceeds unfiltered
/// instead of failing.
pub async fn validate_filter(
    rows: &dyn RowStore,
    version_id: VersionId,
    filter: &RowFilter,
) -> bool {
    if filter.column.trim().is_empty() {
        return false;
    }
    match rows.count_rows(version_id, Some(filter)).await {
        Ok(count) => {
            debug!(%version_id, %filter, count, "filter existence check");
            count > 0
        }
        Err(err) => {
            warn!(%version_id, %filter, error = %err, "filter check failed, ignoring filter");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::{sample_rows, schema};
    use crate::store::memory::MemoryStore;
    use uuid::Uuid;

    async fn store_with_rows() -> (MemoryStore, VersionId) {
        let store = MemoryStore::new();
        let version = Uuid::new_v4();
        store.insert_version(version, schema(), sample_rows()).await;
        (store, version)
    }

    #[tokio::test]
    async fn accepts_filter_that_matches_rows() {
        let (store, version) = store_with_rows().await;
        let filter = RowFilter::new("Facultad", "Derecho");
        assert!(validate_filter(&store, version, &filter).await);
    }

    #[tokio::test]
    async fn rejects_filter_that_matches_nothing() {
        let (store, version) = store_with_rows().await;
        let filter = RowFilter::new("Facultad", "Arquitectura");
        assert!(!validate_filter(&store, version, &filter).await);

        let blank = RowFilter::new("  ", "Derecho");
        assert!(!validate_filter(&store, version, &blank).await);
    }

    #[tokio::test]
    async fn store_failure_fails_closed() {
        let (store, version) = store_with_rows().await;
        store.fail_counts().await;
        let filter = RowFilter::new("Facultad", "Derecho");
        assert!(!validate_filter(&store, version, &filter).await);
    }
}
