use thiserror::Error;

use crate::models::{RowFilter, VersionId};
use crate::store::StoreError;

pub type AggregationResult<T> = Result<T, AggregationError>;

/// Failures that abort an aggregation run.
///
/// A filter that selects nothing and a version without data are not errors;
/// they come back as an unfiltered or empty result.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("no schema registered for version {version_id}")]
    SchemaNotFound { version_id: VersionId },

    #[error("schema for version {version_id} is invalid: {reason}")]
    InvalidSchema { version_id: VersionId, reason: String },

    #[error("row store failed for version {version_id} ({})", describe_position(.offset, .filter))]
    RowStore {
        version_id: VersionId,
        offset: Option<u64>,
        filter: Option<RowFilter>,
        #[source]
        source: StoreError,
    },

    #[error("nothing cached for version {version_id}")]
    CacheMiss { version_id: VersionId },
}

impl AggregationError {
    pub(crate) fn row_store(
        version_id: VersionId,
        offset: Option<u64>,
        filter: Option<&RowFilter>,
        source: StoreError,
    ) -> Self {
        Self::RowStore {
            version_id,
            offset,
            filter: filter.cloned(),
            source,
        }
    }

    /// True for failures worth retrying later with the same inputs.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RowStore {
                source: StoreError::Unavailable(_) | StoreError::Database(_),
                ..
            }
        )
    }
}

fn describe_position(offset: &Option<u64>, filter: &Option<RowFilter>) -> String {
    let position = match offset {
        Some(offset) => format!("fetching page at offset {offset}"),
        None => "counting rows".to_string(),
    };
    match filter {
        Some(filter) => format!("{position}, filter {filter}"),
        None => format!("{position}, unfiltered"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn row_store_error_names_offset_and_filter() {
        let err = AggregationError::row_store(
            Uuid::nil(),
            Some(2000),
            Some(&RowFilter::new("Sede", "Norte")),
            StoreError::Unavailable("connection reset".to_string()),
        );
        let message = err.to_string();
        assert!(message.contains("offset 2000"));
        assert!(message.contains("Sede = \"Norte\""));
        assert!(err.is_transient());
    }

    #[test]
    fn schema_errors_are_not_transient() {
        let err = AggregationError::SchemaNotFound {
            version_id: Uuid::nil(),
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("no schema"));
    }
}
