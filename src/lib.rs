//! Satisfaction-score aggregation for student survey datasets.
//!
//! Rows of a finalized dataset version are read page by page, reduced to
//! per-criterion vote tallies per faculty and program, and turned into
//! percentages. Unfiltered results are cached together with their tallies.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod score;
pub mod store;
pub mod vote;

pub use config::AggregationConfig;
pub use error::{AggregationError, AggregationResult};
pub use models::{AggregatedResult, AggregationOutcome, RowFilter, VersionId, VersionSchema};
pub use orchestrator::Aggregator;
