use serde::{Deserialize, Serialize};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Tuning knobs for the chunked scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Rows fetched per page.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Pages fetched and aggregated concurrently; 1 scans sequentially.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl AggregationConfig {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.chunk_size > 0, "chunk size must be at least 1");
        anyhow::ensure!(self.max_in_flight > 0, "max in-flight chunks must be at least 1");
        Ok(())
    }
}
