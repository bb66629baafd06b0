//! Storage configuration.

use serde::{Deserialize, Serialize};

/// Resource limits applied to every DuckDB connection opened by the stores.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// DuckDB `memory_limit` pragma (e.g. `"256MB"`).
    pub memory_limit: String,

    /// DuckDB worker threads.
    pub threads: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            memory_limit: "256MB".to_string(),
            threads: 2,
        }
    }
}

impl StoreConfig {
    /// Checks the values before they are interpolated into pragmas.
    pub fn validate(&self) -> crate::StorageResult<()> {
        let limit = self.memory_limit.trim();
        let digits = limit.trim_end_matches(|c: char| c.is_ascii_alphabetic());
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(crate::StorageError::Config(format!(
                "memory_limit must look like \"256MB\", got {:?}",
                self.memory_limit
            )));
        }
        if self.threads == 0 {
            return Err(crate::StorageError::Config(
                "threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
