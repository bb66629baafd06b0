//! Bulk share configuration.

use serde::{Deserialize, Serialize};

/// Configuration of [`crate::EntityWithEncryptionMetadataLogic`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkShareConfig {
    /// Publish exchange data maps for newly created delegations.
    pub publish_exchange_data_maps: bool,

    /// Maximum number of requests per entity in one bulk call. Entities over
    /// the limit have all their requests rejected. 0 = unlimited.
    pub max_requests_per_entity: usize,
}

impl Default for BulkShareConfig {
    fn default() -> Self {
        Self {
            publish_exchange_data_maps: true,
            max_requests_per_entity: 0,
        }
    }
}

impl BulkShareConfig {
    pub(crate) fn exceeds_request_limit(&self, request_count: usize) -> bool {
        self.max_requests_per_entity != 0 && request_count > self.max_requests_per_entity
    }
}
