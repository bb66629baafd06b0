//! Rejections, bulk-save outcomes and per-entity share results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Why a share or update request was not applied.
///
/// `code` follows HTTP status semantics: 400 for invalid requests, 403 for
/// permission ceilings, 404 for missing targets, and the storage layer's code
/// for save failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedShareOrMetadataUpdateRequest {
    pub code: u16,
    /// True when resubmitting the same request may succeed (e.g. after a
    /// revision conflict on save).
    pub retryable: bool,
    pub reason: String,
}

impl RejectedShareOrMetadataUpdateRequest {
    pub fn new(code: u16, retryable: bool, reason: impl Into<String>) -> Self {
        Self {
            code,
            retryable,
            reason: reason.into(),
        }
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(400, false, reason)
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::new(403, false, reason)
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(404, false, reason)
    }
}

/// Outcome of saving one entity of a bulk save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkSaveResult<E> {
    Success(E),
    Failure {
        entity_id: String,
        code: u16,
        message: String,
    },
}

impl<E> BulkSaveResult<E> {
    pub fn is_success(&self) -> bool {
        matches!(self, BulkSaveResult::Success(_))
    }
}

/// Result of a bulk share-or-update call for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityBulkShareResult<E> {
    /// The saved entity, when at least one request was applied and persisted.
    pub updated_entity: Option<E>,
    pub entity_id: String,
    /// Revision of the entity before the call; `None` when it does not exist.
    pub entity_rev: Option<String>,
    pub rejected_requests: BTreeMap<String, RejectedShareOrMetadataUpdateRequest>,
}
