//! Application of share and update requests to one entity.
//!
//! [`PartialRequestApplication`] is threaded by value through a fixed
//! pipeline of steps. Each step consumes some of the remaining requests and
//! either applies them to the entity or records a rejection:
//!
//! 1. reject share requests whose keys already address a delegation
//! 2. create the ROOT delegation, if one is requested
//! 3. create the other delegations under the potential parents
//! 4. apply metadata update requests to existing delegations
//!
//! The pipeline is pure: no I/O, no shared state.

use crate::error::{LogicError, LogicResult};
use crate::helper::parents_from_accessible_hashes;
use icure_model::{
    AccessLevel, EncryptableEntity, EntityShareRequest, EntitySharedMetadataUpdateRequest,
    EntryUpdateType, RejectedShareOrMetadataUpdateRequest, RequestedPermission, SecureDelegation,
    SecurityMetadata, ShareOrUpdateRequest,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Outcome of applying a batch of requests to one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedShareRequest<E> {
    pub rejected_requests: BTreeMap<String, RejectedShareOrMetadataUpdateRequest>,
    pub entity_id: String,
    /// Revision of the entity the requests were applied to.
    pub entity_rev: Option<String>,
    /// The updated entity and the ids of the requests applied to it; `None`
    /// when nothing was applied and the entity must not be saved.
    pub entity_with_applied_requests_ids: Option<(E, BTreeSet<String>)>,
}

/// Pipeline state for one entity.
#[derive(Debug, Clone)]
pub struct PartialRequestApplication<E> {
    current_entity: E,
    entity_rev: Option<String>,
    remaining_share_requests: BTreeMap<String, EntityShareRequest>,
    remaining_update_requests: BTreeMap<String, EntitySharedMetadataUpdateRequest>,
    applied_requests_ids: BTreeSet<String>,
    rejected_requests: BTreeMap<String, RejectedShareOrMetadataUpdateRequest>,
    potential_parent_delegations: BTreeSet<String>,
    max_permission_from_parents: AccessLevel,
}

/// Runs the whole pipeline.
///
/// `potential_parent_delegations` must already be restricted to delegations
/// of the entity that the caller can access; `max_permission_from_parents` is
/// the best permission among them.
pub fn apply_requests<E: EncryptableEntity>(
    entity: E,
    requests: &BTreeMap<String, ShareOrUpdateRequest>,
    potential_parent_delegations: BTreeSet<String>,
    max_permission_from_parents: AccessLevel,
) -> LogicResult<ValidatedShareRequest<E>> {
    Ok(PartialRequestApplication::new(
        entity,
        requests,
        potential_parent_delegations,
        max_permission_from_parents,
    )
    .reject_share_requests_for_existing_delegations()
    .create_root_delegations()?
    .create_non_root_delegations()
    .apply_update_requests()
    .into_validated())
}

impl<E: EncryptableEntity> PartialRequestApplication<E> {
    pub fn new(
        entity: E,
        requests: &BTreeMap<String, ShareOrUpdateRequest>,
        potential_parent_delegations: BTreeSet<String>,
        max_permission_from_parents: AccessLevel,
    ) -> Self {
        let mut remaining_share_requests = BTreeMap::new();
        let mut remaining_update_requests = BTreeMap::new();
        for (id, request) in requests {
            match request {
                ShareOrUpdateRequest::Share(share) => {
                    remaining_share_requests.insert(id.clone(), share.clone());
                }
                ShareOrUpdateRequest::Update(update) => {
                    remaining_update_requests.insert(id.clone(), update.clone());
                }
            }
        }
        Self {
            entity_rev: entity.rev().map(String::from),
            current_entity: entity,
            remaining_share_requests,
            remaining_update_requests,
            applied_requests_ids: BTreeSet::new(),
            rejected_requests: BTreeMap::new(),
            potential_parent_delegations,
            max_permission_from_parents,
        }
    }

    fn metadata(&self) -> SecurityMetadata {
        self.current_entity
            .security_metadata()
            .cloned()
            .unwrap_or_default()
    }

    fn reject(
        mut self,
        request_id: String,
        rejection: RejectedShareOrMetadataUpdateRequest,
    ) -> Self {
        debug!(
            "rejected request {request_id} on entity {}: {} {}",
            self.current_entity.id(),
            rejection.code,
            rejection.reason
        );
        self.rejected_requests.insert(request_id, rejection);
        self
    }

    /// Step 1: share requests may not overwrite an existing delegation.
    pub fn reject_share_requests_for_existing_delegations(mut self) -> Self {
        let metadata = self.metadata();
        let (existing, fresh): (BTreeMap<_, _>, BTreeMap<_, _>) =
            std::mem::take(&mut self.remaining_share_requests)
                .into_iter()
                .partition(|(_, request)| {
                    request
                        .access_control_hashes()
                        .iter()
                        .any(|hash| metadata.is_known_hash(hash))
                });
        self.remaining_share_requests = fresh;
        let entity_id = self.current_entity.id().to_string();
        existing.into_keys().fold(self, |state, request_id| {
            state.reject(
                request_id,
                RejectedShareOrMetadataUpdateRequest::bad_request(format!(
                    "There is already a delegation for the provided access control keys on entity {entity_id}: consider modifying the existing delegation instead"
                )),
            )
        })
    }

    /// Step 2: at most one ROOT request per entity.
    ///
    /// More than one is an error of the caller, not a rejectable request.
    pub fn create_root_delegations(mut self) -> LogicResult<Self> {
        let (roots, others): (BTreeMap<_, _>, BTreeMap<_, _>) =
            std::mem::take(&mut self.remaining_share_requests)
                .into_iter()
                .partition(|(_, request)| request.is_root());
        self.remaining_share_requests = others;

        if roots.len() > 1 {
            let ids: Vec<&String> = roots.keys().collect();
            warn!(
                "refusing {} root share requests for entity {}",
                roots.len(),
                self.current_entity.id()
            );
            return Err(LogicError::IllegalState(format!(
                "Multiple root share requests for entity {}: {ids:?}",
                self.current_entity.id()
            )));
        }

        let Some((request_id, request)) = roots.into_iter().next() else {
            return Ok(self);
        };
        let hash = request.canonical_hash().to_string();
        let mut metadata = self.metadata();
        insert_delegation(
            &mut metadata,
            &request,
            delegation_from_request(&request, BTreeSet::new(), AccessLevel::Write),
        );
        self.current_entity = self.current_entity.with_security_metadata(metadata);
        self.potential_parent_delegations.insert(hash);
        self.max_permission_from_parents = AccessLevel::Write;
        self.applied_requests_ids.insert(request_id);
        Ok(self)
    }

    /// Step 3: every other share request becomes a child of the most specific
    /// potential parents.
    pub fn create_non_root_delegations(mut self) -> Self {
        let remaining = std::mem::take(&mut self.remaining_share_requests);
        if remaining.is_empty() {
            return self;
        }
        if self.potential_parent_delegations.is_empty() {
            return remaining.into_keys().fold(self, |state, request_id| {
                state.reject(
                    request_id,
                    RejectedShareOrMetadataUpdateRequest::bad_request(
                        "Share request must indicate valid potential parent delegations or create a new ROOT delegation",
                    ),
                )
            });
        }

        let mut metadata = self.metadata();
        let parents = parents_from_accessible_hashes(&metadata, &self.potential_parent_delegations);
        let mut changed = false;

        for (request_id, request) in remaining {
            if request
                .access_control_hashes()
                .iter()
                .any(|hash| metadata.is_known_hash(hash))
            {
                self = self.reject(
                    request_id,
                    RejectedShareOrMetadataUpdateRequest::bad_request(
                        "Another request of the same batch already creates a delegation for these access control keys",
                    ),
                );
                continue;
            }
            let permissions = match request.requested_permissions {
                RequestedPermission::FullWrite => {
                    if self.max_permission_from_parents < AccessLevel::Write {
                        self = self.reject(
                            request_id,
                            RejectedShareOrMetadataUpdateRequest::forbidden(
                                "Requested write permissions but the potential parent delegations only grant read access",
                            ),
                        );
                        continue;
                    }
                    AccessLevel::Write
                }
                RequestedPermission::MaxWrite => self.max_permission_from_parents,
                RequestedPermission::FullRead | RequestedPermission::Root => AccessLevel::Read,
            };
            insert_delegation(
                &mut metadata,
                &request,
                delegation_from_request(&request, parents.clone(), permissions),
            );
            self.applied_requests_ids.insert(request_id);
            changed = true;
        }

        if changed {
            self.current_entity = self.current_entity.with_security_metadata(metadata);
        }
        self
    }

    /// Step 4: amend the encrypted sets of existing delegations.
    ///
    /// All accepted updates are merged into a single metadata copy. An update
    /// request is applied whole or not at all.
    pub fn apply_update_requests(mut self) -> Self {
        let remaining = std::mem::take(&mut self.remaining_update_requests);
        if remaining.is_empty() {
            return self;
        }
        let mut metadata = self.metadata();
        let mut staged: BTreeMap<String, SecureDelegation> = BTreeMap::new();
        let entity_id = self.current_entity.id().to_string();

        for (request_id, request) in remaining {
            let Some(key) = metadata
                .canonical_key(&request.metadata_access_control_hash)
                .map(String::from)
            else {
                self = self.reject(
                    request_id,
                    RejectedShareOrMetadataUpdateRequest::not_found(format!(
                        "No delegation with hash {} on entity {entity_id}",
                        request.metadata_access_control_hash
                    )),
                );
                continue;
            };
            let Some(current) = staged
                .get(&key)
                .or_else(|| metadata.secure_delegations.get(&key))
            else {
                continue;
            };

            let updated =
                validate_and_apply_update_requests(&current.secret_ids, &request.secret_ids)
                    .zip(validate_and_apply_update_requests(
                        &current.encryption_keys,
                        &request.encryption_keys,
                    ))
                    .zip(validate_and_apply_update_requests(
                        &current.owning_entity_ids,
                        &request.owning_entity_ids,
                    ));
            match updated {
                Some(((secret_ids, encryption_keys), owning_entity_ids)) => {
                    let delegation = SecureDelegation {
                        secret_ids,
                        encryption_keys,
                        owning_entity_ids,
                        ..current.clone()
                    };
                    staged.insert(key, delegation);
                    self.applied_requests_ids.insert(request_id);
                }
                None => {
                    self = self.reject(
                        request_id,
                        RejectedShareOrMetadataUpdateRequest::bad_request(
                            "Update request attempts to create duplicate entries or delete non-existing entries",
                        ),
                    );
                }
            }
        }

        if !staged.is_empty() {
            metadata.secure_delegations.extend(staged);
            self.current_entity = self.current_entity.with_security_metadata(metadata);
        }
        self
    }

    pub fn into_validated(self) -> ValidatedShareRequest<E> {
        let entity_id = self.current_entity.id().to_string();
        let entity_with_applied_requests_ids = if self.applied_requests_ids.is_empty() {
            None
        } else {
            Some((self.current_entity, self.applied_requests_ids))
        };
        ValidatedShareRequest {
            rejected_requests: self.rejected_requests,
            entity_id,
            entity_rev: self.entity_rev,
            entity_with_applied_requests_ids,
        }
    }
}

/// Applies CREATE/DELETE entry updates to an encrypted-value set.
///
/// Returns `None` when an entry to create already exists or an entry to
/// delete does not.
pub fn validate_and_apply_update_requests(
    existing: &BTreeSet<String>,
    updates: &BTreeMap<String, EntryUpdateType>,
) -> Option<BTreeSet<String>> {
    let mut result = existing.clone();
    for (entry, update) in updates {
        let valid = match update {
            EntryUpdateType::Create => result.insert(entry.clone()),
            EntryUpdateType::Delete => result.remove(entry),
        };
        if !valid {
            return None;
        }
    }
    Some(result)
}

fn delegation_from_request(
    request: &EntityShareRequest,
    parent_delegations: BTreeSet<String>,
    permissions: AccessLevel,
) -> SecureDelegation {
    SecureDelegation {
        delegator: request.explicit_delegator.clone(),
        delegate: request.explicit_delegate.clone(),
        secret_ids: request.secret_ids.clone(),
        encryption_keys: request.encryption_keys.clone(),
        owning_entity_ids: request.owning_entity_ids.clone(),
        parent_delegations,
        exchange_data_id: request.exchange_data_id.clone(),
        permissions,
    }
}

fn insert_delegation(
    metadata: &mut SecurityMetadata,
    request: &EntityShareRequest,
    delegation: SecureDelegation,
) {
    let canonical = request.canonical_hash().to_string();
    for equivalent in request.equivalent_hashes() {
        metadata
            .keys_equivalences
            .insert(equivalent.clone(), canonical.clone());
    }
    metadata.secure_delegations.insert(canonical, delegation);
}
