//! Per-entity validation shared by the logic operations.

use crate::error::{LogicError, LogicResult};
use crate::request_application::{ValidatedShareRequest, apply_requests};
use crate::session::AccessContext;
use icure_model::{
    AccessLevel, EncryptableEntity, SecurityMetadata, ShareEntityRequestDetails,
};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Validates the requests of one entity and applies those that are valid.
///
/// Potential parents named by the caller are first restricted to delegations
/// of the entity that `access` can reach.
pub fn verify_and_apply_share_or_update_request<E: EncryptableEntity>(
    entity: E,
    details: &ShareEntityRequestDetails,
    access: &AccessContext,
) -> LogicResult<ValidatedShareRequest<E>> {
    let (parents, max_permission) = match entity.security_metadata() {
        Some(metadata) => {
            let parents =
                accessible_delegations(metadata, &details.potential_parent_delegations, access);
            let max_permission = metadata
                .max_permission(&parents)
                .unwrap_or(AccessLevel::Read);
            (parents, max_permission)
        }
        None => (BTreeSet::new(), AccessLevel::Read),
    };
    if parents.len() < details.potential_parent_delegations.len() {
        debug!(
            "entity {}: {} of {} potential parents are accessible",
            entity.id(),
            parents.len(),
            details.potential_parent_delegations.len()
        );
    }
    apply_requests(entity, &details.requests, parents, max_permission)
}

/// The requested delegation hashes that exist on the entity and that the
/// current data owner can access, as canonical keys.
///
/// A delegation is accessible when the data owner presented its key, when
/// the data owner is one of its explicit parties, or when one of its
/// ancestors is accessible.
pub fn accessible_delegations(
    metadata: &SecurityMetadata,
    requested: &BTreeSet<String>,
    access: &AccessContext,
) -> BTreeSet<String> {
    let directly_accessible = |hash: &str| -> bool {
        access.access_control_hashes.contains(hash)
            || metadata
                .keys_equivalences
                .iter()
                .any(|(alt, canonical)| {
                    canonical == hash && access.access_control_hashes.contains(alt)
                })
            || metadata
                .secure_delegations
                .get(hash)
                .is_some_and(|d| d.identity(hash).involves_any(&access.search_keys))
    };
    let graph = metadata.parents_graph();
    requested
        .iter()
        .filter_map(|hash| metadata.canonical_key(hash))
        .filter(|key| {
            directly_accessible(*key)
                || graph
                    .reach_set_excluding_zero_length(&key.to_string())
                    .iter()
                    .any(|ancestor| directly_accessible(ancestor.as_str()))
        })
        .map(String::from)
        .collect()
}

/// The hashes of `accessible` that are not ancestors of another one of them.
///
/// Linking a new delegation to these is enough: the dropped hashes remain
/// reachable through the kept ones.
pub fn parents_from_accessible_hashes(
    metadata: &SecurityMetadata,
    accessible: &BTreeSet<String>,
) -> BTreeSet<String> {
    metadata.parents_graph().most_specific(accessible)
}

/// Checks a direct modification of an entity against its stored version.
///
/// Security metadata can only change through share requests: any difference
/// is an error whatever `throw_error_on_invalid_rev` says. A stale revision is
/// a [`LogicError::Conflict`] when `throw_error_on_invalid_rev` is set and
/// `Ok(false)` otherwise.
pub fn do_validate_entity_change<E: EncryptableEntity>(
    updated: &E,
    current: &E,
    throw_error_on_invalid_rev: bool,
) -> LogicResult<bool> {
    if current.security_metadata().is_some()
        && updated.security_metadata() != current.security_metadata()
    {
        return Err(LogicError::IllegalArgument(format!(
            "Security metadata of entity {} can only be changed through share requests",
            current.id()
        )));
    }
    if updated.rev() != current.rev() {
        if throw_error_on_invalid_rev {
            return Err(LogicError::Conflict(format!(
                "Outdated revision for entity {}: got {:?}, current is {:?}",
                current.id(),
                updated.rev(),
                current.rev()
            )));
        }
        return Ok(false);
    }
    Ok(true)
}

/// Strict single-entity variant of [`do_validate_entity_change`].
pub fn check_valid_entity_change<E: EncryptableEntity>(
    updated: &E,
    current: Option<&E>,
) -> LogicResult<()> {
    let current = current.ok_or_else(|| {
        LogicError::NotFound(format!("No entity with id {}", updated.id()))
    })?;
    do_validate_entity_change(updated, current, true).map(|_| ())
}

/// Keeps the entities that can be saved over their current version.
///
/// Entities with no current version or a stale revision are dropped silently;
/// a security-metadata change still fails the whole call.
pub fn filter_valid_entity_changes<E: EncryptableEntity>(
    updated: Vec<E>,
    current_by_id: &HashMap<String, E>,
) -> LogicResult<Vec<E>> {
    let mut valid = Vec::with_capacity(updated.len());
    for entity in updated {
        let Some(current) = current_by_id.get(entity.id()) else {
            debug!("dropping change to unknown entity {}", entity.id());
            continue;
        };
        if do_validate_entity_change(&entity, current, false)? {
            valid.push(entity);
        } else {
            debug!("dropping stale change to entity {}", entity.id());
        }
    }
    Ok(valid)
}
