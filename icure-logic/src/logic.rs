//! Operations on entities carrying encryption metadata.
//!
//! [`EntityWithEncryptionMetadataLogic`] owns the I/O: it loads entities,
//! hands each one to the request-application pipeline, saves what changed and
//! publishes exchange data maps. Each entity is independent: a rejected
//! request or a failed save never affects sibling entities. Only caller
//! errors (see [`LogicError`]) abort a call.

use crate::config::BulkShareConfig;
use crate::dao::{EntityDao, ExchangeDataMapPublisher};
use crate::error::{LogicError, LogicResult};
use crate::helper::{
    check_valid_entity_change, filter_valid_entity_changes,
    verify_and_apply_share_or_update_request,
};
use crate::request_application::ValidatedShareRequest;
use crate::session::{AccessContext, SessionInformationProvider};
use icure_model::{
    BulkSaveResult, BulkShareOrUpdateMetadataParams, EncryptableEntity, EntityBulkShareResult,
    RejectedShareOrMetadataUpdateRequest, ShareEntityRequestDetails, ShareOrUpdateRequest,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Entity operations for one entity type.
pub struct EntityWithEncryptionMetadataLogic<E> {
    dao: Arc<dyn EntityDao<E>>,
    exchange_data_maps: Arc<dyn ExchangeDataMapPublisher>,
    session: Arc<dyn SessionInformationProvider>,
    config: BulkShareConfig,
}

impl<E: EncryptableEntity> EntityWithEncryptionMetadataLogic<E> {
    pub fn new(
        dao: Arc<dyn EntityDao<E>>,
        exchange_data_maps: Arc<dyn ExchangeDataMapPublisher>,
        session: Arc<dyn SessionInformationProvider>,
    ) -> Self {
        Self {
            dao,
            exchange_data_maps,
            session,
            config: BulkShareConfig::default(),
        }
    }

    pub fn with_config(mut self, config: BulkShareConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &BulkShareConfig {
        &self.config
    }

    pub async fn get_entities(&self, ids: &[String]) -> LogicResult<Vec<E>> {
        self.dao.get_entities(ids).await
    }

    /// Saves direct modifications of existing entities.
    ///
    /// Entities that do not exist or carry a stale revision are skipped, as are
    /// entities whose save fails. Returns the saved entities.
    pub async fn modify_entities(&self, entities: Vec<E>) -> LogicResult<Vec<E>> {
        let ids: Vec<String> = entities.iter().map(|e| e.id().to_string()).collect();
        let current_by_id: HashMap<String, E> = self
            .dao
            .get_entities(&ids)
            .await?
            .into_iter()
            .map(|e| (e.id().to_string(), e))
            .collect();
        let valid = filter_valid_entity_changes(entities, &current_by_id)?;
        if valid.is_empty() {
            return Ok(Vec::new());
        }

        let mut saved = Vec::with_capacity(valid.len());
        for outcome in self.dao.save_bulk(valid).await? {
            match outcome {
                BulkSaveResult::Success(entity) => saved.push(entity),
                BulkSaveResult::Failure {
                    entity_id,
                    code,
                    message,
                } => warn!("failed to save entity {entity_id}: {code} {message}"),
            }
        }
        Ok(saved)
    }

    /// Saves a direct modification of one existing entity.
    ///
    /// Fails with [`LogicError::NotFound`] when the entity does not exist and
    /// with [`LogicError::Conflict`] on a stale revision.
    pub async fn modify_entity(&self, entity: E) -> LogicResult<E> {
        let current = self
            .dao
            .get_entities(&[entity.id().to_string()])
            .await?
            .into_iter()
            .next();
        check_valid_entity_change(&entity, current.as_ref())?;

        match self.dao.save_bulk(vec![entity]).await?.into_iter().next() {
            Some(BulkSaveResult::Success(saved)) => Ok(saved),
            Some(BulkSaveResult::Failure {
                entity_id,
                code,
                message,
            }) => Err(LogicError::Conflict(format!(
                "Could not save entity {entity_id}: {code} {message}"
            ))),
            None => Err(LogicError::IllegalState(
                "Bulk save returned no outcome".to_string(),
            )),
        }
    }

    /// Applies share and metadata-update requests to many entities.
    ///
    /// Results come in this order:
    /// 1. one per saved or failed entity, in save order
    /// 2. one per loaded entity where no request was applied
    /// 3. one per requested entity id that does not exist
    ///
    /// Exchange data maps for the share requests applied to saved entities are
    /// published between steps 1 and 2.
    pub async fn do_bulk_share_or_update_metadata(
        &self,
        params: BulkShareOrUpdateMetadataParams,
    ) -> LogicResult<Vec<EntityBulkShareResult<E>>> {
        let requests_by_entity_id = params.requests_by_entity_id;
        let (requests_by_entity_id, oversized): (BTreeMap<_, _>, BTreeMap<_, _>) =
            requests_by_entity_id
                .into_iter()
                .partition(|(_, details)| {
                    !self
                        .config
                        .exceeds_request_limit(details.requests.len())
                });

        let ids: Vec<String> = requests_by_entity_id.keys().cloned().collect();
        let entities = if ids.is_empty() {
            Vec::new()
        } else {
            self.dao.get_entities(&ids).await?
        };
        let access = AccessContext::for_current_session(self.session.as_ref()).await?;

        let mut validated = Vec::with_capacity(entities.len());
        for entity in entities {
            let Some(details) = requests_by_entity_id.get(entity.id()) else {
                continue;
            };
            validated.push(verify_and_apply_share_or_update_request(
                entity, details, &access,
            )?);
        }

        let mut results = Vec::with_capacity(requests_by_entity_id.len() + oversized.len());
        let mut applied_requests_by_entity_id: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut pending_by_entity_id: HashMap<String, ValidatedShareRequest<E>> = HashMap::new();
        let mut to_save = Vec::new();
        let mut unchanged = Vec::new();
        let mut applied_entity_ids = Vec::new();
        for mut v in validated {
            match v.entity_with_applied_requests_ids.take() {
                Some((entity, applied)) => {
                    applied_entity_ids.push(v.entity_id.clone());
                    applied_requests_by_entity_id.insert(v.entity_id.clone(), applied);
                    to_save.push(entity);
                    pending_by_entity_id.insert(v.entity_id.clone(), v);
                }
                None => unchanged.push(v),
            }
        }

        if !to_save.is_empty() {
            for outcome in self.dao.save_bulk(to_save).await? {
                match outcome {
                    BulkSaveResult::Success(saved) => {
                        let Some(pending) = pending_by_entity_id.remove(saved.id()) else {
                            continue;
                        };
                        results.push(EntityBulkShareResult {
                            entity_id: pending.entity_id,
                            entity_rev: pending.entity_rev,
                            rejected_requests: pending.rejected_requests,
                            updated_entity: Some(saved),
                        });
                    }
                    BulkSaveResult::Failure {
                        entity_id,
                        code,
                        message,
                    } => {
                        let Some(pending) = pending_by_entity_id.remove(&entity_id) else {
                            continue;
                        };
                        warn!("bulk share: failed to save entity {entity_id}: {code} {message}");
                        let rejection = RejectedShareOrMetadataUpdateRequest::new(
                            code,
                            true,
                            format!("Failed to save entity {entity_id}: {message}"),
                        );
                        let rejected_requests = applied_requests_by_entity_id
                            .get(&entity_id)
                            .into_iter()
                            .flatten()
                            .map(|request_id| (request_id.clone(), rejection.clone()))
                            .collect();
                        results.push(EntityBulkShareResult {
                            updated_entity: None,
                            entity_id,
                            entity_rev: pending.entity_rev,
                            rejected_requests,
                        });
                    }
                }
            }
        }

        // Applied requests publish even when their save failed.
        let maps = get_exchange_data_maps_to_create(
            applied_entity_ids.iter().filter_map(|id| {
                applied_requests_by_entity_id
                    .get(id)
                    .map(|applied| (id.as_str(), applied))
            }),
            &requests_by_entity_id,
        );
        self.do_create_exchange_data_map_by_id(maps).await;

        for v in unchanged {
            results.push(EntityBulkShareResult {
                updated_entity: None,
                entity_id: v.entity_id,
                entity_rev: v.entity_rev,
                rejected_requests: v.rejected_requests,
            });
        }

        for (entity_id, details) in oversized {
            let reason = format!(
                "Too many requests for entity {entity_id}: {} exceeds the limit of {}",
                details.requests.len(),
                self.config.max_requests_per_entity
            );
            results.push(rejected_for_all(
                entity_id,
                &details,
                RejectedShareOrMetadataUpdateRequest::bad_request(reason),
            ));
        }

        let found: BTreeSet<String> = results
            .iter()
            .map(|r: &EntityBulkShareResult<E>| r.entity_id.clone())
            .collect();
        for (entity_id, details) in &requests_by_entity_id {
            if found.contains(entity_id) {
                continue;
            }
            results.push(rejected_for_all(
                entity_id.clone(),
                details,
                RejectedShareOrMetadataUpdateRequest::not_found(format!(
                    "There is no entity with id {entity_id}"
                )),
            ));
        }

        info!(
            "bulk share: {} entities requested, {} updated",
            requests_by_entity_id.len(),
            results.iter().filter(|r| r.updated_entity.is_some()).count()
        );
        Ok(results)
    }

    /// Publishes exchange data maps. Failures are logged, never returned.
    async fn do_create_exchange_data_map_by_id(
        &self,
        maps: BTreeMap<String, BTreeMap<String, String>>,
    ) {
        if !self.config.publish_exchange_data_maps {
            return;
        }
        let count = maps.len();
        match self
            .exchange_data_maps
            .create_or_update_exchange_data_map_batch_by_id(maps)
            .await
        {
            Ok(published) => debug!("published {} of {count} exchange data maps", published.len()),
            Err(e) => warn!("failed to publish {count} exchange data maps: {e}"),
        }
    }
}

/// Collects `canonical hash -> encrypted exchange data ids` for every applied
/// share request. Later entities win on hash collisions.
pub fn get_exchange_data_maps_to_create<'a, I>(
    applied_requests: I,
    requests_by_entity_id: &BTreeMap<String, ShareEntityRequestDetails>,
) -> BTreeMap<String, BTreeMap<String, String>>
where
    I: IntoIterator<Item = (&'a str, &'a BTreeSet<String>)>,
{
    applied_requests
        .into_iter()
        .filter_map(|(entity_id, applied)| {
            requests_by_entity_id
                .get(entity_id)
                .map(|details| (details, applied))
        })
        .flat_map(|(details, applied)| {
            details
                .requests
                .iter()
                .filter(|(request_id, _)| applied.contains(*request_id))
                .filter_map(|(_, request)| match request {
                    ShareOrUpdateRequest::Share(share)
                        if !share.encrypted_exchange_data_id.is_empty() =>
                    {
                        Some((
                            share.canonical_hash().to_string(),
                            share.encrypted_exchange_data_id.clone(),
                        ))
                    }
                    _ => None,
                })
        })
        .collect()
}

fn rejected_for_all<E>(
    entity_id: String,
    details: &ShareEntityRequestDetails,
    rejection: RejectedShareOrMetadataUpdateRequest,
) -> EntityBulkShareResult<E> {
    EntityBulkShareResult {
        updated_entity: None,
        entity_id,
        entity_rev: None,
        rejected_requests: details
            .requests
            .keys()
            .map(|request_id| (request_id.clone(), rejection.clone()))
            .collect(),
    }
}
