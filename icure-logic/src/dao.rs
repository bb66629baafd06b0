//! Collaborator contracts of the engine, with adapters onto the DuckDB stores.
//!
//! Store calls are synchronous, so the adapters run them on the blocking
//! thread pool.

use crate::error::LogicResult;
use async_trait::async_trait;
use icure_model::{BulkSaveResult, EncryptableEntity, ExchangeDataMap};
use icure_storage::{DocumentStore, ExchangeDataMapStore};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

/// Versioned entity storage.
#[async_trait]
pub trait EntityDao<E>: Send + Sync {
    /// Loads the entities with the given ids; missing ids are skipped.
    async fn get_entities(&self, ids: &[String]) -> LogicResult<Vec<E>>;

    /// Saves each entity independently, one outcome per entity.
    async fn save_bulk(&self, entities: Vec<E>) -> LogicResult<Vec<BulkSaveResult<E>>>;
}

/// Publishes exchange data maps.
#[async_trait]
pub trait ExchangeDataMapPublisher: Send + Sync {
    /// Idempotent upsert keyed by canonical delegation-key hash.
    async fn create_or_update_exchange_data_map_batch_by_id(
        &self,
        batch: BTreeMap<String, BTreeMap<String, String>>,
    ) -> LogicResult<Vec<ExchangeDataMap>>;
}

#[async_trait]
impl<E> EntityDao<E> for DocumentStore<E>
where
    E: EncryptableEntity + Serialize + DeserializeOwned,
{
    async fn get_entities(&self, ids: &[String]) -> LogicResult<Vec<E>> {
        let store = self.clone();
        let ids = ids.to_vec();
        Ok(tokio::task::spawn_blocking(move || store.get_many(&ids)).await??)
    }

    async fn save_bulk(&self, entities: Vec<E>) -> LogicResult<Vec<BulkSaveResult<E>>> {
        let store = self.clone();
        Ok(tokio::task::spawn_blocking(move || store.save_bulk(entities)).await??)
    }
}

#[async_trait]
impl ExchangeDataMapPublisher for ExchangeDataMapStore {
    async fn create_or_update_exchange_data_map_batch_by_id(
        &self,
        batch: BTreeMap<String, BTreeMap<String, String>>,
    ) -> LogicResult<Vec<ExchangeDataMap>> {
        let store = self.clone();
        Ok(tokio::task::spawn_blocking(move || store.create_or_update_batch_by_id(&batch)).await??)
    }
}
