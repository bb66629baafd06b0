//! Shared test helpers for engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use icure_logic::{
    EntityDao, EntityWithEncryptionMetadataLogic, ExchangeDataMapPublisher, LogicError,
    LogicResult, SessionInformationProvider,
};
use icure_model::hash::hash_access_control_key;
use icure_model::{
    AccessLevel, BulkSaveResult, EncryptableEntity, EntityShareRequest, ExchangeDataMap, Patient,
    RequestedPermission, SecureDelegation, SecurityMetadata, ShareOrUpdateRequest,
};
use icure_storage::{DocumentStore, ExchangeDataMapStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

pub const HCP: &str = "hcp-1";
pub const PATIENT: &str = "patient-1";

/// Session of a fixed data owner.
pub struct StaticSession {
    pub data_owner_id: String,
    pub aliases: BTreeSet<String>,
    pub access_control_hashes: BTreeSet<String>,
}

impl StaticSession {
    pub fn new(data_owner_id: &str) -> Self {
        Self {
            data_owner_id: data_owner_id.to_string(),
            aliases: BTreeSet::new(),
            access_control_hashes: BTreeSet::new(),
        }
    }

    pub fn with_access_keys(mut self, keys: &[&str]) -> Self {
        self.access_control_hashes = keys.iter().map(|k| key_hash(k)).collect();
        self
    }
}

#[async_trait]
impl SessionInformationProvider for StaticSession {
    async fn get_current_data_owner_id(&self) -> LogicResult<String> {
        Ok(self.data_owner_id.clone())
    }

    async fn get_all_search_keys_if_current_data_owner(
        &self,
        data_owner_id: &str,
    ) -> LogicResult<BTreeSet<String>> {
        if data_owner_id == self.data_owner_id {
            Ok(self.aliases.clone())
        } else {
            Ok(BTreeSet::new())
        }
    }

    async fn get_access_control_key_hashes(&self) -> LogicResult<BTreeSet<String>> {
        Ok(self.access_control_hashes.clone())
    }
}

/// Publisher that always fails.
pub struct FailingPublisher;

#[async_trait]
impl ExchangeDataMapPublisher for FailingPublisher {
    async fn create_or_update_exchange_data_map_batch_by_id(
        &self,
        _batch: BTreeMap<String, BTreeMap<String, String>>,
    ) -> LogicResult<Vec<ExchangeDataMap>> {
        Err(LogicError::Publisher("exchange data map service unavailable".into()))
    }
}

/// Publisher that records every batch it receives.
#[derive(Default)]
pub struct RecordingPublisher {
    pub batches: Mutex<Vec<BTreeMap<String, BTreeMap<String, String>>>>,
}

impl RecordingPublisher {
    pub fn batches(&self) -> Vec<BTreeMap<String, BTreeMap<String, String>>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeDataMapPublisher for RecordingPublisher {
    async fn create_or_update_exchange_data_map_batch_by_id(
        &self,
        batch: BTreeMap<String, BTreeMap<String, String>>,
    ) -> LogicResult<Vec<ExchangeDataMap>> {
        self.batches.lock().unwrap().push(batch);
        Ok(Vec::new())
    }
}

/// DAO wrapper that records every save batch.
pub struct RecordingDao<E> {
    pub inner: DocumentStore<E>,
    pub saved_batches: Mutex<Vec<Vec<String>>>,
}

impl<E> RecordingDao<E> {
    pub fn new(inner: DocumentStore<E>) -> Self {
        Self {
            inner,
            saved_batches: Mutex::new(Vec::new()),
        }
    }

    pub fn saved_batches(&self) -> Vec<Vec<String>> {
        self.saved_batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntityDao<Patient> for RecordingDao<Patient> {
    async fn get_entities(&self, ids: &[String]) -> LogicResult<Vec<Patient>> {
        EntityDao::get_entities(&self.inner, ids).await
    }

    async fn save_bulk(&self, entities: Vec<Patient>) -> LogicResult<Vec<BulkSaveResult<Patient>>> {
        self.saved_batches
            .lock()
            .unwrap()
            .push(entities.iter().map(|e| e.id().to_string()).collect());
        EntityDao::save_bulk(&self.inner, entities).await
    }
}

/// DAO that bumps the stored revision right before saving, so every save of
/// the batch conflicts.
pub struct RacingDao {
    pub inner: DocumentStore<Patient>,
}

#[async_trait]
impl EntityDao<Patient> for RacingDao {
    async fn get_entities(&self, ids: &[String]) -> LogicResult<Vec<Patient>> {
        EntityDao::get_entities(&self.inner, ids).await
    }

    async fn save_bulk(&self, entities: Vec<Patient>) -> LogicResult<Vec<BulkSaveResult<Patient>>> {
        for entity in &entities {
            if let Some(mut current) = self.inner.get(entity.id())? {
                current.encrypted_self = Some("concurrent edit".into());
                self.inner.save_bulk(vec![current])?;
            }
        }
        EntityDao::save_bulk(&self.inner, entities).await
    }
}

pub struct Harness {
    pub store: DocumentStore<Patient>,
    pub exchange_maps: ExchangeDataMapStore,
    pub dao: Arc<RecordingDao<Patient>>,
    pub logic: EntityWithEncryptionMetadataLogic<Patient>,
}

/// Routes engine logs to the test output; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Logic over an in-memory store, acting as `session`.
pub fn harness(session: StaticSession) -> Harness {
    init_tracing();
    let store = DocumentStore::<Patient>::open_in_memory().unwrap();
    let exchange_maps = store.exchange_data_maps();
    let dao = Arc::new(RecordingDao::new(store.clone()));
    let logic = EntityWithEncryptionMetadataLogic::new(
        dao.clone(),
        Arc::new(exchange_maps.clone()),
        Arc::new(session),
    );
    Harness {
        store,
        exchange_maps,
        dao,
        logic,
    }
}

/// Hash of a hex access-control key.
pub fn key_hash(key: &str) -> String {
    hash_access_control_key(key).unwrap()
}

/// Hex access-control key derived from a label.
pub fn key(label: &str) -> String {
    hex::encode(label.as_bytes())
}

pub fn share(key: &str, delegate: &str, permissions: RequestedPermission) -> EntityShareRequest {
    EntityShareRequest::builder([key])
        .explicit_delegator(HCP)
        .explicit_delegate(delegate)
        .secret_ids([format!("secret-for-{delegate}")])
        .encryption_keys([format!("key-for-{delegate}")])
        .requested_permissions(permissions)
        .build()
        .unwrap()
}

pub fn root_share(key: &str) -> EntityShareRequest {
    share(key, HCP, RequestedPermission::Root)
}

pub fn requests(
    items: Vec<(&str, ShareOrUpdateRequest)>,
) -> BTreeMap<String, ShareOrUpdateRequest> {
    items.into_iter().map(|(id, r)| (id.to_string(), r)).collect()
}

/// Patient whose metadata holds a single root delegation of [`HCP`] under
/// `root_key`.
pub fn patient_with_root(id: &str, root_key: &str) -> Patient {
    patient_with_root_granting(id, root_key, AccessLevel::Write)
}

pub fn patient_with_root_granting(id: &str, root_key: &str, permissions: AccessLevel) -> Patient {
    let mut root = SecureDelegation::new(Some(HCP.into()), Some(HCP.into()), permissions);
    root.encryption_keys.insert("root-encryption-key".into());
    Patient::new(id).with_security_metadata(SecurityMetadata::new(BTreeMap::from([(
        key_hash(root_key),
        root,
    )])))
}
