//! Versioned document store with optimistic concurrency.
//!
//! Documents of every entity type live in one `documents` table keyed by
//! `(entity_type, id)`. The `rev` column is authoritative: a save must carry
//! the revision currently stored, otherwise it fails with a 409 outcome.

use crate::error::{StorageError, StorageResult};
use crate::exchange_store::ExchangeDataMapStore;
use crate::revision::next_revision;
use crate::{SharedConnection, StoreConfig, initialize_schema, lock};
use duckdb::{Connection, params};
use icure_model::{BulkSaveResult, EncryptableEntity};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// HTTP-like code reported for revision conflicts.
pub const CONFLICT_CODE: u16 = 409;

/// DuckDB-backed store for one entity type.
pub struct DocumentStore<E> {
    conn: SharedConnection,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for DocumentStore<E> {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            _entity: PhantomData,
        }
    }
}

impl<E> DocumentStore<E>
where
    E: EncryptableEntity + Serialize + DeserializeOwned,
{
    /// Opens or creates a store at the given path with default limits.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with_config(path, &StoreConfig::default())
    }

    pub fn open_with_config(path: &Path, config: &StoreConfig) -> StorageResult<Self> {
        let conn = crate::open_duckdb_with_wal_recovery(path, config)?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            _entity: PhantomData,
        })
    }

    /// A store for another entity type sharing this store's connection.
    pub fn for_type<F>(&self) -> DocumentStore<F>
    where
        F: EncryptableEntity + Serialize + DeserializeOwned,
    {
        DocumentStore {
            conn: Arc::clone(&self.conn),
            _entity: PhantomData,
        }
    }

    /// The exchange data map store sharing this store's connection.
    pub fn exchange_data_maps(&self) -> ExchangeDataMapStore {
        ExchangeDataMapStore::from_shared(Arc::clone(&self.conn))
    }

    /// Gets a single document by id.
    pub fn get(&self, id: &str) -> StorageResult<Option<E>> {
        let conn = lock(&self.conn)?;
        read_document(&conn, id)
    }

    /// Gets the documents with the given ids, in request order.
    ///
    /// Missing ids are skipped and duplicate ids are returned once.
    pub fn get_many(&self, ids: &[String]) -> StorageResult<Vec<E>> {
        let conn = lock(&self.conn)?;
        let mut seen = HashSet::new();
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            if let Some(entity) = read_document(&conn, id)? {
                found.push(entity);
            }
        }
        Ok(found)
    }

    /// Creates a new document. Fails with [`StorageError::Conflict`] when the
    /// id is taken.
    pub fn create(&self, entity: E) -> StorageResult<E> {
        let id = entity.id().to_string();
        match self.save_bulk(vec![entity.with_rev(None)])?.pop() {
            Some(BulkSaveResult::Success(saved)) => Ok(saved),
            Some(BulkSaveResult::Failure { message, .. }) => {
                Err(StorageError::Conflict(format!("{id}: {message}")))
            }
            None => Err(StorageError::Conflict(id)),
        }
    }

    /// Saves every document independently.
    ///
    /// Returns one outcome per input, in input order. A document whose `rev`
    /// differs from the stored revision (or that has no `rev` while the id
    /// exists) fails with code 409 without affecting the others. Database
    /// errors abort the whole call.
    pub fn save_bulk(&self, entities: Vec<E>) -> StorageResult<Vec<BulkSaveResult<E>>> {
        let conn = lock(&self.conn)?;
        let mut outcomes = Vec::with_capacity(entities.len());
        for entity in entities {
            let stored_rev = read_revision(&conn, E::ENTITY_TYPE, entity.id())?;
            if stored_rev.as_deref() != entity.rev() {
                debug!(
                    "rejecting save of {} {}: stored rev {:?}, provided {:?}",
                    E::ENTITY_TYPE,
                    entity.id(),
                    stored_rev,
                    entity.rev()
                );
                outcomes.push(BulkSaveResult::Failure {
                    entity_id: entity.id().to_string(),
                    code: CONFLICT_CODE,
                    message: "Document update conflict".to_string(),
                });
                continue;
            }

            let body = serde_json::to_vec(&entity.clone().with_rev(None))?;
            let rev = next_revision(stored_rev.as_deref(), &body);
            let saved = entity.with_rev(Some(rev.clone()));
            let data_json = serde_json::to_string(&saved)?;
            conn.execute(
                "INSERT OR REPLACE INTO documents (entity_type, id, rev, data_json) VALUES (?, ?, ?, ?)",
                params![E::ENTITY_TYPE, saved.id(), rev, data_json],
            )?;
            outcomes.push(BulkSaveResult::Success(saved));
        }
        Ok(outcomes)
    }

    /// Number of stored documents of this entity type.
    pub fn count(&self) -> StorageResult<usize> {
        let conn = lock(&self.conn)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE entity_type = ?",
            params![E::ENTITY_TYPE],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn read_revision(conn: &Connection, entity_type: &str, id: &str) -> StorageResult<Option<String>> {
    let result = conn.query_row(
        "SELECT rev FROM documents WHERE entity_type = ? AND id = ?",
        params![entity_type, id],
        |row| row.get::<_, String>(0),
    );
    match result {
        Ok(rev) => Ok(Some(rev)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn read_document<E>(conn: &Connection, id: &str) -> StorageResult<Option<E>>
where
    E: EncryptableEntity + DeserializeOwned,
{
    let result = conn.query_row(
        "SELECT rev, data_json FROM documents WHERE entity_type = ? AND id = ?",
        params![E::ENTITY_TYPE, id],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
    );
    match result {
        Ok((rev, data_json)) => {
            let entity: E = serde_json::from_str(&data_json)?;
            // The rev column wins over whatever the body carries.
            Ok(Some(entity.with_rev(Some(rev))))
        }
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
