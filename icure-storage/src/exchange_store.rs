//! Exchange data maps keyed by canonical delegation-key hash.

use crate::error::StorageResult;
use crate::revision::next_revision;
use crate::{SharedConnection, StoreConfig, initialize_schema, lock};
use duckdb::{Connection, params};
use icure_model::ExchangeDataMap;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// DuckDB-backed exchange data map store.
#[derive(Clone)]
pub struct ExchangeDataMapStore {
    conn: SharedConnection,
}

impl ExchangeDataMapStore {
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with_config(path, &StoreConfig::default())
    }

    pub fn open_with_config(path: &Path, config: &StoreConfig) -> StorageResult<Self> {
        let conn = crate::open_duckdb_with_wal_recovery(path, config)?;
        initialize_schema(&conn)?;
        Ok(Self::from_shared(Arc::new(Mutex::new(conn))))
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self::from_shared(Arc::new(Mutex::new(conn))))
    }

    pub(crate) fn from_shared(conn: SharedConnection) -> Self {
        Self { conn }
    }

    pub fn get(&self, id: &str) -> StorageResult<Option<ExchangeDataMap>> {
        let conn = lock(&self.conn)?;
        read_map(&conn, id)
    }

    /// Creates or merges one map per canonical hash.
    ///
    /// Fingerprint entries of the batch are merged into the stored map, the
    /// batch winning on fingerprint collisions. Maps that the batch would not
    /// change are returned as stored, without a new revision, so replaying a
    /// batch is a no-op.
    pub fn create_or_update_batch_by_id(
        &self,
        batch: &BTreeMap<String, BTreeMap<String, String>>,
    ) -> StorageResult<Vec<ExchangeDataMap>> {
        let conn = lock(&self.conn)?;
        let mut results = Vec::with_capacity(batch.len());
        for (id, entries) in batch {
            let existing = read_map(&conn, id)?;
            let mut merged = existing
                .as_ref()
                .map(|m| m.encrypted_exchange_data_ids.clone())
                .unwrap_or_default();
            merged.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));

            let previous_rev = match existing {
                Some(existing) if existing.encrypted_exchange_data_ids == merged => {
                    results.push(existing);
                    continue;
                }
                Some(existing) => existing.rev,
                None => None,
            };
            let mut map = ExchangeDataMap {
                id: id.clone(),
                rev: None,
                encrypted_exchange_data_ids: merged,
            };
            let body = serde_json::to_vec(&map)?;
            let rev = next_revision(previous_rev.as_deref(), &body);
            map.rev = Some(rev.clone());
            conn.execute(
                "INSERT OR REPLACE INTO exchange_data_maps (id, rev, data_json) VALUES (?, ?, ?)",
                params![id, rev, serde_json::to_string(&map)?],
            )?;
            debug!("stored exchange data map {id} at {rev}");
            results.push(map);
        }
        Ok(results)
    }
}

fn read_map(conn: &Connection, id: &str) -> StorageResult<Option<ExchangeDataMap>> {
    match conn.query_row(
        "SELECT rev, data_json FROM exchange_data_maps WHERE id = ?",
        params![id],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
    ) {
        Ok((rev, data_json)) => {
            let mut map: ExchangeDataMap = serde_json::from_str(&data_json)?;
            map.rev = Some(rev);
            Ok(Some(map))
        }
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
