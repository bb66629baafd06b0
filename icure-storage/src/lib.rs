//! DuckDB storage layer for iCure encrypted entities.
//!
//! Reference implementation of the collaborators the delegation engine
//! consumes:
//!
//! - [`DocumentStore`]: versioned documents with CouchDB-style revisions.
//!   Bulk saves report one outcome per document and never abort siblings on a
//!   revision conflict.
//! - [`ExchangeDataMapStore`]: exchange data maps keyed by canonical
//!   delegation-key hash, upserted by merging fingerprint entries.
//!
//! Both stores can share one connection (see [`DocumentStore::for_type`] and
//! [`DocumentStore::exchange_data_maps`]).

mod config;
mod document_store;
mod error;
mod exchange_store;
mod revision;

pub use config::StoreConfig;
pub use document_store::DocumentStore;
pub use error::{StorageError, StorageResult};
pub use exchange_store::ExchangeDataMapStore;
pub use revision::next_revision;

use duckdb::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

pub(crate) type SharedConnection = Arc<Mutex<Connection>>;

pub(crate) fn lock(conn: &SharedConnection) -> StorageResult<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| StorageError::LockPoisoned)
}

/// Open a DuckDB connection with stale WAL recovery and resource limits.
///
/// If the initial open fails and a `.wal` file exists alongside the database,
/// it is removed and the open is retried once.
pub fn open_duckdb_with_wal_recovery(
    path: &Path,
    config: &StoreConfig,
) -> StorageResult<Connection> {
    config.validate()?;
    let conn = match Connection::open(path) {
        Ok(c) => c,
        Err(first_err) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if wal_path.exists() {
                warn!(
                    "DuckDB open failed, removing stale WAL and retrying: {}",
                    wal_path.display()
                );
                if std::fs::remove_file(&wal_path).is_ok() {
                    let c = Connection::open(path)?;
                    apply_resource_limits(&c, config)?;
                    return Ok(c);
                }
            }
            return Err(first_err.into());
        }
    };
    apply_resource_limits(&conn, config)?;
    Ok(conn)
}

fn apply_resource_limits(conn: &Connection, config: &StoreConfig) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{}'; PRAGMA threads={};",
        config.memory_limit.trim(),
        config.threads
    ))?;
    Ok(())
}

pub(crate) fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            entity_type VARCHAR NOT NULL,
            id VARCHAR NOT NULL,
            rev VARCHAR NOT NULL,
            data_json TEXT NOT NULL,
            PRIMARY KEY (entity_type, id)
        );

        CREATE TABLE IF NOT EXISTS exchange_data_maps (
            id VARCHAR PRIMARY KEY,
            rev VARCHAR NOT NULL,
            data_json TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}
