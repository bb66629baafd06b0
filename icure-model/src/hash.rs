//! Access-control key hashing.
//!
//! Access-control keys are client-derived secrets sent as hex strings. The
//! server only ever stores and compares their SHA-256 hashes, hex encoded.

use crate::error::{ModelError, ModelResult};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Hashes a single hex-encoded access-control key.
pub fn hash_access_control_key(key: &str) -> ModelResult<String> {
    let bytes = hex::decode(key).map_err(|e| ModelError::InvalidAccessControlKey {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Hashes every key of a set. Fails on the first key that is not valid hex.
pub fn hash_access_control_keys<'a, I>(keys: I) -> ModelResult<BTreeSet<String>>
where
    I: IntoIterator<Item = &'a String>,
{
    keys.into_iter()
        .map(|k| hash_access_control_key(k))
        .collect()
}

/// The canonical hash of a set of hashes: the smallest one.
pub fn canonical_hash(hashes: &BTreeSet<String>) -> Option<&str> {
    hashes.first().map(String::as_str)
}
