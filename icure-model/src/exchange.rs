//! Exchange data maps: where clients find the exchange data behind a
//! delegation, addressed by the delegation's canonical key hash.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeDataMap {
    /// Canonical delegation-key hash.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Key-pair fingerprint to encrypted exchange-data id.
    #[serde(default)]
    pub encrypted_exchange_data_ids: BTreeMap<String, String>,
}
