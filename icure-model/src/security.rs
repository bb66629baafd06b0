//! Delegations, permissions and the per-entity security metadata aggregate.

use crate::graph::DirectedGraph;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Access granted by a delegation. `Write` implies `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessLevel {
    Read,
    Write,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessLevel::Read => write!(f, "READ"),
            AccessLevel::Write => write!(f, "WRITE"),
        }
    }
}

/// One grant of access to an entity.
///
/// `secret_ids`, `encryption_keys` and `owning_entity_ids` hold ciphertext
/// produced by the client using the exchange data identified by
/// `exchange_data_id`. The server never decrypts them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecureDelegation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate: Option<String>,
    #[serde(default)]
    pub secret_ids: BTreeSet<String>,
    #[serde(default)]
    pub encryption_keys: BTreeSet<String>,
    #[serde(default)]
    pub owning_entity_ids: BTreeSet<String>,
    /// Hashes of the delegations whose access grants access to this one.
    #[serde(default)]
    pub parent_delegations: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_data_id: Option<String>,
    pub permissions: AccessLevel,
}

/// Who a delegation is addressed to, as seen by access-control logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationIdentity<'a> {
    /// Both parties are known data owners.
    Explicit { delegator: &'a str, delegate: &'a str },
    /// At least one party is hidden: only holders of the access-control key
    /// hashing to `key_hash` can be matched reliably.
    Anonymous {
        key_hash: &'a str,
        delegator: Option<&'a str>,
        delegate: Option<&'a str>,
    },
}

impl<'a> DelegationIdentity<'a> {
    /// Identifiers under which the delegated entity is findable: the explicit
    /// data owners, plus the key hash when the delegation is anonymous.
    pub fn access_identifiers(&self) -> Vec<&'a str> {
        match *self {
            DelegationIdentity::Explicit {
                delegator,
                delegate,
            } => {
                if delegator == delegate {
                    vec![delegate]
                } else {
                    vec![delegator, delegate]
                }
            }
            DelegationIdentity::Anonymous {
                key_hash,
                delegator,
                delegate,
            } => std::iter::once(key_hash)
                .chain(delegator)
                .chain(delegate)
                .collect(),
        }
    }

    /// True when one of the explicit parties is among `data_owner_keys`.
    pub fn involves_any(&self, data_owner_keys: &BTreeSet<String>) -> bool {
        let (delegator, delegate) = match *self {
            DelegationIdentity::Explicit {
                delegator,
                delegate,
            } => (Some(delegator), Some(delegate)),
            DelegationIdentity::Anonymous {
                delegator,
                delegate,
                ..
            } => (delegator, delegate),
        };
        [delegator, delegate]
            .into_iter()
            .flatten()
            .any(|owner| data_owner_keys.contains(owner))
    }
}

impl SecureDelegation {
    /// Builds a delegation with empty encrypted sets and no parents.
    pub fn new(
        delegator: Option<String>,
        delegate: Option<String>,
        permissions: AccessLevel,
    ) -> Self {
        Self {
            delegator,
            delegate,
            secret_ids: BTreeSet::new(),
            encryption_keys: BTreeSet::new(),
            owning_entity_ids: BTreeSet::new(),
            parent_delegations: BTreeSet::new(),
            exchange_data_id: None,
            permissions,
        }
    }

    pub fn identity<'a>(&'a self, key_hash: &'a str) -> DelegationIdentity<'a> {
        match (self.delegator.as_deref(), self.delegate.as_deref()) {
            (Some(delegator), Some(delegate)) => DelegationIdentity::Explicit {
                delegator,
                delegate,
            },
            (delegator, delegate) => DelegationIdentity::Anonymous {
                key_hash,
                delegator,
                delegate,
            },
        }
    }
}

/// Security metadata of one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityMetadata {
    /// Delegations keyed by the hash of their canonical access-control key.
    #[serde(default)]
    pub secure_delegations: BTreeMap<String, SecureDelegation>,
    /// Alternative key hashes mapped to the canonical hash they stand for.
    #[serde(default)]
    pub keys_equivalences: BTreeMap<String, String>,
}

impl SecurityMetadata {
    pub fn new(secure_delegations: BTreeMap<String, SecureDelegation>) -> Self {
        Self {
            secure_delegations,
            keys_equivalences: BTreeMap::new(),
        }
    }

    /// Resolves a hash to the key of an existing delegation, following
    /// equivalences. `None` when nothing matches.
    pub fn canonical_key<'a>(&'a self, hash: &'a str) -> Option<&'a str> {
        if self.secure_delegations.contains_key(hash) {
            return Some(hash);
        }
        self.keys_equivalences
            .get(hash)
            .map(String::as_str)
            .filter(|canonical| self.secure_delegations.contains_key(*canonical))
    }

    /// True when `hash` is already used as a delegation key or an equivalence.
    pub fn is_known_hash(&self, hash: &str) -> bool {
        self.secure_delegations.contains_key(hash) || self.keys_equivalences.contains_key(hash)
    }

    /// The parent relation: each delegation hash points to its parents.
    pub fn parents_graph(&self) -> DirectedGraph<String> {
        DirectedGraph::from_adjacency(
            self.secure_delegations
                .iter()
                .map(|(hash, d)| (hash.clone(), d.parent_delegations.iter().cloned())),
        )
    }

    /// Highest permission among the given delegation hashes, if any exist.
    pub fn max_permission<'a, I>(&self, hashes: I) -> Option<AccessLevel>
    where
        I: IntoIterator<Item = &'a String>,
    {
        hashes
            .into_iter()
            .filter_map(|h| self.secure_delegations.get(h))
            .map(|d| d.permissions)
            .max()
    }

    /// Every identifier under which this entity is findable, per delegation.
    pub fn access_identifiers(&self) -> BTreeSet<&str> {
        self.secure_delegations
            .iter()
            .flat_map(|(hash, d)| d.identity(hash).access_identifiers())
            .collect()
    }
}
