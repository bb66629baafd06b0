//! Share and metadata-update requests.
//!
//! A bulk call carries, per entity id, a map of request id to either an
//! [`EntityShareRequest`] (create a new delegation) or an
//! [`EntitySharedMetadataUpdateRequest`] (amend the encrypted sets of an
//! existing one).

use crate::error::{ModelError, ModelResult};
use crate::hash::{canonical_hash, hash_access_control_keys};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Permissions requested for a new delegation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestedPermission {
    /// Read access only.
    #[default]
    FullRead,
    /// The best permission the parent delegations allow.
    MaxWrite,
    /// Write access; the parents must grant write access too.
    FullWrite,
    /// A self-delegation with write access and no parents, anchoring the
    /// delegation graph of the entity.
    Root,
}

/// Request to create a new delegation on an entity.
///
/// Built with [`EntityShareRequest::builder`] or deserialized; both paths
/// validate the access-control keys and compute their hashes once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EntityShareRequestDto", rename_all = "camelCase")]
pub struct EntityShareRequest {
    access_control_keys: BTreeSet<String>,
    #[serde(skip_serializing)]
    access_control_hashes: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explicit_delegator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explicit_delegate: Option<String>,
    pub secret_ids: BTreeSet<String>,
    pub encryption_keys: BTreeSet<String>,
    pub owning_entity_ids: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_data_id: Option<String>,
    /// Key-pair fingerprint to encrypted exchange-data id, published in the
    /// exchange data map of the canonical hash.
    pub encrypted_exchange_data_id: BTreeMap<String, String>,
    pub requested_permissions: RequestedPermission,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityShareRequestDto {
    access_control_keys: BTreeSet<String>,
    #[serde(default)]
    explicit_delegator: Option<String>,
    #[serde(default)]
    explicit_delegate: Option<String>,
    #[serde(default)]
    secret_ids: BTreeSet<String>,
    #[serde(default)]
    encryption_keys: BTreeSet<String>,
    #[serde(default)]
    owning_entity_ids: BTreeSet<String>,
    #[serde(default)]
    exchange_data_id: Option<String>,
    #[serde(default)]
    encrypted_exchange_data_id: BTreeMap<String, String>,
    #[serde(default)]
    requested_permissions: RequestedPermission,
}

impl TryFrom<EntityShareRequestDto> for EntityShareRequest {
    type Error = ModelError;

    fn try_from(dto: EntityShareRequestDto) -> ModelResult<Self> {
        let mut builder = EntityShareRequest::builder(dto.access_control_keys)
            .secret_ids(dto.secret_ids)
            .encryption_keys(dto.encryption_keys)
            .owning_entity_ids(dto.owning_entity_ids)
            .encrypted_exchange_data_id(dto.encrypted_exchange_data_id)
            .requested_permissions(dto.requested_permissions);
        builder.explicit_delegator = dto.explicit_delegator;
        builder.explicit_delegate = dto.explicit_delegate;
        builder.exchange_data_id = dto.exchange_data_id;
        builder.build()
    }
}

impl EntityShareRequest {
    pub fn builder<I, S>(access_control_keys: I) -> EntityShareRequestBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EntityShareRequestBuilder {
            access_control_keys: access_control_keys.into_iter().map(Into::into).collect(),
            explicit_delegator: None,
            explicit_delegate: None,
            secret_ids: BTreeSet::new(),
            encryption_keys: BTreeSet::new(),
            owning_entity_ids: BTreeSet::new(),
            exchange_data_id: None,
            encrypted_exchange_data_id: BTreeMap::new(),
            requested_permissions: RequestedPermission::default(),
        }
    }

    pub fn access_control_keys(&self) -> &BTreeSet<String> {
        &self.access_control_keys
    }

    /// SHA-256 hashes of every access-control key.
    pub fn access_control_hashes(&self) -> &BTreeSet<String> {
        &self.access_control_hashes
    }

    /// The smallest access-control hash: the key of the delegation this
    /// request creates.
    pub fn canonical_hash(&self) -> &str {
        // The builder rejects empty key sets, so there is always a first hash.
        canonical_hash(&self.access_control_hashes).unwrap_or_default()
    }

    /// Hashes other than the canonical one, recorded as key equivalences.
    pub fn equivalent_hashes(&self) -> impl Iterator<Item = &String> {
        self.access_control_hashes.iter().skip(1)
    }

    pub fn is_root(&self) -> bool {
        self.requested_permissions == RequestedPermission::Root
    }
}

/// Builder for [`EntityShareRequest`].
#[derive(Debug, Clone)]
pub struct EntityShareRequestBuilder {
    access_control_keys: BTreeSet<String>,
    pub explicit_delegator: Option<String>,
    pub explicit_delegate: Option<String>,
    secret_ids: BTreeSet<String>,
    encryption_keys: BTreeSet<String>,
    owning_entity_ids: BTreeSet<String>,
    pub exchange_data_id: Option<String>,
    encrypted_exchange_data_id: BTreeMap<String, String>,
    requested_permissions: RequestedPermission,
}

impl EntityShareRequestBuilder {
    pub fn explicit_delegator(mut self, delegator: impl Into<String>) -> Self {
        self.explicit_delegator = Some(delegator.into());
        self
    }

    pub fn explicit_delegate(mut self, delegate: impl Into<String>) -> Self {
        self.explicit_delegate = Some(delegate.into());
        self
    }

    pub fn secret_ids<I: IntoIterator<Item = String>>(mut self, ids: I) -> Self {
        self.secret_ids = ids.into_iter().collect();
        self
    }

    pub fn encryption_keys<I: IntoIterator<Item = String>>(mut self, keys: I) -> Self {
        self.encryption_keys = keys.into_iter().collect();
        self
    }

    pub fn owning_entity_ids<I: IntoIterator<Item = String>>(mut self, ids: I) -> Self {
        self.owning_entity_ids = ids.into_iter().collect();
        self
    }

    pub fn exchange_data_id(mut self, id: impl Into<String>) -> Self {
        self.exchange_data_id = Some(id.into());
        self
    }

    pub fn encrypted_exchange_data_id<I: IntoIterator<Item = (String, String)>>(
        mut self,
        by_fingerprint: I,
    ) -> Self {
        self.encrypted_exchange_data_id = by_fingerprint.into_iter().collect();
        self
    }

    pub fn requested_permissions(mut self, permissions: RequestedPermission) -> Self {
        self.requested_permissions = permissions;
        self
    }

    pub fn build(self) -> ModelResult<EntityShareRequest> {
        if self.access_control_keys.is_empty() {
            return Err(ModelError::MissingAccessControlKeys);
        }
        if self.requested_permissions == RequestedPermission::Root {
            if let (Some(delegator), Some(delegate)) =
                (&self.explicit_delegator, &self.explicit_delegate)
            {
                if delegator != delegate {
                    return Err(ModelError::InvalidRootDelegation {
                        delegator: delegator.clone(),
                        delegate: delegate.clone(),
                    });
                }
            }
        }
        let access_control_hashes = hash_access_control_keys(&self.access_control_keys)?;
        Ok(EntityShareRequest {
            access_control_keys: self.access_control_keys,
            access_control_hashes,
            explicit_delegator: self.explicit_delegator,
            explicit_delegate: self.explicit_delegate,
            secret_ids: self.secret_ids,
            encryption_keys: self.encryption_keys,
            owning_entity_ids: self.owning_entity_ids,
            exchange_data_id: self.exchange_data_id,
            encrypted_exchange_data_id: self.encrypted_exchange_data_id,
            requested_permissions: self.requested_permissions,
        })
    }
}

/// Operation requested on one encrypted entry of a delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryUpdateType {
    Create,
    Delete,
}

/// Request to amend the encrypted sets of an existing delegation.
///
/// Never changes delegator, delegate, permissions or parents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySharedMetadataUpdateRequest {
    pub metadata_access_control_hash: String,
    #[serde(default)]
    pub secret_ids: BTreeMap<String, EntryUpdateType>,
    #[serde(default)]
    pub encryption_keys: BTreeMap<String, EntryUpdateType>,
    #[serde(default)]
    pub owning_entity_ids: BTreeMap<String, EntryUpdateType>,
}

impl EntitySharedMetadataUpdateRequest {
    pub fn new(metadata_access_control_hash: impl Into<String>) -> Self {
        Self {
            metadata_access_control_hash: metadata_access_control_hash.into(),
            ..Self::default()
        }
    }
}

/// A request of a bulk share-or-update call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ShareOrUpdateRequest {
    Share(EntityShareRequest),
    Update(EntitySharedMetadataUpdateRequest),
}

impl From<EntityShareRequest> for ShareOrUpdateRequest {
    fn from(request: EntityShareRequest) -> Self {
        ShareOrUpdateRequest::Share(request)
    }
}

impl From<EntitySharedMetadataUpdateRequest> for ShareOrUpdateRequest {
    fn from(request: EntitySharedMetadataUpdateRequest) -> Self {
        ShareOrUpdateRequest::Update(request)
    }
}

/// All requests targeting one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareEntityRequestDetails {
    /// Requests keyed by a caller-chosen request id.
    pub requests: BTreeMap<String, ShareOrUpdateRequest>,
    /// Delegation hashes the caller can access and proposes as parents of the
    /// new delegations.
    #[serde(default)]
    pub potential_parent_delegations: BTreeSet<String>,
}

impl ShareEntityRequestDetails {
    pub fn new(requests: BTreeMap<String, ShareOrUpdateRequest>) -> Self {
        Self {
            requests,
            potential_parent_delegations: BTreeSet::new(),
        }
    }

    pub fn with_potential_parents<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.potential_parent_delegations = parents.into_iter().map(Into::into).collect();
        self
    }
}

/// Parameters of a bulk share-or-update call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkShareOrUpdateMetadataParams {
    pub requests_by_entity_id: BTreeMap<String, ShareEntityRequestDetails>,
}
