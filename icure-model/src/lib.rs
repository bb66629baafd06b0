//! Secure delegation data model for iCure.
//!
//! Every medical entity that carries encrypted content also carries a
//! [`SecurityMetadata`] aggregate: a map from delegation-key hash to a
//! [`SecureDelegation`], each one granting a data owner (or an anonymous key
//! holder) access to the entity's encrypted secret ids, encryption keys and
//! owning-entity ids.
//!
//! # Layout
//!
//! - [`security`]: delegations, permissions and the per-entity aggregate
//! - [`graph`]: directed graph with memoized reachability, used for the
//!   parent-delegation DAG
//! - [`request`]: share and metadata-update requests submitted in bulk
//! - [`result`]: rejections, bulk-save outcomes and per-entity results
//! - [`entity`]: the [`EncryptableEntity`] contract and concrete entities
//! - [`hash`]: access-control key hashing

pub mod entity;
mod error;
pub mod exchange;
pub mod graph;
pub mod hash;
pub mod request;
pub mod result;
pub mod security;

pub use entity::{Contact, EncryptableEntity, Patient};
pub use error::{ModelError, ModelResult};
pub use exchange::ExchangeDataMap;
pub use graph::DirectedGraph;
pub use request::{
    BulkShareOrUpdateMetadataParams, EntityShareRequest, EntityShareRequestBuilder,
    EntitySharedMetadataUpdateRequest, EntryUpdateType, RequestedPermission,
    ShareEntityRequestDetails, ShareOrUpdateRequest,
};
pub use result::{BulkSaveResult, EntityBulkShareResult, RejectedShareOrMetadataUpdateRequest};
pub use security::{AccessLevel, DelegationIdentity, SecureDelegation, SecurityMetadata};
