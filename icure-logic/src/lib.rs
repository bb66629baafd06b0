//! Secure delegation engine for iCure encrypted entities.
//!
//! Applies bulk share and metadata-update requests to the security metadata
//! of encrypted entities, and guards direct modifications so that security
//! metadata only ever changes through those requests.
//!
//! # Layout
//!
//! - [`request_application`]: pure per-entity pipeline turning requests into
//!   new delegations, updated delegations and rejections
//! - [`helper`]: access checks and direct-modification validation
//! - [`logic`]: [`EntityWithEncryptionMetadataLogic`], which loads, saves and
//!   publishes around the pipeline
//! - [`dao`] and [`session`]: collaborator contracts, with DuckDB adapters

pub mod config;
pub mod dao;
mod error;
pub mod helper;
pub mod logic;
pub mod request_application;
pub mod session;

pub use config::BulkShareConfig;
pub use dao::{EntityDao, ExchangeDataMapPublisher};
pub use error::{LogicError, LogicResult};
pub use logic::{EntityWithEncryptionMetadataLogic, get_exchange_data_maps_to_create};
pub use request_application::{PartialRequestApplication, ValidatedShareRequest, apply_requests};
pub use session::{AccessContext, SessionInformationProvider};
