//! Identity of the acting data owner.

use crate::error::LogicResult;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Resolves who is calling and which keys they hold.
#[async_trait]
pub trait SessionInformationProvider: Send + Sync {
    async fn get_current_data_owner_id(&self) -> LogicResult<String>;

    /// Every id the data owner is known under (its own id and aliases), if
    /// `data_owner_id` is the current data owner; empty otherwise.
    async fn get_all_search_keys_if_current_data_owner(
        &self,
        data_owner_id: &str,
    ) -> LogicResult<BTreeSet<String>>;

    /// Hashes of the access-control keys the current data owner presented.
    async fn get_access_control_key_hashes(&self) -> LogicResult<BTreeSet<String>>;
}

/// What the current data owner can use to claim access to a delegation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessContext {
    pub search_keys: BTreeSet<String>,
    pub access_control_hashes: BTreeSet<String>,
}

impl AccessContext {
    pub async fn for_current_session(
        session: &dyn SessionInformationProvider,
    ) -> LogicResult<Self> {
        let data_owner_id = session.get_current_data_owner_id().await?;
        let mut search_keys = session
            .get_all_search_keys_if_current_data_owner(&data_owner_id)
            .await?;
        search_keys.insert(data_owner_id);
        let access_control_hashes = session.get_access_control_key_hashes().await?;
        Ok(Self {
            search_keys,
            access_control_hashes,
        })
    }
}
