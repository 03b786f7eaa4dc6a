//! Collaborators backed by the local ledger database.

use super::{ChainDataProvider, DataSourceError, PriceSource};
use crate::db::Repository;
use crate::domain::{Address, Decimal, Network, PriceRecord, VaultSnapshot};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Vault status read from the `hypervisor_status` table.
#[derive(Clone)]
pub struct StoredChainData {
    repo: Arc<Repository>,
}

impl StoredChainData {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }
}

impl fmt::Debug for StoredChainData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredChainData").finish_non_exhaustive()
    }
}

#[async_trait]
impl ChainDataProvider for StoredChainData {
    async fn vault_snapshot(
        &self,
        hypervisor: &Address,
        block: i64,
    ) -> Result<Option<VaultSnapshot>, DataSourceError> {
        Ok(self.repo.get_vault_snapshot(hypervisor, block).await?)
    }
}

/// Prices read from the `usd_prices` table.
#[derive(Clone)]
pub struct StoredPriceSource {
    repo: Arc<Repository>,
}

impl StoredPriceSource {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }
}

impl fmt::Debug for StoredPriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredPriceSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl PriceSource for StoredPriceSource {
    async fn price(
        &self,
        network: Network,
        token: &Address,
        block: i64,
    ) -> Result<Option<Decimal>, DataSourceError> {
        Ok(self.repo.get_price(network, token, block).await?)
    }

    async fn price_window(
        &self,
        network: Network,
        tokens: &[Address],
        from_block: i64,
        to_block: i64,
    ) -> Result<Vec<PriceRecord>, DataSourceError> {
        Ok(self
            .repo
            .prices_in_window(network, tokens, from_block, to_block)
            .await?)
    }
}
