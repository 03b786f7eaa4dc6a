//! In-memory collaborators for tests.

use super::{ChainDataProvider, DataSourceError, PriceSource};
use crate::domain::{Address, Decimal, Network, PriceRecord, VaultSnapshot};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Mock chain data returning predefined vault snapshots.
#[derive(Debug, Default)]
pub struct MockChainData {
    vaults: HashMap<(Address, i64), VaultSnapshot>,
    calls: AtomicUsize,
}

impl MockChainData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vault snapshot, keyed by its hypervisor and block.
    pub fn with_vault(mut self, vault: VaultSnapshot) -> Self {
        self.vaults
            .insert((vault.hypervisor.clone(), vault.block), vault);
        self
    }

    pub fn with_vaults(mut self, vaults: Vec<VaultSnapshot>) -> Self {
        for vault in vaults {
            self = self.with_vault(vault);
        }
        self
    }

    /// Number of `vault_snapshot` calls served.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainDataProvider for MockChainData {
    async fn vault_snapshot(
        &self,
        hypervisor: &Address,
        block: i64,
    ) -> Result<Option<VaultSnapshot>, DataSourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vaults.get(&(hypervisor.clone(), block)).cloned())
    }
}

/// Mock price source.
///
/// Prices set per block take precedence over flat prices, which apply to
/// every block.
#[derive(Debug, Clone, Default)]
pub struct MockPriceSource {
    prices: HashMap<(Network, Address, i64), Decimal>,
    flat: HashMap<(Network, Address), Decimal>,
}

impl MockPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, network: Network, token: Address, block: i64, price: Decimal) -> Self {
        self.prices.insert((network, token, block), price);
        self
    }

    pub fn with_flat_price(mut self, network: Network, token: Address, price: Decimal) -> Self {
        self.flat.insert((network, token), price);
        self
    }
}

#[async_trait]
impl PriceSource for MockPriceSource {
    async fn price(
        &self,
        network: Network,
        token: &Address,
        block: i64,
    ) -> Result<Option<Decimal>, DataSourceError> {
        Ok(self
            .prices
            .get(&(network, token.clone(), block))
            .or_else(|| self.flat.get(&(network, token.clone())))
            .copied())
    }

    async fn price_window(
        &self,
        network: Network,
        tokens: &[Address],
        from_block: i64,
        to_block: i64,
    ) -> Result<Vec<PriceRecord>, DataSourceError> {
        let mut records: Vec<PriceRecord> = self
            .prices
            .iter()
            .filter(|((n, token, block), _)| {
                *n == network && tokens.contains(token) && (from_block..=to_block).contains(block)
            })
            .map(|((n, token, block), price)| PriceRecord {
                network: *n,
                block: *block,
                token: token.clone(),
                usd_price: *price,
            })
            .collect();
        records.sort_by(|a, b| (a.block, &a.token).cmp(&(b.block, &b.token)));
        Ok(records)
    }
}
