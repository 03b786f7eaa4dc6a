//! USD price resolution for the two tokens of a hypervisor.

use super::EngineError;
use crate::datasource::PriceSource;
use crate::domain::{Address, Decimal, HypervisorStatic, Network, TokenPrices};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Resolves token prices from a prefetched window, falling back to the
/// price source per block. A zero price counts as missing.
#[derive(Debug, Clone)]
pub struct PriceResolver {
    network: Network,
    token0: Address,
    token1: Address,
    window: HashMap<(Address, i64), Decimal>,
    source: Arc<dyn PriceSource>,
}

impl PriceResolver {
    pub fn new(hypervisor: &HypervisorStatic, source: Arc<dyn PriceSource>) -> Self {
        Self {
            network: hypervisor.network,
            token0: hypervisor.token0.address.clone(),
            token1: hypervisor.token1.address.clone(),
            window: HashMap::new(),
            source,
        }
    }

    /// Load every known price of both tokens in `[from_block, to_block]`.
    ///
    /// Returns the number of non-zero prices held afterwards.
    pub async fn prefetch(&mut self, from_block: i64, to_block: i64) -> Result<usize, EngineError> {
        let tokens = [self.token0.clone(), self.token1.clone()];
        let records = self
            .source
            .price_window(self.network, &tokens, from_block, to_block)
            .await?;
        for record in records {
            if !record.usd_price.is_zero() {
                self.window.insert((record.token, record.block), record.usd_price);
            }
        }
        debug!(
            network = %self.network,
            from_block,
            to_block,
            prices = self.window.len(),
            "prefetched usd prices"
        );
        Ok(self.window.len())
    }

    /// Non-zero USD price of `token` at `block`.
    pub async fn price(&self, token: &Address, block: i64) -> Result<Decimal, EngineError> {
        if let Some(price) = self.window.get(&(token.clone(), block)) {
            return Ok(*price);
        }

        match self.source.price(self.network, token, block).await? {
            Some(price) if !price.is_zero() => Ok(price),
            _ => Err(EngineError::MissingPrice {
                network: self.network,
                token: token.clone(),
                block,
            }),
        }
    }

    /// Prices of both tokens at `block`, resolved concurrently.
    pub async fn prices_at(&self, block: i64) -> Result<TokenPrices, EngineError> {
        let (token0, token1) =
            futures::future::try_join(self.price(&self.token0, block), self.price(&self.token1, block))
                .await?;
        Ok(TokenPrices::new(token0, token1))
    }
}
