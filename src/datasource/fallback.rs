//! Price source chaining a primary source with a fallback.

use super::{DataSourceError, PriceSource};
use crate::domain::{Address, Decimal, Network, PriceRecord};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Asks `primary` first and `fallback` when the primary has no non-zero price.
///
/// A failing primary is logged and skipped; a failing fallback is returned.
#[derive(Debug, Clone)]
pub struct FallbackPriceSource {
    primary: Arc<dyn PriceSource>,
    fallback: Arc<dyn PriceSource>,
}

impl FallbackPriceSource {
    pub fn new(primary: Arc<dyn PriceSource>, fallback: Arc<dyn PriceSource>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl PriceSource for FallbackPriceSource {
    async fn price(
        &self,
        network: Network,
        token: &Address,
        block: i64,
    ) -> Result<Option<Decimal>, DataSourceError> {
        match self.primary.price(network, token, block).await {
            Ok(Some(price)) if !price.is_zero() => return Ok(Some(price)),
            Ok(_) => {}
            Err(e) => warn!(%network, %token, block, error = %e, "primary price source failed"),
        }

        debug!(%network, %token, block, "falling back to secondary price source");
        self.fallback.price(network, token, block).await
    }

    async fn price_window(
        &self,
        network: Network,
        tokens: &[Address],
        from_block: i64,
        to_block: i64,
    ) -> Result<Vec<PriceRecord>, DataSourceError> {
        self.primary
            .price_window(network, tokens, from_block, to_block)
            .await
    }
}
