//! Collaborators the ledger engine reads from: vault status and USD prices.

use crate::domain::{Address, Decimal, Network, PriceRecord, VaultSnapshot};
use async_trait::async_trait;
use std::fmt;

pub mod cache;
pub mod fallback;
pub mod http_prices;
pub mod mock;
pub mod stored;

pub use cache::CachedChainData;
pub use fallback::FallbackPriceSource;
pub use http_prices::HttpPriceSource;
pub use mock::{MockChainData, MockPriceSource};
pub use stored::{StoredChainData, StoredPriceSource};

/// Read access to a hypervisor's on-chain status.
#[async_trait]
pub trait ChainDataProvider: Send + Sync + fmt::Debug {
    /// Vault state of `hypervisor` at `block`, scaled by decimals.
    ///
    /// # Returns
    /// `None` when no status is known for that block.
    async fn vault_snapshot(
        &self,
        hypervisor: &Address,
        block: i64,
    ) -> Result<Option<VaultSnapshot>, DataSourceError>;
}

/// Historical USD prices of tokens.
#[async_trait]
pub trait PriceSource: Send + Sync + fmt::Debug {
    /// USD price of `token` on `network` at `block`, if known.
    async fn price(
        &self,
        network: Network,
        token: &Address,
        block: i64,
    ) -> Result<Option<Decimal>, DataSourceError>;

    /// Every known price of `tokens` in `[from_block, to_block]`.
    ///
    /// Sources without bulk access return nothing and are queried per block.
    async fn price_window(
        &self,
        _network: Network,
        _tokens: &[Address],
        _from_block: i64,
        _to_block: i64,
    ) -> Result<Vec<PriceRecord>, DataSourceError> {
        Ok(Vec::new())
    }
}

/// Error type for data source operations.
#[derive(Debug, Clone)]
pub enum DataSourceError {
    /// Network error (e.g., connection timeout, DNS failure)
    NetworkError(String),
    /// HTTP error (e.g., 429 rate limit, 5xx server error)
    HttpError { status: u16, message: String },
    /// Parsing error (invalid JSON or malformed response)
    ParseError(String),
    /// Rate limit exceeded (caller should implement backoff)
    RateLimited,
    /// Local store failure
    Storage(String),
}

impl fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSourceError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            DataSourceError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            DataSourceError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            DataSourceError::RateLimited => write!(f, "Rate limited"),
            DataSourceError::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for DataSourceError {}

impl From<sqlx::Error> for DataSourceError {
    fn from(err: sqlx::Error) -> Self {
        DataSourceError::Storage(err.to_string())
    }
}
