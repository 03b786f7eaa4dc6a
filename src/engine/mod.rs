//! Ledger computation: per-operation state transitions, enrichment against
//! vault status and prices, proportional fee distribution and read-side
//! aggregation.
//!
//! `accounting`, `enrichment` and the allocation step of `fanout` are pure.
//! `transition` wires them to the repository and collaborators.

use crate::datasource::DataSourceError;
use crate::domain::{Address, AmountError, Decimal, Network};
use thiserror::Error;

pub mod accounting;
pub mod enrichment;
pub mod fanout;
pub mod prices;
pub mod summary;
pub mod transition;

pub use enrichment::enrich;
pub use fanout::{FanoutInputs, FanoutKind, FanoutOutcome};
pub use prices::PriceResolver;
pub use summary::{PeriodSummary, ShareCheck};
pub use transition::{ApplyOutcome, ReplayState, SkipReason, StatusTransitionEngine};

/// Tolerance on fee distribution and share-percent sums.
pub fn allocation_tolerance() -> Decimal {
    Decimal::new(rust_decimal::Decimal::new(1, 4))
}

/// Fatal errors of a replay run. Snapshots written before the error stay.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no usable usd price for {token} on {network} at block {block}")]
    MissingPrice {
        network: Network,
        token: Address,
        block: i64,
    },
    #[error("no vault status for {hypervisor} at block {block}")]
    MissingVaultSnapshot { hypervisor: Address, block: i64 },
    #[error("topic {0:?} is not implemented")]
    UnimplementedTopic(String),
    #[error("{account} holds no shares before operation at block {block} log {log_index}")]
    DivisionByZero {
        account: Address,
        block: i64,
        log_index: i64,
    },
    #[error("operation {id} is malformed: {reason}")]
    MalformedOperation { id: String, reason: String },
    #[error(transparent)]
    Amount(#[from] AmountError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    DataSource(#[from] DataSourceError),
    #[error("fan-out worker failed: {0}")]
    Worker(String),
}
