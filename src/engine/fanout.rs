//! Hypervisor-wide events applied to every shareholder.
//!
//! Each holder's new snapshot depends only on its own prior snapshot and on
//! inputs fixed for the whole event, so holders are processed by a bounded
//! pool of tasks and the results are written together afterwards.

use super::accounting::apply_fee_share;
use super::{allocation_tolerance, enrich, EngineError};
use crate::domain::{AccountSnapshot, Decimal, Operation, TokenPrices, VaultSnapshot};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutKind {
    /// Fees collected by a rebalance or zeroBurn, split by share.
    FeeCollection { token0: Decimal, token1: Decimal },
    /// Periodic valuation with no quantities.
    Report,
}

/// Everything shared by all holders for one event.
#[derive(Debug, Clone)]
pub struct FanoutInputs {
    pub operation: Operation,
    pub kind: FanoutKind,
    pub prices: TokenPrices,
    pub vault: VaultSnapshot,
    pub total_shares: Decimal,
}

impl FanoutInputs {
    /// USD value of the fees collected by the event.
    pub fn collected_usd(&self) -> Decimal {
        match self.kind {
            FanoutKind::FeeCollection { token0, token1 } => {
                token0 * self.prices.token0 + token1 * self.prices.token1
            }
            FanoutKind::Report => Decimal::zero(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FanoutOutcome {
    /// New snapshots, ordered by address.
    pub snapshots: Vec<AccountSnapshot>,
    /// Sum of the per-holder shares used for the split.
    pub share_sum: Decimal,
    /// USD value of the fees handed out.
    pub distributed_usd: Decimal,
}

/// New snapshot for one holder and the share of the event it received.
pub fn allocate(inputs: &FanoutInputs, prior: &AccountSnapshot) -> (AccountSnapshot, Decimal) {
    let user_share = prior
        .shares_qtty
        .checked_div(inputs.total_shares)
        .unwrap_or_default();

    let mut draft = AccountSnapshot::carry_forward(prior, &inputs.operation, &prior.address);
    if let FanoutKind::FeeCollection { token0, token1 } = inputs.kind {
        apply_fee_share(&mut draft, token0, token1, user_share, &inputs.prices);
    }

    let snapshot = enrich(
        draft,
        prior,
        &inputs.prices,
        &inputs.vault,
        inputs.total_shares,
    );
    (snapshot, user_share)
}

/// Allocate `inputs` to every holder using at most `workers` concurrent tasks.
pub async fn fan_out(
    inputs: Arc<FanoutInputs>,
    holders: Vec<AccountSnapshot>,
    workers: usize,
) -> Result<FanoutOutcome, EngineError> {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();

    for prior in holders {
        let inputs = Arc::clone(&inputs);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| EngineError::Worker(e.to_string()))?;
            Ok::<_, EngineError>(allocate(&inputs, &prior))
        });
    }

    let collected_usd = inputs.collected_usd();
    let mut snapshots = Vec::with_capacity(tasks.len());
    let mut share_sum = Decimal::zero();
    let mut distributed_usd = Decimal::zero();
    while let Some(joined) = tasks.join_next().await {
        let (snapshot, user_share) = joined.map_err(|e| EngineError::Worker(e.to_string()))??;
        share_sum += user_share;
        distributed_usd += collected_usd * user_share;
        snapshots.push(snapshot);
    }
    snapshots.sort_by(|a, b| a.address.cmp(&b.address));

    Ok(FanoutOutcome {
        snapshots,
        share_sum,
        distributed_usd,
    })
}

/// Check that the holder shares used for a fee split add up to one.
///
/// Returns `|share_sum - 1|`. Above tolerance it is logged as an error with
/// the unapplied remainder, any other non-zero deviation as a warning. The
/// remainder is never redistributed.
pub fn check_distribution(inputs: &FanoutInputs, outcome: &FanoutOutcome) -> Decimal {
    let deviation = (outcome.share_sum - Decimal::one()).abs();
    if deviation > allocation_tolerance() {
        let collected = inputs.collected_usd();
        error!(
            hypervisor = %inputs.operation.hypervisor,
            block = inputs.operation.block,
            log_index = inputs.operation.log_index,
            share_sum = %outcome.share_sum,
            collected_usd = %collected,
            unapplied_usd = %(collected - outcome.distributed_usd),
            "holder shares do not add up to one"
        );
    } else if !deviation.is_zero() {
        warn!(
            hypervisor = %inputs.operation.hypervisor,
            block = inputs.operation.block,
            deviation = %deviation,
            "fee distribution rounding difference"
        );
    }
    deviation
}
