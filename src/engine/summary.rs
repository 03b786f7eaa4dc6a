//! Read-side aggregation over the ledger: hypervisor-wide results, period
//! summaries and the share-percent health check.

use super::allocation_tolerance;
use crate::db::Repository;
use crate::domain::{AccountSnapshot, Address, Cutoff, Decimal, FeeAmounts, Valuation};
use serde::Serialize;
use tracing::{debug, warn};

const SECONDS_PER_DAY: i64 = 86_400;
const DAYS_PER_YEAR: i64 = 365;

/// Sum of account snapshots as one hypervisor-wide snapshot at `block`.
///
/// Prices, timestamp and uncollected-fee time come from the most recent
/// snapshot.
pub fn aggregate(hypervisor: &Address, block: i64, snapshots: &[AccountSnapshot]) -> AccountSnapshot {
    let mut total = AccountSnapshot::empty(hypervisor.clone(), hypervisor.clone());
    total.block = block;
    for snapshot in snapshots {
        if snapshot.timestamp > total.timestamp {
            total.timestamp = snapshot.timestamp;
            total.usd_price_token0 = snapshot.usd_price_token0;
            total.usd_price_token1 = snapshot.usd_price_token1;
            total.fees_uncollected_sec_passed = snapshot.fees_uncollected_sec_passed;
        }
        total.accumulate(snapshot);
    }
    total
}

/// Performance of a hypervisor between two aggregate results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSummary {
    pub date_from: i64,
    pub date_to: i64,
    pub days: Decimal,
    pub block_ini: i64,
    pub block_end: i64,
    /// Underlying value at the start, plus investment added during the period.
    pub ini_investment: Decimal,
    pub end_investment: Decimal,
    pub current_return: Decimal,
    pub current_return_percent: Decimal,
    /// Fees earned in the period, valued at initial prices.
    pub fees_earned: Decimal,
    pub yearly_fees: Decimal,
    pub fee_apr: Decimal,
    /// `None` when compounding overflows.
    pub fee_apy: Option<Decimal>,
    pub price_variation: Decimal,
    pub asset_allocation_variation: Decimal,
}

fn underlying_usd(snapshot: &AccountSnapshot) -> Decimal {
    snapshot.underlying.token0 * snapshot.usd_price_token0
        + snapshot.underlying.token1 * snapshot.usd_price_token1
}

fn all_fees(snapshot: &AccountSnapshot) -> (Decimal, Decimal) {
    let token0 = snapshot.fees_collected.token0
        + snapshot.fees_owed.token0
        + snapshot.fees_uncollected.token0
        + snapshot.divestment_fee.token0;
    let token1 = snapshot.fees_collected.token1
        + snapshot.fees_owed.token1
        + snapshot.fees_uncollected.token1
        + snapshot.divestment_fee.token1;
    (token0, token1)
}

/// `(1 + rate)^days - 1`, or `None` on overflow.
fn compound(rate: Decimal, days: i64) -> Option<Decimal> {
    let base = Decimal::one() + rate;
    let mut acc = Decimal::one();
    for _ in 0..days {
        acc = acc.checked_mul(base)?;
    }
    Some(acc - Decimal::one())
}

/// Compare two aggregate results.
///
/// Returns `None` when no time passed between them or the initial
/// investment is zero.
pub fn compare_results(ini: &AccountSnapshot, end: &AccountSnapshot) -> Option<PeriodSummary> {
    let seconds = end.timestamp - ini.timestamp;
    if seconds <= 0 {
        return None;
    }
    let days = Decimal::from(seconds).checked_div(Decimal::from(SECONDS_PER_DAY))?;

    let ini_investment =
        underlying_usd(ini) + (end.investment.in_usd - ini.investment.in_usd);
    if ini_investment.is_zero() {
        return None;
    }
    let end_investment = underlying_usd(end);

    let (ini_fees0, ini_fees1) = all_fees(ini);
    let (end_fees0, end_fees1) = all_fees(end);
    let fees_earned = (end_fees0 - ini_fees0) * ini.usd_price_token0
        + (end_fees1 - ini_fees1) * ini.usd_price_token1;

    let delta0 = end.usd_price_token0 - ini.usd_price_token0;
    let delta1 = end.usd_price_token1 - ini.usd_price_token1;
    let price_variation = delta0 * ini.underlying.token0 + delta1 * ini.underlying.token1;

    let weight = |amount: Decimal, price: Decimal, total: Decimal| {
        (amount * price).checked_div(total).unwrap_or_default()
    };
    let asset_allocation_variation = (weight(ini.underlying.token0, ini.usd_price_token0, ini_investment)
        - weight(end.underlying.token0, end.usd_price_token0, end_investment))
        * delta0
        + (weight(ini.underlying.token1, ini.usd_price_token1, ini_investment)
            - weight(end.underlying.token1, end.usd_price_token1, end_investment))
            * delta1;

    let daily_fees = fees_earned.checked_div(days)?;
    let daily_rate = daily_fees.checked_div(ini_investment)?;
    let year = Decimal::from(DAYS_PER_YEAR);
    let current_return = end_investment - ini_investment;

    Some(PeriodSummary {
        date_from: ini.timestamp,
        date_to: end.timestamp,
        days,
        block_ini: ini.block,
        block_end: end.block,
        ini_investment,
        end_investment,
        current_return,
        current_return_percent: current_return.checked_div(ini_investment)?,
        fees_earned,
        yearly_fees: daily_fees * year,
        fee_apr: daily_rate * year,
        fee_apy: compound(daily_rate, DAYS_PER_YEAR),
        price_variation,
        asset_allocation_variation,
    })
}

/// Aggregate of every account's latest snapshot up to the end of `block`.
pub async fn hypervisor_result(
    repo: &Repository,
    hypervisor: &Address,
    block: i64,
) -> Result<AccountSnapshot, sqlx::Error> {
    let snapshots = repo
        .last_snapshots_all_accounts(hypervisor, Cutoff::end_of_block(block), false)
        .await?;
    Ok(aggregate(hypervisor, block, &snapshots))
}

/// Summary between the first and last result block whose time falls in
/// `[from_ts, to_ts]`. `None` with fewer than two such blocks.
pub async fn period_summary(
    repo: &Repository,
    hypervisor: &Address,
    from_ts: i64,
    to_ts: i64,
) -> Result<Option<PeriodSummary>, sqlx::Error> {
    let blocks = repo.result_blocks(hypervisor, from_ts, to_ts).await?;
    let (first, last) = match (blocks.first(), blocks.last()) {
        (Some(first), Some(last)) if first != last => (*first, *last),
        _ => {
            debug!(%hypervisor, from_ts, to_ts, "not enough results for a period summary");
            return Ok(None);
        }
    };

    let ini = hypervisor_result(repo, hypervisor, first).await?;
    let end = hypervisor_result(repo, hypervisor, last).await?;
    Ok(compare_results(&ini, &end))
}

/// Collected, owed and uncollected fees of all accounts inside `cutoff`.
pub async fn total_fees(
    repo: &Repository,
    hypervisor: &Address,
    cutoff: Cutoff,
) -> Result<FeeAmounts, sqlx::Error> {
    let snapshots = repo
        .last_snapshots_all_accounts(hypervisor, cutoff, false)
        .await?;
    Ok(snapshots.iter().fold(FeeAmounts::default(), |acc, s| {
        acc + s.fees_collected + s.fees_owed + s.fees_uncollected
    }))
}

/// Sum of the accounts' share of vault TVL inside `cutoff`.
pub async fn total_value_locked(
    repo: &Repository,
    hypervisor: &Address,
    cutoff: Cutoff,
) -> Result<Valuation, sqlx::Error> {
    let snapshots = repo
        .last_snapshots_all_accounts(hypervisor, cutoff, false)
        .await?;
    Ok(snapshots
        .iter()
        .fold(Valuation::default(), |acc, s| acc + s.tvl))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareCheck {
    pub accounts: usize,
    pub share_percent_sum: Decimal,
    /// `|share_percent_sum - 1|`, zero when no account holds shares.
    pub deviation: Decimal,
}

/// Sum the share percentages of every current shareholder. Deviations from
/// one above tolerance are logged, never corrected.
pub async fn share_percent_check(
    repo: &Repository,
    hypervisor: &Address,
    cutoff: Cutoff,
) -> Result<ShareCheck, sqlx::Error> {
    let holders = repo
        .last_snapshots_all_accounts(hypervisor, cutoff, true)
        .await?;
    let share_percent_sum: Decimal = holders.iter().map(|s| s.shares_percent).sum();
    let deviation = if holders.is_empty() {
        Decimal::zero()
    } else {
        (share_percent_sum - Decimal::one()).abs()
    };

    if deviation > allocation_tolerance() {
        warn!(
            %hypervisor,
            accounts = holders.len(),
            share_percent_sum = %share_percent_sum,
            "share percentages of current holders do not add up to one"
        );
    }

    Ok(ShareCheck {
        accounts: holders.len(),
        share_percent_sum,
        deviation,
    })
}
