//! Ownership transitions: how deposits, withdrawals and share transfers move
//! shares, investment and collected fees between snapshot drafts.
//!
//! Every function here is pure. Results are drafts that still need
//! [`enrich`](super::enrich).

use super::EngineError;
use crate::domain::{
    AccountSnapshot, Address, Decimal, Operation, OperationAmounts, TokenPrices, Valuation,
};

/// Fraction `part / whole` of an account's holding.
fn holding_ratio(
    part: Decimal,
    whole: Decimal,
    account: &Address,
    operation: &Operation,
) -> Result<Decimal, EngineError> {
    part.checked_div(whole)
        .ok_or_else(|| EngineError::DivisionByZero {
            account: account.clone(),
            block: operation.block,
            log_index: operation.log_index,
        })
}

/// Deposit: the account gains shares and the deposited tokens become
/// investment, valued at the operation's prices.
pub fn apply_deposit(
    prior: &AccountSnapshot,
    operation: &Operation,
    account: &Address,
    amounts: &OperationAmounts,
    prices: &TokenPrices,
) -> AccountSnapshot {
    let mut draft = AccountSnapshot::carry_forward(prior, operation, account);
    draft.shares_qtty += amounts.shares;
    draft.investment = draft.investment + Valuation::priced(amounts.token0, amounts.token1, prices);
    draft
}

/// Withdrawal: investment and collected fees shrink by the fraction of shares
/// burnt. The removed part moves to the divestment accumulators and the gain
/// over it is realised as closed return.
pub fn apply_withdraw(
    prior: &AccountSnapshot,
    operation: &Operation,
    account: &Address,
    amounts: &OperationAmounts,
    prices: &TokenPrices,
) -> Result<AccountSnapshot, EngineError> {
    let ratio = holding_ratio(amounts.shares, prior.shares_qtty, account, operation)?;
    let investment_divested = prior.investment.scaled(ratio);
    let fees_divested = prior.fees_collected.scaled(ratio);
    let withdrawn = Valuation::priced(amounts.token0, amounts.token1, prices);

    let mut draft = AccountSnapshot::carry_forward(prior, operation, account);
    draft.shares_qtty -= amounts.shares;
    draft.investment = draft.investment - investment_divested;
    draft.fees_collected = draft.fees_collected - fees_divested;
    draft.divestment_base = draft.divestment_base + investment_divested;
    draft.divestment_fee = draft.divestment_fee + fees_divested;
    draft.closed_investment_return =
        draft.closed_investment_return + (withdrawn - investment_divested);
    Ok(draft)
}

/// Share transfer: the sender hands over the transferred fraction of its
/// shares, investment and collected fees. Totals across both accounts are
/// unchanged.
pub fn apply_transfer(
    prior_src: &AccountSnapshot,
    prior_dst: &AccountSnapshot,
    operation: &Operation,
    src: &Address,
    dst: &Address,
    shares: Decimal,
) -> Result<(AccountSnapshot, AccountSnapshot), EngineError> {
    let fraction = holding_ratio(shares, prior_src.shares_qtty, src, operation)?;
    let investment_moved = prior_src.investment.scaled(fraction);
    let fees_moved = prior_src.fees_collected.scaled(fraction);

    let mut source = AccountSnapshot::carry_forward(prior_src, operation, src);
    source.shares_qtty -= shares;
    source.investment = source.investment - investment_moved;
    source.fees_collected = source.fees_collected - fees_moved;

    let mut destination = AccountSnapshot::carry_forward(prior_dst, operation, dst);
    destination.shares_qtty += shares;
    destination.investment = destination.investment + investment_moved;
    destination.fees_collected = destination.fees_collected + fees_moved;

    Ok((source, destination))
}

/// The destination of a transfer adopts the source's holding time when it is
/// longer, and its uncollected-fee time when it has none of its own.
pub fn inherit_elapsed(destination: &mut AccountSnapshot, source: &AccountSnapshot) {
    destination.sec_passed = destination.sec_passed.max(source.sec_passed);
    if destination.fees_uncollected_sec_passed == 0 {
        destination.fees_uncollected_sec_passed = source.fees_uncollected_sec_passed;
    }
}

/// Fee collection: the account's share of the collected fees, valued in USD.
pub fn apply_fee_share(
    draft: &mut AccountSnapshot,
    fees_token0: Decimal,
    fees_token1: Decimal,
    user_share: Decimal,
    prices: &TokenPrices,
) {
    draft.fees_collected.token0 += fees_token0 * user_share;
    draft.fees_collected.token1 += fees_token1 * user_share;
    draft.fees_collected.in_usd +=
        (fees_token0 * prices.token0 + fees_token1 * prices.token1) * user_share;
}
