//! Enrichment: derive the valuation fields of a snapshot draft from the
//! vault status, token prices and total shares at the operation's position.

use crate::domain::{
    AccountSnapshot, Decimal, FeeAmounts, ImpermanentDelta, Topic, TokenPrices, Valuation,
    VaultSnapshot,
};

/// Complete `draft` (already carrying this operation's quantities) against
/// the vault state. `prior` is the account's previous snapshot, or
/// [`AccountSnapshot::empty`] for a new account.
///
/// `total_shares` of zero yields a zero share percentage.
pub fn enrich(
    mut draft: AccountSnapshot,
    prior: &AccountSnapshot,
    prices: &TokenPrices,
    vault: &VaultSnapshot,
    total_shares: Decimal,
) -> AccountSnapshot {
    draft.usd_price_token0 = prices.token0;
    draft.usd_price_token1 = prices.token1;
    draft.last_underlying = prior.underlying;

    let pct = if total_shares.is_zero() {
        Decimal::zero()
    } else {
        draft
            .shares_qtty
            .checked_div(total_shares)
            .unwrap_or_default()
    };
    draft.shares_percent = pct;

    draft.fees_uncollected = FeeAmounts::priced(
        vault.fees_uncollected_token0 * pct,
        vault.fees_uncollected_token1 * pct,
        prices,
    );
    draft.fees_owed = FeeAmounts::priced(
        vault.fees_owed_token0 * pct,
        vault.fees_owed_token1 * pct,
        prices,
    );

    if prior.has_history() {
        let elapsed = draft.timestamp - prior.timestamp;
        // Reports accrue uncollected-fee time, any other topic restarts it.
        if draft.topic == Topic::Report {
            draft.fees_uncollected_sec_passed += elapsed;
        } else {
            draft.fees_uncollected_sec_passed = elapsed;
        }
        draft.sec_passed += elapsed;
    }

    draft.tvl = Valuation::priced(vault.total_token0 * pct, vault.total_token1 * pct, prices);
    draft.underlying = Valuation::priced(
        draft.tvl.token0 + draft.fees_uncollected.token0,
        draft.tvl.token1 + draft.fees_uncollected.token1,
        prices,
    );

    draft.current_result = draft.underlying - draft.investment;
    draft.impermanent = ImpermanentDelta {
        usd: draft.underlying.in_usd - draft.investment.in_usd,
        token0: draft.underlying.in_usd - draft.investment.in_token0 * prices.token0,
        token1: draft.underlying.in_usd - draft.investment.in_token1 * prices.token1,
    };

    draft
}
