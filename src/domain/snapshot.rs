//! Per-account ledger snapshot and its value groups.

use crate::domain::{Address, Decimal, Operation, Position, Topic};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// USD prices of the two hypervisor tokens at one block.
///
/// Both prices are non-zero when produced by the price resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenPrices {
    pub token0: Decimal,
    pub token1: Decimal,
}

impl TokenPrices {
    pub fn new(token0: Decimal, token1: Decimal) -> Self {
        TokenPrices { token0, token1 }
    }

    /// Value of one token1 expressed in token0.
    pub fn token1_in_token0(&self) -> Decimal {
        self.token1.checked_div(self.token0).unwrap_or_default()
    }

    /// Value of one token0 expressed in token1.
    pub fn token0_in_token1(&self) -> Decimal {
        self.token0.checked_div(self.token1).unwrap_or_default()
    }
}

/// A two-token amount together with its USD value and its value expressed
/// entirely in either token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Valuation {
    pub token0: Decimal,
    pub token1: Decimal,
    pub in_usd: Decimal,
    pub in_token0: Decimal,
    pub in_token1: Decimal,
}

impl Valuation {
    /// Value `token0` and `token1` at `prices`.
    pub fn priced(token0: Decimal, token1: Decimal, prices: &TokenPrices) -> Self {
        Valuation {
            token0,
            token1,
            in_usd: token0 * prices.token0 + token1 * prices.token1,
            in_token0: token0 + token1 * prices.token1_in_token0(),
            in_token1: token1 + token0 * prices.token0_in_token1(),
        }
    }

    /// Every field multiplied by `ratio`.
    pub fn scaled(&self, ratio: Decimal) -> Self {
        Valuation {
            token0: self.token0 * ratio,
            token1: self.token1 * ratio,
            in_usd: self.in_usd * ratio,
            in_token0: self.in_token0 * ratio,
            in_token1: self.in_token1 * ratio,
        }
    }

    pub fn values(&self) -> [Decimal; 5] {
        [
            self.token0,
            self.token1,
            self.in_usd,
            self.in_token0,
            self.in_token1,
        ]
    }

    pub fn from_values(values: [Decimal; 5]) -> Self {
        let [token0, token1, in_usd, in_token0, in_token1] = values;
        Valuation {
            token0,
            token1,
            in_usd,
            in_token0,
            in_token1,
        }
    }
}

impl Add for Valuation {
    type Output = Valuation;

    fn add(self, rhs: Valuation) -> Valuation {
        Valuation {
            token0: self.token0 + rhs.token0,
            token1: self.token1 + rhs.token1,
            in_usd: self.in_usd + rhs.in_usd,
            in_token0: self.in_token0 + rhs.in_token0,
            in_token1: self.in_token1 + rhs.in_token1,
        }
    }
}

impl Sub for Valuation {
    type Output = Valuation;

    fn sub(self, rhs: Valuation) -> Valuation {
        Valuation {
            token0: self.token0 - rhs.token0,
            token1: self.token1 - rhs.token1,
            in_usd: self.in_usd - rhs.in_usd,
            in_token0: self.in_token0 - rhs.in_token0,
            in_token1: self.in_token1 - rhs.in_token1,
        }
    }
}

/// Fee amounts per token plus their USD value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeeAmounts {
    pub token0: Decimal,
    pub token1: Decimal,
    pub in_usd: Decimal,
}

impl FeeAmounts {
    pub fn priced(token0: Decimal, token1: Decimal, prices: &TokenPrices) -> Self {
        FeeAmounts {
            token0,
            token1,
            in_usd: token0 * prices.token0 + token1 * prices.token1,
        }
    }

    pub fn scaled(&self, ratio: Decimal) -> Self {
        FeeAmounts {
            token0: self.token0 * ratio,
            token1: self.token1 * ratio,
            in_usd: self.in_usd * ratio,
        }
    }

    pub fn values(&self) -> [Decimal; 3] {
        [self.token0, self.token1, self.in_usd]
    }

    pub fn from_values(values: [Decimal; 3]) -> Self {
        let [token0, token1, in_usd] = values;
        FeeAmounts {
            token0,
            token1,
            in_usd,
        }
    }
}

impl Add for FeeAmounts {
    type Output = FeeAmounts;

    fn add(self, rhs: FeeAmounts) -> FeeAmounts {
        FeeAmounts {
            token0: self.token0 + rhs.token0,
            token1: self.token1 + rhs.token1,
            in_usd: self.in_usd + rhs.in_usd,
        }
    }
}

impl Sub for FeeAmounts {
    type Output = FeeAmounts;

    fn sub(self, rhs: FeeAmounts) -> FeeAmounts {
        FeeAmounts {
            token0: self.token0 - rhs.token0,
            token1: self.token1 - rhs.token1,
            in_usd: self.in_usd - rhs.in_usd,
        }
    }
}

/// Difference between holding the LP position and holding the initial
/// investment, measured three ways (all in USD).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImpermanentDelta {
    /// Against the USD value invested.
    pub usd: Decimal,
    /// Against the investment held entirely as token0.
    pub token0: Decimal,
    /// Against the investment held entirely as token1.
    pub token1: Decimal,
}

impl ImpermanentDelta {
    pub fn values(&self) -> [Decimal; 3] {
        [self.usd, self.token0, self.token1]
    }

    pub fn from_values(values: [Decimal; 3]) -> Self {
        let [usd, token0, token1] = values;
        ImpermanentDelta { usd, token0, token1 }
    }
}

impl Add for ImpermanentDelta {
    type Output = ImpermanentDelta;

    fn add(self, rhs: ImpermanentDelta) -> ImpermanentDelta {
        ImpermanentDelta {
            usd: self.usd + rhs.usd,
            token0: self.token0 + rhs.token0,
            token1: self.token1 + rhs.token1,
        }
    }
}

/// Full accounting state of one account in one hypervisor, recorded after an
/// operation. Snapshots are append-only and keyed by
/// (hypervisor, address, block, log_index).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub hypervisor: Address,
    pub address: Address,
    pub block: i64,
    pub log_index: i64,
    pub timestamp: i64,
    pub topic: Topic,
    /// Id of the operation that produced this snapshot.
    pub raw_operation: String,

    pub sec_passed: i64,
    pub fees_uncollected_sec_passed: i64,
    pub usd_price_token0: Decimal,
    pub usd_price_token1: Decimal,

    pub shares_qtty: Decimal,
    pub shares_percent: Decimal,

    pub investment: Valuation,
    pub fees_collected: FeeAmounts,
    pub fees_uncollected: FeeAmounts,
    pub fees_owed: FeeAmounts,
    pub divestment_base: Valuation,
    pub divestment_fee: FeeAmounts,
    pub impermanent: ImpermanentDelta,
    pub current_result: Valuation,
    pub closed_investment_return: Valuation,
    pub underlying: Valuation,
    pub last_underlying: Valuation,
    pub tvl: Valuation,
}

impl AccountSnapshot {
    /// The state of an account with no history (block 0).
    pub fn empty(hypervisor: Address, address: Address) -> Self {
        AccountSnapshot {
            hypervisor,
            address,
            block: 0,
            log_index: 0,
            timestamp: 0,
            topic: Topic::Report,
            raw_operation: String::new(),
            sec_passed: 0,
            fees_uncollected_sec_passed: 0,
            usd_price_token0: Decimal::zero(),
            usd_price_token1: Decimal::zero(),
            shares_qtty: Decimal::zero(),
            shares_percent: Decimal::zero(),
            investment: Valuation::default(),
            fees_collected: FeeAmounts::default(),
            fees_uncollected: FeeAmounts::default(),
            fees_owed: FeeAmounts::default(),
            divestment_base: Valuation::default(),
            divestment_fee: FeeAmounts::default(),
            impermanent: ImpermanentDelta::default(),
            current_result: Valuation::default(),
            closed_investment_return: Valuation::default(),
            underlying: Valuation::default(),
            last_underlying: Valuation::default(),
            tvl: Valuation::default(),
        }
    }

    /// Start the next snapshot of `account` from `prior`.
    ///
    /// Accumulators carry over. Position, time, topic, operation id and prices
    /// come from `operation`, and prices are reset until enrichment sets them.
    pub fn carry_forward(prior: &AccountSnapshot, operation: &Operation, account: &Address) -> Self {
        AccountSnapshot {
            hypervisor: operation.hypervisor.clone(),
            address: account.clone(),
            block: operation.block,
            log_index: operation.log_index,
            timestamp: operation.timestamp,
            topic: operation.topic.clone(),
            raw_operation: operation.id.clone(),
            usd_price_token0: Decimal::zero(),
            usd_price_token1: Decimal::zero(),
            ..prior.clone()
        }
    }

    /// Whether this is a recorded snapshot rather than [`AccountSnapshot::empty`].
    pub fn has_history(&self) -> bool {
        self.block != 0
    }

    pub fn position(&self) -> Position {
        Position::new(self.block, self.log_index)
    }

    /// Add every summable field of `other` into `self`.
    ///
    /// Identity, position, time, prices and elapsed-time counters are left
    /// untouched.
    pub fn accumulate(&mut self, other: &AccountSnapshot) {
        self.shares_qtty += other.shares_qtty;
        self.shares_percent += other.shares_percent;
        self.investment = self.investment + other.investment;
        self.fees_collected = self.fees_collected + other.fees_collected;
        self.fees_uncollected = self.fees_uncollected + other.fees_uncollected;
        self.fees_owed = self.fees_owed + other.fees_owed;
        self.divestment_base = self.divestment_base + other.divestment_base;
        self.divestment_fee = self.divestment_fee + other.divestment_fee;
        self.impermanent = self.impermanent + other.impermanent;
        self.current_result = self.current_result + other.current_result;
        self.closed_investment_return =
            self.closed_investment_return + other.closed_investment_return;
        self.underlying = self.underlying + other.underlying;
        self.last_underlying = self.last_underlying + other.last_underlying;
        self.tvl = self.tvl + other.tvl;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn hypervisor() -> Address {
        Address::new("0x00000000000000000000000000000000000000aa")
    }

    fn account() -> Address {
        Address::new("0x00000000000000000000000000000000000000bb")
    }

    #[test]
    fn test_valuation_priced_cross_values() {
        let prices = TokenPrices::new(d("1"), d("1800"));
        let v = Valuation::priced(d("1"), d("2"), &prices);
        assert_eq!(v.in_usd, d("3601"));
        assert_eq!(v.in_token0, d("3601"));
        assert_eq!(v.in_token1, d("2") + d("1") / d("1800"));
    }

    #[test]
    fn test_valuation_scaled_and_sub() {
        let v = Valuation::from_values([d("2"), d("4"), d("6"), d("8"), d("10")]);
        let half = v.scaled(d("0.5"));
        assert_eq!(half.values(), [d("1"), d("2"), d("3"), d("4"), d("5")]);
        assert_eq!((v - half).values(), half.values());
    }

    #[test]
    fn test_carry_forward_keeps_accumulators_and_resets_prices() {
        let mut prior = AccountSnapshot::empty(hypervisor(), account());
        prior.block = 10;
        prior.shares_qtty = d("5");
        prior.sec_passed = 60;
        prior.usd_price_token0 = d("1");
        prior.investment.in_usd = d("100");

        let op = Operation::new(
            "op-20",
            Topic::ZeroBurn,
            hypervisor(),
            Position::new(20, 3),
            1_700_000_000,
        );
        let next = AccountSnapshot::carry_forward(&prior, &op, &account());

        assert_eq!(next.block, 20);
        assert_eq!(next.log_index, 3);
        assert_eq!(next.topic, Topic::ZeroBurn);
        assert_eq!(next.raw_operation, "op-20");
        assert_eq!(next.shares_qtty, d("5"));
        assert_eq!(next.sec_passed, 60);
        assert_eq!(next.investment.in_usd, d("100"));
        assert!(next.usd_price_token0.is_zero());
    }

    #[test]
    fn test_accumulate_sums_values_not_identity() {
        let mut total = AccountSnapshot::empty(hypervisor(), hypervisor());
        let mut a = AccountSnapshot::empty(hypervisor(), account());
        a.shares_qtty = d("1");
        a.shares_percent = d("0.25");
        a.sec_passed = 100;
        a.tvl.in_usd = d("10");
        let mut b = a.clone();
        b.shares_percent = d("0.75");

        total.accumulate(&a);
        total.accumulate(&b);

        assert_eq!(total.shares_qtty, d("2"));
        assert_eq!(total.shares_percent, d("1"));
        assert_eq!(total.tvl.in_usd, d("20"));
        assert_eq!(total.sec_passed, 0);
        assert_eq!(total.address, hypervisor());
    }
}
