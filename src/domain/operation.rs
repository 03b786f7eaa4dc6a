//! Operation type: one hypervisor event decoded from chain logs.

use crate::domain::decimal::AmountError;
use crate::domain::{Address, Decimal, Position};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Log index given to synthetic report operations so they sort after every
/// real event of their block.
pub const REPORT_LOG_INDEX: i64 = 999_999;

/// Event kind of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Topic {
    Deposit,
    Withdraw,
    Transfer,
    Rebalance,
    ZeroBurn,
    /// Synthetic periodic valuation, never emitted on chain.
    Report,
    Approval,
    SetFee,
    Unrecognized(String),
}

impl Topic {
    pub fn as_str(&self) -> &str {
        match self {
            Topic::Deposit => "deposit",
            Topic::Withdraw => "withdraw",
            Topic::Transfer => "transfer",
            Topic::Rebalance => "rebalance",
            Topic::ZeroBurn => "zeroBurn",
            Topic::Report => "report",
            Topic::Approval => "approval",
            Topic::SetFee => "setFee",
            Topic::Unrecognized(other) => other,
        }
    }

    pub fn parse(s: &str) -> Topic {
        match s {
            "deposit" => Topic::Deposit,
            "withdraw" => Topic::Withdraw,
            "transfer" => Topic::Transfer,
            "rebalance" => Topic::Rebalance,
            "zeroBurn" => Topic::ZeroBurn,
            "report" => Topic::Report,
            "approval" => Topic::Approval,
            "setFee" => Topic::SetFee,
            other => Topic::Unrecognized(other.to_string()),
        }
    }

    /// Topics whose quantities are fees collected from the pool.
    pub fn collects_fees(&self) -> bool {
        matches!(self, Topic::Rebalance | Topic::ZeroBurn)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.as_str().to_string()
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Topic::parse(&s)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quantities of an operation after decimal scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperationAmounts {
    pub token0: Decimal,
    pub token1: Decimal,
    pub shares: Decimal,
}

/// A hypervisor event as stored in the operations table.
///
/// Quantities keep their raw on-chain integer form; [`Operation::amounts`]
/// applies the decimals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique id, stable across runs.
    pub id: String,
    pub topic: Topic,
    pub hypervisor: Address,
    pub block: i64,
    pub log_index: i64,
    /// Block time in seconds since Unix epoch.
    pub timestamp: i64,
    pub src: Option<Address>,
    pub dst: Option<Address>,
    pub to: Option<Address>,
    pub sender: Option<Address>,
    pub qtty_token0: String,
    pub qtty_token1: String,
    pub shares: String,
    pub decimals_token0: u32,
    pub decimals_token1: u32,
    pub decimals_contract: u32,
}

impl Operation {
    /// Create an operation with zero quantities and no accounts.
    pub fn new(
        id: impl Into<String>,
        topic: Topic,
        hypervisor: Address,
        position: Position,
        timestamp: i64,
    ) -> Self {
        Operation {
            id: id.into(),
            topic,
            hypervisor,
            block: position.block,
            log_index: position.log_index,
            timestamp,
            src: None,
            dst: None,
            to: None,
            sender: None,
            qtty_token0: "0".to_string(),
            qtty_token1: "0".to_string(),
            shares: "0".to_string(),
            decimals_token0: 18,
            decimals_token1: 18,
            decimals_contract: 18,
        }
    }

    /// Synthetic report operation for a hypervisor at `block`.
    ///
    /// The id is derived from hypervisor and block, so rescheduling the same
    /// report on a later run yields the same id.
    pub fn report(hypervisor: Address, block: i64, timestamp: i64) -> Self {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(hypervisor.as_str());
        hasher.update(b":report:");
        hasher.update(block.to_string());
        let id = hex::encode(hasher.finalize());

        Operation::new(
            id,
            Topic::Report,
            hypervisor,
            Position::new(block, REPORT_LOG_INDEX),
            timestamp,
        )
    }

    pub fn with_transfer(mut self, src: Address, dst: Address) -> Self {
        self.src = Some(src);
        self.dst = Some(dst);
        self
    }

    pub fn with_to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    pub fn with_sender(mut self, sender: Address) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Set raw token quantities.
    pub fn with_quantities(mut self, token0: impl Into<String>, token1: impl Into<String>) -> Self {
        self.qtty_token0 = token0.into();
        self.qtty_token1 = token1.into();
        self
    }

    /// Set the raw share quantity.
    pub fn with_shares(mut self, shares: impl Into<String>) -> Self {
        self.shares = shares.into();
        self
    }

    pub fn with_decimals(mut self, token0: u32, token1: u32, contract: u32) -> Self {
        self.decimals_token0 = token0;
        self.decimals_token1 = token1;
        self.decimals_contract = contract;
        self
    }

    pub fn position(&self) -> Position {
        Position::new(self.block, self.log_index)
    }

    /// Scale the raw quantities by their decimals.
    pub fn amounts(&self) -> Result<OperationAmounts, AmountError> {
        Ok(OperationAmounts {
            token0: Decimal::from_raw(&self.qtty_token0, self.decimals_token0)?,
            token1: Decimal::from_raw(&self.qtty_token1, self.decimals_token1)?,
            shares: Decimal::from_raw(&self.shares, self.decimals_contract)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hypervisor() -> Address {
        Address::new("0x00000000000000000000000000000000000000aa")
    }

    #[test]
    fn test_topic_roundtrip() {
        for topic in [
            Topic::Deposit,
            Topic::Withdraw,
            Topic::Transfer,
            Topic::Rebalance,
            Topic::ZeroBurn,
            Topic::Report,
            Topic::Approval,
            Topic::SetFee,
        ] {
            assert_eq!(Topic::parse(topic.as_str()), topic);
        }
        assert_eq!(
            Topic::parse("flashLoan"),
            Topic::Unrecognized("flashLoan".to_string())
        );
        assert_eq!(
            serde_json::to_string(&Topic::ZeroBurn).unwrap(),
            "\"zeroBurn\""
        );
    }

    #[test]
    fn test_report_id_is_deterministic() {
        let a = Operation::report(hypervisor(), 1_000, 1_700_000_000);
        let b = Operation::report(hypervisor(), 1_000, 1_700_000_500);
        let c = Operation::report(hypervisor(), 1_001, 1_700_000_000);

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.id.len(), 64);
        assert_eq!(a.log_index, REPORT_LOG_INDEX);
        assert_eq!(a.topic, Topic::Report);
    }

    #[test]
    fn test_amounts_apply_decimals() {
        let op = Operation::new(
            "op-1",
            Topic::Deposit,
            hypervisor(),
            Position::new(10, 1),
            0,
        )
        .with_quantities("1500000", "2000000000000000000")
        .with_shares("3000000000000000000")
        .with_decimals(6, 18, 18);

        let amounts = op.amounts().unwrap();
        assert_eq!(amounts.token0, Decimal::from_str_canonical("1.5").unwrap());
        assert_eq!(amounts.token1, Decimal::from_str_canonical("2").unwrap());
        assert_eq!(amounts.shares, Decimal::from_str_canonical("3").unwrap());
    }

    #[test]
    fn test_amounts_reject_malformed_raw() {
        let op = Operation::new("op-2", Topic::Deposit, hypervisor(), Position::new(1, 1), 0)
            .with_quantities("12abc", "0");
        assert!(op.amounts().is_err());
    }
}
