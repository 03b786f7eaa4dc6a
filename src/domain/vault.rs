//! Hypervisor static data and per-block vault status.

use crate::domain::{Address, Decimal, Network, PoolKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub decimals: u32,
}

/// Immutable description of a hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HypervisorStatic {
    pub address: Address,
    pub network: Network,
    pub pool_kind: PoolKind,
    pub symbol: String,
    pub token0: TokenInfo,
    pub token1: TokenInfo,
    /// Decimals of the share token.
    pub decimals: u32,
}

/// Vault state at one block, already scaled by token decimals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultSnapshot {
    pub hypervisor: Address,
    pub block: i64,
    pub timestamp: i64,
    pub total_supply: Decimal,
    pub total_token0: Decimal,
    pub total_token1: Decimal,
    pub fees_uncollected_token0: Decimal,
    pub fees_uncollected_token1: Decimal,
    pub fees_owed_token0: Decimal,
    pub fees_owed_token1: Decimal,
}

/// One stored USD price observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub network: Network,
    pub block: i64,
    pub token: Address,
    pub usd_price: Decimal,
}
