//! Domain primitives: Address, Network, PoolKind.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// EVM address, always held in lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address: {0:?}")]
pub struct AddressParseError(pub String);

impl Address {
    /// Create an Address from a string, normalising to lowercase.
    pub fn new(addr: impl Into<String>) -> Self {
        Address(addr.into().to_ascii_lowercase())
    }

    /// The zero address (mint source / burn destination).
    pub fn zero() -> Self {
        Address(ZERO_ADDRESS.to_string())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == ZERO_ADDRESS
    }

    /// Get the address as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| AddressParseError(s.to_string()))?;
        if hex_part.len() != 40 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AddressParseError(s.to_string()));
        }
        Ok(Address::new(format!("0x{hex_part}")))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chains a hypervisor can be deployed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    Ethereum,
    Polygon,
    Optimism,
    Arbitrum,
    Celo,
    Bsc,
    PolygonZkevm,
    Avalanche,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Ethereum => "ethereum",
            Network::Polygon => "polygon",
            Network::Optimism => "optimism",
            Network::Arbitrum => "arbitrum",
            Network::Celo => "celo",
            Network::Bsc => "bsc",
            Network::PolygonZkevm => "polygon_zkevm",
            Network::Avalanche => "avalanche",
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ethereum" => Ok(Network::Ethereum),
            "polygon" => Ok(Network::Polygon),
            "optimism" => Ok(Network::Optimism),
            "arbitrum" => Ok(Network::Arbitrum),
            "celo" => Ok(Network::Celo),
            "bsc" | "binance" => Ok(Network::Bsc),
            "polygon_zkevm" => Ok(Network::PolygonZkevm),
            "avalanche" => Ok(Network::Avalanche),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concentrated-liquidity DEX family backing a hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    UniswapV3,
    AlgebraV3,
    Quickswap,
    Thena,
    Camelot,
}

impl PoolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolKind::UniswapV3 => "uniswapv3",
            PoolKind::AlgebraV3 => "algebrav3",
            PoolKind::Quickswap => "quickswap",
            PoolKind::Thena => "thena",
            PoolKind::Camelot => "camelot",
        }
    }
}

impl FromStr for PoolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uniswapv3" => Ok(PoolKind::UniswapV3),
            "algebrav3" => Ok(PoolKind::AlgebraV3),
            "quickswap" => Ok(PoolKind::Quickswap),
            "thena" => Ok(PoolKind::Thena),
            "camelot" => Ok(PoolKind::Camelot),
            other => Err(format!("unknown pool kind: {other}")),
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
