//! Domain types for the hypervisor ledger.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper, including raw on-chain amounts
//! - Domain primitives: Address, Network, PoolKind
//! - Operations as decoded from chain logs, with their replay order
//! - Account snapshots and the value groups they are made of
//! - Hypervisor static data, vault status and price records

pub mod decimal;
pub mod operation;
pub mod ordering;
pub mod primitives;
pub mod snapshot;
pub mod vault;

pub use decimal::{AmountError, Decimal};
pub use operation::{Operation, OperationAmounts, Topic, REPORT_LOG_INDEX};
pub use ordering::{sort_operations, Cutoff, Position};
pub use primitives::{Address, AddressParseError, Network, PoolKind};
pub use snapshot::{AccountSnapshot, FeeAmounts, ImpermanentDelta, TokenPrices, Valuation};
pub use vault::{HypervisorStatic, PriceRecord, TokenInfo, VaultSnapshot};
