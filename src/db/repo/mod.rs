//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `operations.rs` - Decoded hypervisor events and replay planning reads
//! - `ledger.rs` - Per-account snapshots (`user_status`)
//! - `vaults.rs` - Vault status per block and USD prices
//!
//! Decimals are stored as canonical TEXT and summed in Rust, never in SQL.

mod ledger;
mod operations;
mod vaults;

use crate::domain::{Address, Decimal, HypervisorStatic, Network, PoolKind, TokenInfo};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

/// Read a TEXT column holding a canonical decimal.
///
/// A malformed value is a decode error, not a silent zero.
pub(crate) fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

pub(crate) fn parse_column<T>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    T::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: e.into(),
    })
}

pub(crate) fn decimals_column(row: &SqliteRow, column: &str) -> Result<u32, sqlx::Error> {
    let raw: i64 = row.try_get(column)?;
    u32::try_from(raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// Check that the database answers queries.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // =========================================================================
    // Hypervisor static data
    // =========================================================================

    /// Insert or refresh a hypervisor's static data.
    pub async fn upsert_hypervisor(&self, hypervisor: &HypervisorStatic) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO hypervisors (
                address, network, pool_kind, symbol,
                token0_address, token0_decimals, token1_address, token1_decimals, decimals
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                network = excluded.network,
                pool_kind = excluded.pool_kind,
                symbol = excluded.symbol,
                token0_address = excluded.token0_address,
                token0_decimals = excluded.token0_decimals,
                token1_address = excluded.token1_address,
                token1_decimals = excluded.token1_decimals,
                decimals = excluded.decimals
            "#,
        )
        .bind(hypervisor.address.as_str())
        .bind(hypervisor.network.as_str())
        .bind(hypervisor.pool_kind.as_str())
        .bind(hypervisor.symbol.as_str())
        .bind(hypervisor.token0.address.as_str())
        .bind(i64::from(hypervisor.token0.decimals))
        .bind(hypervisor.token1.address.as_str())
        .bind(i64::from(hypervisor.token1.decimals))
        .bind(i64::from(hypervisor.decimals))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_hypervisor(
        &self,
        address: &Address,
    ) -> Result<Option<HypervisorStatic>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT address, network, pool_kind, symbol,
                   token0_address, token0_decimals, token1_address, token1_decimals, decimals
            FROM hypervisors
            WHERE address = ?
            "#,
        )
        .bind(address.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| hypervisor_from_row(&r)).transpose()
    }

    /// All hypervisors of a network, ordered by address.
    pub async fn list_hypervisors(
        &self,
        network: Network,
    ) -> Result<Vec<HypervisorStatic>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT address, network, pool_kind, symbol,
                   token0_address, token0_decimals, token1_address, token1_decimals, decimals
            FROM hypervisors
            WHERE network = ?
            ORDER BY address ASC
            "#,
        )
        .bind(network.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(hypervisor_from_row).collect()
    }

    // =========================================================================
    // Rewarders
    // =========================================================================

    /// Register reward contracts for a hypervisor. Returns how many were new.
    pub async fn insert_rewarders(
        &self,
        hypervisor: &Address,
        rewarders: &[Address],
    ) -> Result<usize, sqlx::Error> {
        if rewarders.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0usize;
        let mut tx = self.pool.begin().await?;
        for rewarder in rewarders {
            let result = sqlx::query(
                r#"
                INSERT INTO rewarders (hypervisor_address, address)
                VALUES (?, ?)
                ON CONFLICT(hypervisor_address, address) DO NOTHING
                "#,
            )
            .bind(hypervisor.as_str())
            .bind(rewarder.as_str())
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn rewarders_for(&self, hypervisor: &Address) -> Result<Vec<Address>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT address FROM rewarders WHERE hypervisor_address = ? ORDER BY address ASC",
        )
        .bind(hypervisor.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Address::new(row.get::<String, _>("address")))
            .collect())
    }
}

fn hypervisor_from_row(row: &SqliteRow) -> Result<HypervisorStatic, sqlx::Error> {
    Ok(HypervisorStatic {
        address: Address::new(row.try_get::<String, _>("address")?),
        network: parse_column::<Network>(row, "network")?,
        pool_kind: parse_column::<PoolKind>(row, "pool_kind")?,
        symbol: row.try_get("symbol")?,
        token0: TokenInfo {
            address: Address::new(row.try_get::<String, _>("token0_address")?),
            decimals: decimals_column(row, "token0_decimals")?,
        },
        token1: TokenInfo {
            address: Address::new(row.try_get::<String, _>("token1_address")?),
            decimals: decimals_column(row, "token1_decimals")?,
        },
        decimals: decimals_column(row, "decimals")?,
    })
}
