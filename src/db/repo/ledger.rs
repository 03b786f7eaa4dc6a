//! Per-account snapshot storage (`user_status`).
//!
//! "Latest snapshot" reads pick, per account, the row with the highest
//! (block, log_index) inside a [`Cutoff`].

use crate::domain::{
    AccountSnapshot, Address, Cutoff, Decimal, FeeAmounts, ImpermanentDelta, Topic, Valuation,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashSet;
use tracing::debug;

use super::{decimal_column, Repository};

const VALUATION_SUFFIXES: [&str; 5] = ["token0", "token1", "in_usd", "in_token0", "in_token1"];
const FEE_SUFFIXES: [&str; 3] = ["token0", "token1", "in_usd"];
const IMPERMANENT_PREFIX: &str = "impermanent_lp_vs_hodl";
const IMPERMANENT_SUFFIXES: [&str; 3] = ["usd", "token0", "token1"];

/// Topics whose blocks carry a hypervisor-wide valuation.
const RESULT_TOPICS: &str = "'report', 'zeroBurn', 'rebalance'";

/// Decimal columns of a snapshot, paired with their values.
fn decimal_columns(s: &AccountSnapshot) -> Vec<(String, Decimal)> {
    let mut cols = vec![
        ("usd_price_token0".to_string(), s.usd_price_token0),
        ("usd_price_token1".to_string(), s.usd_price_token1),
        ("shares_qtty".to_string(), s.shares_qtty),
        ("shares_percent".to_string(), s.shares_percent),
    ];

    let valuations = [
        ("investment", &s.investment),
        ("divestment_base", &s.divestment_base),
        ("current_result", &s.current_result),
        ("closed_investment_return", &s.closed_investment_return),
        ("underlying", &s.underlying),
        ("last_underlying", &s.last_underlying),
        ("tvl", &s.tvl),
    ];
    for (prefix, valuation) in valuations {
        for (suffix, value) in VALUATION_SUFFIXES.iter().zip(valuation.values()) {
            cols.push((format!("{prefix}_{suffix}"), value));
        }
    }

    let fees = [
        ("fees_collected", &s.fees_collected),
        ("fees_uncollected", &s.fees_uncollected),
        ("fees_owed", &s.fees_owed),
        ("divestment_fee", &s.divestment_fee),
    ];
    for (prefix, amounts) in fees {
        for (suffix, value) in FEE_SUFFIXES.iter().zip(amounts.values()) {
            cols.push((format!("{prefix}_{suffix}"), value));
        }
    }

    for (suffix, value) in IMPERMANENT_SUFFIXES.iter().zip(s.impermanent.values()) {
        cols.push((format!("{IMPERMANENT_PREFIX}_{suffix}"), value));
    }
    cols
}

fn read_valuation(row: &SqliteRow, prefix: &str) -> Result<Valuation, sqlx::Error> {
    let mut values = [Decimal::zero(); 5];
    for (slot, suffix) in values.iter_mut().zip(VALUATION_SUFFIXES) {
        *slot = decimal_column(row, &format!("{prefix}_{suffix}"))?;
    }
    Ok(Valuation::from_values(values))
}

fn read_fees(row: &SqliteRow, prefix: &str) -> Result<FeeAmounts, sqlx::Error> {
    let mut values = [Decimal::zero(); 3];
    for (slot, suffix) in values.iter_mut().zip(FEE_SUFFIXES) {
        *slot = decimal_column(row, &format!("{prefix}_{suffix}"))?;
    }
    Ok(FeeAmounts::from_values(values))
}

fn read_impermanent(row: &SqliteRow) -> Result<ImpermanentDelta, sqlx::Error> {
    let mut values = [Decimal::zero(); 3];
    for (slot, suffix) in values.iter_mut().zip(IMPERMANENT_SUFFIXES) {
        *slot = decimal_column(row, &format!("{IMPERMANENT_PREFIX}_{suffix}"))?;
    }
    Ok(ImpermanentDelta::from_values(values))
}

fn snapshot_from_row(row: &SqliteRow) -> Result<AccountSnapshot, sqlx::Error> {
    Ok(AccountSnapshot {
        hypervisor: Address::new(row.try_get::<String, _>("hypervisor_address")?),
        address: Address::new(row.try_get::<String, _>("address")?),
        block: row.try_get("block")?,
        log_index: row.try_get("log_index")?,
        timestamp: row.try_get("timestamp")?,
        topic: Topic::parse(&row.try_get::<String, _>("topic")?),
        raw_operation: row.try_get("raw_operation")?,
        sec_passed: row.try_get("sec_passed")?,
        fees_uncollected_sec_passed: row.try_get("fees_uncollected_sec_passed")?,
        usd_price_token0: decimal_column(row, "usd_price_token0")?,
        usd_price_token1: decimal_column(row, "usd_price_token1")?,
        shares_qtty: decimal_column(row, "shares_qtty")?,
        shares_percent: decimal_column(row, "shares_percent")?,
        investment: read_valuation(row, "investment")?,
        fees_collected: read_fees(row, "fees_collected")?,
        fees_uncollected: read_fees(row, "fees_uncollected")?,
        fees_owed: read_fees(row, "fees_owed")?,
        divestment_base: read_valuation(row, "divestment_base")?,
        divestment_fee: read_fees(row, "divestment_fee")?,
        impermanent: read_impermanent(row)?,
        current_result: read_valuation(row, "current_result")?,
        closed_investment_return: read_valuation(row, "closed_investment_return")?,
        underlying: read_valuation(row, "underlying")?,
        last_underlying: read_valuation(row, "last_underlying")?,
        tvl: read_valuation(row, "tvl")?,
    })
}

/// Position predicate for a cutoff; binds block, block, log_index.
fn cutoff_clause(cutoff: &Cutoff) -> &'static str {
    if cutoff.is_inclusive() {
        "(block < ? OR (block = ? AND log_index <= ?))"
    } else {
        "(block < ? OR (block = ? AND log_index < ?))"
    }
}

impl Repository {
    /// Append snapshots in a single transaction.
    ///
    /// Snapshots of the zero address are never stored. An existing row with the
    /// same (hypervisor, address, block, log_index) is left untouched. Returns the
    /// number of rows written.
    pub async fn insert_snapshots(&self, snapshots: &[AccountSnapshot]) -> Result<usize, sqlx::Error> {
        if snapshots.is_empty() {
            return Ok(0);
        }

        let mut total_inserted = 0usize;
        let mut tx = self.pool.begin().await?;

        for snapshot in snapshots {
            if snapshot.address.is_zero() {
                debug!(
                    hypervisor = %snapshot.hypervisor,
                    block = snapshot.block,
                    "skipping zero address snapshot"
                );
                continue;
            }

            let decimals = decimal_columns(snapshot);
            let names: Vec<&str> = decimals.iter().map(|(name, _)| name.as_str()).collect();
            let sql = format!(
                r#"
                INSERT INTO user_status (
                    hypervisor_address, address, block, log_index, timestamp, topic, raw_operation,
                    sec_passed, fees_uncollected_sec_passed, {}
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, {})
                ON CONFLICT(hypervisor_address, address, block, log_index) DO NOTHING
                "#,
                names.join(", "),
                vec!["?"; names.len()].join(", ")
            );

            let mut query = sqlx::query(&sql)
                .bind(snapshot.hypervisor.as_str())
                .bind(snapshot.address.as_str())
                .bind(snapshot.block)
                .bind(snapshot.log_index)
                .bind(snapshot.timestamp)
                .bind(snapshot.topic.as_str())
                .bind(snapshot.raw_operation.as_str())
                .bind(snapshot.sec_passed)
                .bind(snapshot.fees_uncollected_sec_passed);
            for (_, value) in &decimals {
                query = query.bind(value.to_canonical_string());
            }

            if query.execute(&mut *tx).await?.rows_affected() > 0 {
                total_inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(total_inserted)
    }

    /// Latest snapshot of one account inside `cutoff`.
    pub async fn last_snapshot(
        &self,
        hypervisor: &Address,
        account: &Address,
        cutoff: Cutoff,
    ) -> Result<Option<AccountSnapshot>, sqlx::Error> {
        let position = cutoff.position();
        let sql = format!(
            r#"
            SELECT *
            FROM user_status
            WHERE hypervisor_address = ? AND address = ? AND {}
            ORDER BY block DESC, log_index DESC
            LIMIT 1
            "#,
            cutoff_clause(&cutoff)
        );
        let row = sqlx::query(&sql)
            .bind(hypervisor.as_str())
            .bind(account.as_str())
            .bind(position.block)
            .bind(position.block)
            .bind(position.log_index)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| snapshot_from_row(&r)).transpose()
    }

    /// Latest snapshot of every account inside `cutoff`, ordered by address.
    ///
    /// With `require_shares`, accounts whose latest snapshot holds no shares are
    /// dropped after the latest row has been picked.
    pub async fn last_snapshots_all_accounts(
        &self,
        hypervisor: &Address,
        cutoff: Cutoff,
        require_shares: bool,
    ) -> Result<Vec<AccountSnapshot>, sqlx::Error> {
        let position = cutoff.position();
        let sql = format!(
            r#"
            SELECT * FROM (
                SELECT *, ROW_NUMBER() OVER (
                    PARTITION BY address ORDER BY block DESC, log_index DESC
                ) AS rn
                FROM user_status
                WHERE hypervisor_address = ? AND {}
            )
            WHERE rn = 1
            ORDER BY address ASC
            "#,
            cutoff_clause(&cutoff)
        );
        let rows = sqlx::query(&sql)
            .bind(hypervisor.as_str())
            .bind(position.block)
            .bind(position.block)
            .bind(position.log_index)
            .fetch_all(&self.pool)
            .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in &rows {
            let snapshot = snapshot_from_row(row)?;
            if require_shares && !snapshot.shares_qtty.is_positive() {
                continue;
            }
            snapshots.push(snapshot);
        }
        Ok(snapshots)
    }

    /// Sum of every account's latest `shares_qtty` inside `cutoff`.
    pub async fn total_shares(
        &self,
        hypervisor: &Address,
        cutoff: Cutoff,
        exclude: Option<&Address>,
    ) -> Result<Decimal, sqlx::Error> {
        let snapshots = self
            .last_snapshots_all_accounts(hypervisor, cutoff, false)
            .await?;
        Ok(snapshots
            .iter()
            .filter(|s| Some(&s.address) != exclude)
            .map(|s| s.shares_qtty)
            .sum())
    }

    /// Distinct blocks present in the ledger, ascending.
    pub async fn ledger_blocks(&self, hypervisor: &Address) -> Result<Vec<i64>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT block
            FROM user_status
            WHERE hypervisor_address = ?
            ORDER BY block ASC
            "#,
        )
        .bind(hypervisor.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| row.try_get::<i64, _>("block")).collect()
    }

    /// Ids of operations already reflected in the ledger at or after `from_block`.
    pub async fn processed_operation_ids(
        &self,
        hypervisor: &Address,
        from_block: i64,
    ) -> Result<HashSet<String>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT raw_operation
            FROM user_status
            WHERE hypervisor_address = ? AND block >= ?
            "#,
        )
        .bind(hypervisor.as_str())
        .bind(from_block)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("raw_operation"))
            .collect()
    }

    /// Every snapshot of one account with block in `[from_block, to_block]`.
    pub async fn account_history(
        &self,
        hypervisor: &Address,
        account: &Address,
        from_block: i64,
        to_block: i64,
    ) -> Result<Vec<AccountSnapshot>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT *
            FROM user_status
            WHERE hypervisor_address = ? AND address = ? AND block >= ? AND block <= ?
            ORDER BY block ASC, log_index ASC
            "#,
        )
        .bind(hypervisor.as_str())
        .bind(account.as_str())
        .bind(from_block)
        .bind(to_block)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(snapshot_from_row).collect()
    }

    /// Blocks with a report or fee collection whose timestamp lies in
    /// `[from_ts, to_ts]`, ascending.
    pub async fn result_blocks(
        &self,
        hypervisor: &Address,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<i64>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT DISTINCT block
            FROM user_status
            WHERE hypervisor_address = ? AND topic IN ({RESULT_TOPICS})
              AND timestamp >= ? AND timestamp <= ?
            ORDER BY block ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(hypervisor.as_str())
            .bind(from_ts)
            .bind(to_ts)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(|row| row.try_get::<i64, _>("block")).collect()
    }
}
