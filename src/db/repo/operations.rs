//! Hypervisor event storage and the reads replay planning needs.

use crate::domain::{Address, Operation, Topic};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{decimals_column, Repository};

/// Filter selecting the operations that change ownership or collect fees.
///
/// Mints from and burns to the zero address are excluded, and so is any
/// non-transfer event that moved no tokens at all.
const QUALIFYING_FILTER: &str = r#"
    hypervisor_address = ?
    AND topic IN ('deposit', 'withdraw', 'transfer', 'rebalance', 'zeroBurn')
    AND (topic = 'transfer' OR qtty_token0 != '0' OR qtty_token1 != '0')
    AND (src IS NULL OR src != ?)
    AND (dst IS NULL OR dst != ?)
"#;

const OPERATION_COLUMNS: &str = r#"
    id, hypervisor_address, topic, block, log_index, timestamp,
    src, dst, recipient, sender, qtty_token0, qtty_token1, shares,
    decimals_token0, decimals_token1, decimals_contract
"#;

impl Repository {
    /// Store decoded operations idempotently by id.
    ///
    /// Returns the number of newly inserted operations.
    pub async fn insert_operations_batch(
        &self,
        operations: &[Operation],
    ) -> Result<usize, sqlx::Error> {
        if operations.is_empty() {
            return Ok(0);
        }

        let mut total_inserted = 0usize;
        let mut tx = self.pool.begin().await?;

        for op in operations {
            let result = sqlx::query(
                r#"
                INSERT INTO operations (
                    id, hypervisor_address, topic, block, log_index, timestamp,
                    src, dst, recipient, sender, qtty_token0, qtty_token1, shares,
                    decimals_token0, decimals_token1, decimals_contract
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO NOTHING
                "#,
            )
            .bind(op.id.as_str())
            .bind(op.hypervisor.as_str())
            .bind(op.topic.as_str())
            .bind(op.block)
            .bind(op.log_index)
            .bind(op.timestamp)
            .bind(op.src.as_ref().map(Address::as_str))
            .bind(op.dst.as_ref().map(Address::as_str))
            .bind(op.to.as_ref().map(Address::as_str))
            .bind(op.sender.as_ref().map(Address::as_str))
            .bind(op.qtty_token0.as_str())
            .bind(op.qtty_token1.as_str())
            .bind(op.shares.as_str())
            .bind(i64::from(op.decimals_token0))
            .bind(i64::from(op.decimals_token1))
            .bind(i64::from(op.decimals_contract))
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                total_inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(total_inserted)
    }

    /// Distinct blocks holding at least one qualifying operation, ascending.
    pub async fn qualifying_operation_blocks(
        &self,
        hypervisor: &Address,
    ) -> Result<Vec<i64>, sqlx::Error> {
        let zero = Address::zero();
        let sql = format!(
            "SELECT DISTINCT block FROM operations WHERE {QUALIFYING_FILTER} ORDER BY block ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(hypervisor.as_str())
            .bind(zero.as_str())
            .bind(zero.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(|row| row.try_get::<i64, _>("block")).collect()
    }

    /// Qualifying operations at or after `from_block`, in replay order.
    pub async fn query_operations_since(
        &self,
        hypervisor: &Address,
        from_block: i64,
    ) -> Result<Vec<Operation>, sqlx::Error> {
        let zero = Address::zero();
        let sql = format!(
            "SELECT {OPERATION_COLUMNS} FROM operations WHERE {QUALIFYING_FILTER} AND block >= ? \
             ORDER BY block ASC, log_index ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(hypervisor.as_str())
            .bind(zero.as_str())
            .bind(zero.as_str())
            .bind(from_block)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(operation_from_row).collect()
    }

    /// Highest log index among all of a hypervisor's operations in `block`.
    pub async fn last_log_index(
        &self,
        hypervisor: &Address,
        block: i64,
    ) -> Result<Option<i64>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT MAX(log_index) AS last_log_index
            FROM operations
            WHERE hypervisor_address = ? AND block = ?
            "#,
        )
        .bind(hypervisor.as_str())
        .bind(block)
        .fetch_one(&self.pool)
        .await?;

        row.try_get::<Option<i64>, _>("last_log_index")
    }
}

fn optional_address(row: &SqliteRow, column: &str) -> Result<Option<Address>, sqlx::Error> {
    Ok(row
        .try_get::<Option<String>, _>(column)?
        .map(Address::new))
}

fn operation_from_row(row: &SqliteRow) -> Result<Operation, sqlx::Error> {
    Ok(Operation {
        id: row.try_get("id")?,
        topic: Topic::parse(&row.try_get::<String, _>("topic")?),
        hypervisor: Address::new(row.try_get::<String, _>("hypervisor_address")?),
        block: row.try_get("block")?,
        log_index: row.try_get("log_index")?,
        timestamp: row.try_get("timestamp")?,
        src: optional_address(row, "src")?,
        dst: optional_address(row, "dst")?,
        to: optional_address(row, "recipient")?,
        sender: optional_address(row, "sender")?,
        qtty_token0: row.try_get("qtty_token0")?,
        qtty_token1: row.try_get("qtty_token1")?,
        shares: row.try_get("shares")?,
        decimals_token0: decimals_column(row, "decimals_token0")?,
        decimals_token1: decimals_column(row, "decimals_token1")?,
        decimals_contract: decimals_column(row, "decimals_contract")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::domain::Position;
    use tempfile::TempDir;

    async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let pool = init_db(db_path.to_str().unwrap()).await.unwrap();
        (Repository::new(pool), temp_dir)
    }

    fn addr(n: u64) -> Address {
        Address::new(format!("0x{:040x}", n))
    }

    fn op(id: &str, topic: Topic, block: i64, log_index: i64) -> Operation {
        Operation::new(id, topic, addr(1), Position::new(block, log_index), 1_700_000_000)
    }

    #[tokio::test]
    async fn test_insert_operations_idempotent() {
        let (repo, _dir) = setup_test_db().await;
        let ops = vec![
            op("a", Topic::Deposit, 10, 1).with_quantities("5", "0"),
            op("b", Topic::Deposit, 11, 1).with_quantities("5", "0"),
        ];

        assert_eq!(repo.insert_operations_batch(&ops).await.unwrap(), 2);
        assert_eq!(repo.insert_operations_batch(&ops).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_qualifying_filter() {
        let (repo, _dir) = setup_test_db().await;
        let ops = vec![
            op("deposit", Topic::Deposit, 10, 1)
                .with_to(addr(5))
                .with_quantities("1", "0"),
            op("empty-deposit", Topic::Deposit, 11, 1).with_quantities("0", "0"),
            op("transfer", Topic::Transfer, 12, 1)
                .with_transfer(addr(5), addr(6))
                .with_shares("1"),
            op("mint", Topic::Transfer, 13, 1).with_transfer(Address::zero(), addr(5)),
            op("burn", Topic::Transfer, 14, 1).with_transfer(addr(5), Address::zero()),
            op("approval", Topic::Approval, 15, 1).with_quantities("1", "1"),
            op("zero-burn", Topic::ZeroBurn, 16, 1).with_quantities("0", "7"),
        ];
        repo.insert_operations_batch(&ops).await.unwrap();

        let blocks = repo.qualifying_operation_blocks(&addr(1)).await.unwrap();
        assert_eq!(blocks, vec![10, 12, 16]);

        let since = repo.query_operations_since(&addr(1), 11).await.unwrap();
        let ids: Vec<&str> = since.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["transfer", "zero-burn"]);
        assert_eq!(since[0].src, Some(addr(5)));
        assert_eq!(since[0].dst, Some(addr(6)));
    }

    #[tokio::test]
    async fn test_operation_row_roundtrip() {
        let (repo, _dir) = setup_test_db().await;
        let original = op("w", Topic::Withdraw, 20, 4)
            .with_sender(addr(9))
            .with_to(addr(10))
            .with_quantities("1000000", "2000000000000000000")
            .with_shares("3")
            .with_decimals(6, 18, 18);
        repo.insert_operations_batch(std::slice::from_ref(&original))
            .await
            .unwrap();

        let loaded = repo.query_operations_since(&addr(1), 0).await.unwrap();
        assert_eq!(loaded, vec![original]);
    }

    #[tokio::test]
    async fn test_last_log_index_is_per_block() {
        let (repo, _dir) = setup_test_db().await;
        let ops = vec![
            op("a", Topic::Deposit, 10, 1).with_quantities("1", "0"),
            op("b", Topic::Deposit, 10, 7).with_quantities("1", "0"),
            op("c", Topic::Deposit, 11, 99).with_quantities("1", "0"),
        ];
        repo.insert_operations_batch(&ops).await.unwrap();

        assert_eq!(repo.last_log_index(&addr(1), 10).await.unwrap(), Some(7));
        assert_eq!(repo.last_log_index(&addr(1), 11).await.unwrap(), Some(99));
        assert_eq!(repo.last_log_index(&addr(1), 12).await.unwrap(), None);
    }
}
