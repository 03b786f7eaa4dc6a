//! Vault status per block and USD price storage.

use crate::domain::{Address, Decimal, Network, PriceRecord, VaultSnapshot};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{decimal_column, Repository};

/// SQLite caps bound parameters per statement; chunk IN lists below it.
const CHUNK_SIZE: usize = 500;

impl Repository {
    // =========================================================================
    // Vault status
    // =========================================================================

    /// Store vault snapshots idempotently by (hypervisor, block).
    pub async fn insert_vault_snapshots(
        &self,
        snapshots: &[VaultSnapshot],
    ) -> Result<usize, sqlx::Error> {
        if snapshots.is_empty() {
            return Ok(0);
        }

        let mut total_inserted = 0usize;
        let mut tx = self.pool.begin().await?;
        for snapshot in snapshots {
            let result = sqlx::query(
                r#"
                INSERT INTO hypervisor_status (
                    hypervisor_address, block, timestamp, total_supply, total_token0, total_token1,
                    fees_uncollected_token0, fees_uncollected_token1, fees_owed_token0, fees_owed_token1
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(hypervisor_address, block) DO NOTHING
                "#,
            )
            .bind(snapshot.hypervisor.as_str())
            .bind(snapshot.block)
            .bind(snapshot.timestamp)
            .bind(snapshot.total_supply.to_canonical_string())
            .bind(snapshot.total_token0.to_canonical_string())
            .bind(snapshot.total_token1.to_canonical_string())
            .bind(snapshot.fees_uncollected_token0.to_canonical_string())
            .bind(snapshot.fees_uncollected_token1.to_canonical_string())
            .bind(snapshot.fees_owed_token0.to_canonical_string())
            .bind(snapshot.fees_owed_token1.to_canonical_string())
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() > 0 {
                total_inserted += 1;
            }
        }
        tx.commit().await?;
        Ok(total_inserted)
    }

    pub async fn get_vault_snapshot(
        &self,
        hypervisor: &Address,
        block: i64,
    ) -> Result<Option<VaultSnapshot>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT hypervisor_address, block, timestamp, total_supply, total_token0, total_token1,
                   fees_uncollected_token0, fees_uncollected_token1, fees_owed_token0, fees_owed_token1
            FROM hypervisor_status
            WHERE hypervisor_address = ? AND block = ?
            "#,
        )
        .bind(hypervisor.as_str())
        .bind(block)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| vault_snapshot_from_row(&r)).transpose()
    }

    /// (block, timestamp) of every stored vault status, ascending by block.
    pub async fn vault_status_points(
        &self,
        hypervisor: &Address,
    ) -> Result<Vec<(i64, i64)>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT block, timestamp
            FROM hypervisor_status
            WHERE hypervisor_address = ?
            ORDER BY block ASC
            "#,
        )
        .bind(hypervisor.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(i64, i64), sqlx::Error> {
                Ok((row.try_get("block")?, row.try_get("timestamp")?))
            })
            .collect()
    }

    /// Lowest and highest block with a stored vault status.
    pub async fn status_block_range(
        &self,
        hypervisor: &Address,
    ) -> Result<Option<(i64, i64)>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT MIN(block) AS min_block, MAX(block) AS max_block
            FROM hypervisor_status
            WHERE hypervisor_address = ?
            "#,
        )
        .bind(hypervisor.as_str())
        .fetch_one(&self.pool)
        .await?;

        let min: Option<i64> = row.try_get("min_block")?;
        let max: Option<i64> = row.try_get("max_block")?;
        Ok(min.zip(max))
    }

    // =========================================================================
    // USD prices
    // =========================================================================

    /// Store price observations. Existing (network, token, block) rows are kept.
    pub async fn insert_prices(&self, prices: &[PriceRecord]) -> Result<usize, sqlx::Error> {
        if prices.is_empty() {
            return Ok(0);
        }

        let mut total_inserted = 0usize;
        let mut tx = self.pool.begin().await?;
        for price in prices {
            let result = sqlx::query(
                r#"
                INSERT INTO usd_prices (network, token_address, block, price)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(network, token_address, block) DO NOTHING
                "#,
            )
            .bind(price.network.as_str())
            .bind(price.token.as_str())
            .bind(price.block)
            .bind(price.usd_price.to_canonical_string())
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() > 0 {
                total_inserted += 1;
            }
        }
        tx.commit().await?;
        Ok(total_inserted)
    }

    pub async fn get_price(
        &self,
        network: Network,
        token: &Address,
        block: i64,
    ) -> Result<Option<Decimal>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT price
            FROM usd_prices
            WHERE network = ? AND token_address = ? AND block = ?
            "#,
        )
        .bind(network.as_str())
        .bind(token.as_str())
        .bind(block)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| decimal_column(&r, "price")).transpose()
    }

    /// Every stored price for `tokens` with block in `[from_block, to_block]`.
    pub async fn prices_in_window(
        &self,
        network: Network,
        tokens: &[Address],
        from_block: i64,
        to_block: i64,
    ) -> Result<Vec<PriceRecord>, sqlx::Error> {
        let mut records = Vec::new();
        for chunk in tokens.chunks(CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                r#"
                SELECT token_address, block, price
                FROM usd_prices
                WHERE network = ? AND block >= ? AND block <= ? AND token_address IN ({placeholders})
                ORDER BY block ASC, token_address ASC
                "#
            );
            let mut query = sqlx::query(&sql)
                .bind(network.as_str())
                .bind(from_block)
                .bind(to_block);
            for token in chunk {
                query = query.bind(token.as_str());
            }

            for row in query.fetch_all(&self.pool).await? {
                records.push(PriceRecord {
                    network,
                    block: row.try_get("block")?,
                    token: Address::new(row.try_get::<String, _>("token_address")?),
                    usd_price: decimal_column(&row, "price")?,
                });
            }
        }
        Ok(records)
    }
}

fn vault_snapshot_from_row(row: &SqliteRow) -> Result<VaultSnapshot, sqlx::Error> {
    Ok(VaultSnapshot {
        hypervisor: Address::new(row.try_get::<String, _>("hypervisor_address")?),
        block: row.try_get("block")?,
        timestamp: row.try_get("timestamp")?,
        total_supply: decimal_column(row, "total_supply")?,
        total_token0: decimal_column(row, "total_token0")?,
        total_token1: decimal_column(row, "total_token1")?,
        fees_uncollected_token0: decimal_column(row, "fees_uncollected_token0")?,
        fees_uncollected_token1: decimal_column(row, "fees_uncollected_token1")?,
        fees_owed_token0: decimal_column(row, "fees_owed_token0")?,
        fees_owed_token1: decimal_column(row, "fees_owed_token1")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
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

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn vault(block: i64, timestamp: i64) -> VaultSnapshot {
        VaultSnapshot {
            hypervisor: addr(1),
            block,
            timestamp,
            total_supply: d("10.5"),
            total_token0: d("100"),
            total_token1: d("0.05"),
            fees_uncollected_token0: d("0.1"),
            fees_uncollected_token1: d("0"),
            fees_owed_token0: d("0"),
            fees_owed_token1: d("0.0001"),
        }
    }

    #[tokio::test]
    async fn test_vault_snapshot_roundtrip() {
        let (repo, _dir) = setup_test_db().await;
        repo.insert_vault_snapshots(&[vault(100, 1_000), vault(200, 2_000)])
            .await
            .unwrap();

        assert_eq!(
            repo.get_vault_snapshot(&addr(1), 200).await.unwrap(),
            Some(vault(200, 2_000))
        );
        assert_eq!(repo.get_vault_snapshot(&addr(1), 150).await.unwrap(), None);
        assert_eq!(
            repo.vault_status_points(&addr(1)).await.unwrap(),
            vec![(100, 1_000), (200, 2_000)]
        );
        assert_eq!(
            repo.status_block_range(&addr(1)).await.unwrap(),
            Some((100, 200))
        );
        assert_eq!(repo.status_block_range(&addr(2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_prices_window() {
        let (repo, _dir) = setup_test_db().await;
        let records = vec![
            PriceRecord {
                network: Network::Ethereum,
                block: 10,
                token: addr(7),
                usd_price: d("1.0001"),
            },
            PriceRecord {
                network: Network::Ethereum,
                block: 20,
                token: addr(8),
                usd_price: d("1800"),
            },
            PriceRecord {
                network: Network::Polygon,
                block: 10,
                token: addr(7),
                usd_price: d("0.99"),
            },
        ];
        assert_eq!(repo.insert_prices(&records).await.unwrap(), 3);
        assert_eq!(repo.insert_prices(&records).await.unwrap(), 0);

        assert_eq!(
            repo.get_price(Network::Ethereum, &addr(7), 10).await.unwrap(),
            Some(d("1.0001"))
        );
        let window = repo
            .prices_in_window(Network::Ethereum, &[addr(7), addr(8)], 0, 15)
            .await
            .unwrap();
        assert_eq!(window, vec![records[0].clone()]);
    }

    #[tokio::test]
    async fn test_malformed_decimal_is_an_error() {
        let (repo, _dir) = setup_test_db().await;
        sqlx::query(
            "INSERT INTO usd_prices (network, token_address, block, price) VALUES ('ethereum', ?, 1, 'abc')",
        )
        .bind(addr(7).as_str())
        .execute(&repo.pool)
        .await
        .unwrap();

        let result = repo.get_price(Network::Ethereum, &addr(7), 1).await;
        assert!(matches!(result, Err(sqlx::Error::ColumnDecode { .. })));
    }
}
