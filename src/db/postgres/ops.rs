use async_trait::async_trait;
use log::{error, warn};
use tokio_postgres::error::SqlState;

use crate::db::models::{BlockRecord, LedgerEvent, PairVolume, SwapEventRecord, TxStatus};
use crate::db::postgres::PostgresClient;
use crate::db::{DeleteSummary, InsertSummary, LedgerStore, VOLUME_WINDOW_SECS};

/// Sanitize a string for PostgreSQL by removing null bytes (0x00)
/// which are invalid in UTF-8 text columns
fn sanitize_string(s: &str) -> String {
    s.replace('\0', "")
}

fn row_to_block(row: &tokio_postgres::Row) -> BlockRecord {
    let height: i64 = row.get("height");
    BlockRecord {
        height: height as u64,
        block_hash: row.get("block_hash"),
        parent_hash: row.get("parent_hash"),
        block_time: row.get("block_time"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl LedgerStore for PostgresClient {
    async fn head(&self) -> anyhow::Result<Option<BlockRecord>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT height, block_hash, parent_hash, block_time, created_at
            FROM block_log
            ORDER BY height DESC
            LIMIT 1
        "#;

        let row = client.query_opt(query, &[]).await?;
        Ok(row.as_ref().map(row_to_block))
    }

    async fn insert_block(
        &self,
        block: &BlockRecord,
        events: &[LedgerEvent],
    ) -> anyhow::Result<InsertSummary> {
        let mut client = self.pool.get().await?;
        let mut tx = client.transaction().await?;

        tx.execute(
            r#"
            INSERT INTO block_log (block_hash, parent_hash, height, block_time, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
            &[
                &sanitize_string(&block.block_hash),
                &sanitize_string(&block.parent_hash),
                &(block.height as i64),
                &block.block_time,
                &block.created_at,
            ],
        )
        .await
        .map_err(|e| {
            error!("Failed to insert block {}: {:?}", block.height, e);
            e
        })?;

        let mut summary = InsertSummary::default();
        for event in events {
            match event {
                LedgerEvent::Swap(swap) => {
                    // A savepoint per row keeps an overflowing amount from
                    // poisoning the surrounding transaction.
                    let sp = tx.savepoint("swap_event").await?;
                    match insert_swap(&sp, swap).await {
                        Ok(_) => {
                            sp.commit().await?;
                            summary.inserted_events += 1;
                        },
                        Err(e) if e.code() == Some(&SqlState::NUMERIC_VALUE_OUT_OF_RANGE) => {
                            sp.rollback().await?;
                            warn!(
                                "Skipping swap event {} of {}: amount out of range ({}, {})",
                                swap.tx_hash, swap.contract_address, swap.amount0, swap.amount1
                            );
                            summary.skipped_out_of_range += 1;
                        },
                        Err(e) => {
                            error!(
                                "Failed to insert swap event {} at height {}: {:?}",
                                swap.tx_hash, swap.height, e
                            );
                            return Err(e.into());
                        },
                    }
                },
            }
        }

        tx.commit().await?;
        Ok(summary)
    }

    async fn delete_block(&self, height: u64) -> anyhow::Result<DeleteSummary> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let height = height as i64;

        let blocks = tx
            .execute("DELETE FROM block_log WHERE height = $1", &[&height])
            .await?;
        let pending_events = tx
            .execute(
                "DELETE FROM tx_event_log WHERE height = $1 AND status = $2",
                &[&height, &TxStatus::Pending.as_i16()],
            )
            .await?;

        tx.commit().await?;
        Ok(DeleteSummary {
            blocks,
            pending_events,
        })
    }

    async fn update_confirmations(
        &self,
        head_height: u64,
        threshold: u64,
    ) -> anyhow::Result<u64> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let next_height = head_height as i64 + 1;
        let pending = TxStatus::Pending.as_i16();

        tx.execute(
            "UPDATE tx_event_log SET confirmed_num = $1 - height WHERE status = $2",
            &[&next_height, &pending],
        )
        .await?;
        let confirmed = tx
            .execute(
                "UPDATE tx_event_log SET status = $1 WHERE status = $2 AND confirmed_num >= $3",
                &[&TxStatus::Confirmed.as_i16(), &pending, &(threshold as i64)],
            )
            .await?;

        tx.commit().await?;
        Ok(confirmed)
    }

    async fn prune_blocks(&self, before_height: u64) -> anyhow::Result<u64> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                "DELETE FROM block_log WHERE height < $1",
                &[&(before_height as i64)],
            )
            .await?;
        Ok(deleted)
    }

    async fn prune_events(&self, before_height: u64) -> anyhow::Result<u64> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                "DELETE FROM tx_event_log WHERE height < $1",
                &[&(before_height as i64)],
            )
            .await?;
        Ok(deleted)
    }

    async fn volume_24h(&self) -> anyhow::Result<Vec<PairVolume>> {
        let client = self.pool.get().await?;

        let head_time: i64 = client
            .query_opt("SELECT block_time FROM block_log ORDER BY height DESC LIMIT 1", &[])
            .await?
            .map(|row| row.get("block_time"))
            .unwrap_or(0);

        let query = r#"
            SELECT
                contract_address,
                SUM(amount0)::float8 AS total_amount0,
                SUM(amount1)::float8 AS total_amount1
            FROM tx_event_log
            WHERE block_time > $1
            GROUP BY contract_address
            ORDER BY contract_address
        "#;

        let rows = client
            .query(query, &[&(head_time - VOLUME_WINDOW_SECS)])
            .await?;

        Ok(rows
            .iter()
            .map(|row| PairVolume {
                contract_address: row.get("contract_address"),
                total_amount0: row.get("total_amount0"),
                total_amount1: row.get("total_amount1"),
            })
            .collect())
    }
}

async fn insert_swap(
    tx: &tokio_postgres::Transaction<'_>,
    swap: &SwapEventRecord,
) -> Result<u64, tokio_postgres::Error> {
    tx.execute(
        r#"
        INSERT INTO tx_event_log (
            contract_address, amount0, amount1, status, tx_hash, block_hash,
            block_time, height, confirmed_num, created_at
        ) VALUES ($1, $2::float8, $3::float8, $4, $5, $6, $7, $8, $9, $10)
        "#,
        &[
            &sanitize_string(&swap.contract_address),
            &swap.amount0,
            &swap.amount1,
            &swap.status.as_i16(),
            &sanitize_string(&swap.tx_hash),
            &sanitize_string(&swap.block_hash),
            &swap.block_time,
            &(swap.height as i64),
            &(swap.confirmed_num as i64),
            &swap.created_at,
        ],
    )
    .await
}
