//! Job to drop ledger rows that fell out of the retention windows.
//!
//! Blocks are kept for `block_retention` heights below the head and events
//! for `tx_retention` heights, whatever their status.

use anyhow::{Context, Result};
use log::{debug, info};

use crate::db::LedgerStore;

/// Rows removed by one pruning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneSummary {
    pub blocks: u64,
    pub events: u64,
}

pub async fn run(
    store: &dyn LedgerStore,
    block_retention: u64,
    tx_retention: u64,
) -> Result<PruneSummary> {
    let Some(head) = store.head().await.context("Failed to read ledger head")? else {
        debug!("Ledger is empty, nothing to prune");
        return Ok(PruneSummary::default());
    };

    let blocks = store
        .prune_blocks(head.height.saturating_sub(block_retention))
        .await
        .context("Failed to prune blocks")?;
    let events = store
        .prune_events(head.height.saturating_sub(tx_retention))
        .await
        .context("Failed to prune events")?;

    if blocks > 0 || events > 0 {
        info!(
            "Pruned {} blocks and {} events below head {}",
            blocks, events, head.height
        );
    }
    Ok(PruneSummary { blocks, events })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BlockRecord, LedgerEvent, MemoryLedger, SwapEventRecord};

    async fn ledger_with_blocks(from: u64, to: u64) -> MemoryLedger {
        let store = MemoryLedger::new();
        for height in from..=to {
            let block = BlockRecord::new(
                height,
                format!("0x{:x}", height),
                format!("0x{:x}", height - 1),
                1_700_000_000 + height as i64,
            );
            let event = LedgerEvent::Swap(SwapEventRecord::new(
                "0x1b96b92314c44b159149f7e0303511fb2fc4774f",
                1.0,
                1.0,
                &block.block_hash,
                &format!("0xe{:x}", height),
                height,
                block.block_time,
            ));
            store.insert_block(&block, &[event]).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_prunes_below_retention_windows() {
        let store = ledger_with_blocks(1, 50).await;
        store.update_confirmations(50, 5).await.unwrap();

        let summary = run(&store, 10, 20).await.unwrap();

        assert_eq!(summary, PruneSummary { blocks: 39, events: 29 });
        let blocks = store.blocks().await;
        assert_eq!(blocks.first().map(|b| b.height), Some(40));
        let events = store.events().await;
        assert!(events.iter().all(|e| e.height >= 30));
        assert_eq!(events.len(), 21);
    }

    #[tokio::test]
    async fn test_short_ledger_is_untouched() {
        let store = ledger_with_blocks(1, 5).await;

        let summary = run(&store, 10, 20).await.unwrap();

        assert_eq!(summary, PruneSummary::default());
        assert_eq!(store.blocks().await.len(), 5);
    }

    #[tokio::test]
    async fn test_empty_ledger() {
        let store = MemoryLedger::new();
        assert_eq!(run(&store, 10, 20).await.unwrap(), PruneSummary::default());
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let store = ledger_with_blocks(1, 5).await;
        store.set_offline(true);
        assert!(run(&store, 1, 1).await.is_err());
    }
}
