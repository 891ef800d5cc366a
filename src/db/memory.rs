//! In-memory ledger.
//!
//! Mirrors the PostgreSQL ledger's semantics, including the NUMERIC(28,18)
//! range check and the unique height index. Used by tests and for running the
//! service without a database.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::models::{BlockRecord, LedgerEvent, PairVolume, SwapEventRecord, TxStatus};
use super::{DeleteSummary, InsertSummary, LedgerStore, VOLUME_WINDOW_SECS};

#[derive(Debug, Default)]
struct Tables {
    blocks: BTreeMap<u64, BlockRecord>,
    events: Vec<SwapEventRecord>,
}

/// Thread-safe in-memory ledger. Both tables sit behind one lock so every
/// call is atomic with respect to the others.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    tables: RwLock<Tables>,
    offline: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail until switched back, like a lost
    /// database connection.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// All blocks in height order.
    pub async fn blocks(&self) -> Vec<BlockRecord> {
        self.tables.read().await.blocks.values().cloned().collect()
    }

    /// All swap events in insertion order.
    pub async fn events(&self) -> Vec<SwapEventRecord> {
        self.tables.read().await.events.clone()
    }

    fn check_online(&self) -> anyhow::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(anyhow!("memory ledger is offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn head(&self) -> anyhow::Result<Option<BlockRecord>> {
        self.check_online()?;
        let tables = self.tables.read().await;
        Ok(tables.blocks.values().next_back().cloned())
    }

    async fn insert_block(
        &self,
        block: &BlockRecord,
        events: &[LedgerEvent],
    ) -> anyhow::Result<InsertSummary> {
        self.check_online()?;
        let mut tables = self.tables.write().await;

        if tables.blocks.contains_key(&block.height) {
            bail!("duplicate key value violates unique constraint \"block_log_height\"");
        }

        // NaN and infinities fail the range check like overflowing amounts.
        let mut staged = Vec::with_capacity(events.len());
        let mut summary = InsertSummary::default();
        for event in events {
            match event {
                LedgerEvent::Swap(swap) => {
                    if !swap.amounts_in_range() {
                        summary.skipped_out_of_range += 1;
                        continue;
                    }
                    staged.push(swap.clone());
                },
            }
        }

        summary.inserted_events = staged.len();
        tables.blocks.insert(block.height, block.clone());
        tables.events.extend(staged);
        Ok(summary)
    }

    async fn delete_block(&self, height: u64) -> anyhow::Result<DeleteSummary> {
        self.check_online()?;
        let mut tables = self.tables.write().await;

        let blocks = tables.blocks.remove(&height).map_or(0, |_| 1);
        let before = tables.events.len();
        tables
            .events
            .retain(|ev| !(ev.height == height && ev.status == TxStatus::Pending));

        Ok(DeleteSummary {
            blocks,
            pending_events: (before - tables.events.len()) as u64,
        })
    }

    async fn update_confirmations(
        &self,
        head_height: u64,
        threshold: u64,
    ) -> anyhow::Result<u64> {
        self.check_online()?;
        let mut tables = self.tables.write().await;

        let mut confirmed = 0;
        for ev in tables.events.iter_mut().filter(|ev| ev.status == TxStatus::Pending) {
            ev.confirmed_num = (head_height + 1).saturating_sub(ev.height);
            if ev.confirmed_num >= threshold {
                ev.status = TxStatus::Confirmed;
                confirmed += 1;
            }
        }
        Ok(confirmed)
    }

    async fn prune_blocks(&self, before_height: u64) -> anyhow::Result<u64> {
        self.check_online()?;
        let mut tables = self.tables.write().await;

        let kept = tables.blocks.split_off(&before_height);
        let deleted = tables.blocks.len() as u64;
        tables.blocks = kept;
        Ok(deleted)
    }

    async fn prune_events(&self, before_height: u64) -> anyhow::Result<u64> {
        self.check_online()?;
        let mut tables = self.tables.write().await;

        let before = tables.events.len();
        tables.events.retain(|ev| ev.height >= before_height);
        Ok((before - tables.events.len()) as u64)
    }

    async fn volume_24h(&self) -> anyhow::Result<Vec<PairVolume>> {
        self.check_online()?;
        let tables = self.tables.read().await;

        let head_time = tables.blocks.values().next_back().map_or(0, |b| b.block_time);
        let window_start = head_time - VOLUME_WINDOW_SECS;

        let mut sums: HashMap<&str, (f64, f64)> = HashMap::new();
        for ev in tables.events.iter().filter(|ev| ev.block_time > window_start) {
            let entry = sums.entry(ev.contract_address.as_str()).or_default();
            entry.0 += ev.amount0;
            entry.1 += ev.amount1;
        }

        let mut volumes: Vec<PairVolume> = sums
            .into_iter()
            .map(|(addr, (a0, a1))| PairVolume {
                contract_address: addr.to_string(),
                total_amount0: a0,
                total_amount1: a1,
            })
            .collect();
        volumes.sort_by(|a, b| a.contract_address.cmp(&b.contract_address));
        Ok(volumes)
    }
}
