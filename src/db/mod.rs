use async_trait::async_trait;

pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::MemoryLedger;
pub use models::{BlockRecord, LedgerEvent, PairVolume, SwapEventRecord, TxStatus};
pub use postgres::PostgresClient;

/// Seconds covered by the rolling volume window.
pub const VOLUME_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Result of persisting one block with its events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertSummary {
    pub inserted_events: usize,
    /// Events dropped because an amount did not fit the storage column.
    pub skipped_out_of_range: usize,
}

/// Rows removed by a fork repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub blocks: u64,
    pub pending_events: u64,
}

/// Transactional persistence for observed blocks and their events.
///
/// The observer is the only writer. Multi-row operations are atomic: either
/// every row of the call is applied or none is.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Highest-height block, if any.
    async fn head(&self) -> anyhow::Result<Option<BlockRecord>>;

    /// Inserts the block and its events in one transaction. Events whose
    /// amounts overflow the column are skipped; any other failure rolls the
    /// whole call back.
    async fn insert_block(
        &self,
        block: &BlockRecord,
        events: &[LedgerEvent],
    ) -> anyhow::Result<InsertSummary>;

    /// Deletes the block at `height` and the still pending events at that
    /// height. Confirmed events are kept.
    async fn delete_block(&self, height: u64) -> anyhow::Result<DeleteSummary>;

    /// Sets `confirmed_num = head_height + 1 - height` on pending events and
    /// confirms those reaching `threshold`. Returns how many were confirmed.
    async fn update_confirmations(&self, head_height: u64, threshold: u64)
        -> anyhow::Result<u64>;

    /// Deletes blocks with height strictly below `before_height`.
    async fn prune_blocks(&self, before_height: u64) -> anyhow::Result<u64>;

    /// Deletes events with height strictly below `before_height`, any status.
    async fn prune_events(&self, before_height: u64) -> anyhow::Result<u64>;

    /// Per-pair amount sums over events whose block time is within
    /// [`VOLUME_WINDOW_SECS`] of the head's block time, ordered by address.
    async fn volume_24h(&self) -> anyhow::Result<Vec<PairVolume>>;
}
