use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    chain::{ChainError, ChainReader},
    config::Settings,
    db::{models::BlockRecord, LedgerStore},
    worker::{parser, DecimalsQuery},
};

/// Interval for logging progress updates
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Wait between failed fetch attempts. Fixed, retried forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self { interval }
    }

    pub async fn wait(&self) {
        tokio::time::sleep(self.interval).await;
    }
}

/// What one observer step did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The block at `height` and its swaps were stored.
    Advanced {
        height: u64,
        events: usize,
        confirmed: u64,
    },
    /// The fetched block did not extend the head, so the head at `height` was
    /// dropped.
    ForkRepaired { height: u64 },
}

/// Follows the chain one block at a time into the ledger.
///
/// Each step reads the head, fetches the next block, and either extends the
/// ledger or, when the block's parent is not the head, drops the head. Only a
/// single block is ever rolled back per step; deeper forks unwind one step at
/// a time as long as the orphaned events are still pending.
pub struct BlockObserver {
    store: Arc<dyn LedgerStore>,
    reader: Arc<dyn ChainReader>,
    decimals: Arc<dyn DecimalsQuery>,
    start_height: u64,
    confirmations: u64,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl BlockObserver {
    pub fn new(
        settings: &Settings,
        store: Arc<dyn LedgerStore>,
        reader: Arc<dyn ChainReader>,
        decimals: Arc<dyn DecimalsQuery>,
    ) -> Self {
        Self {
            store,
            reader,
            decimals,
            start_height: settings.chain.start_height,
            confirmations: settings.chain.confirmations,
            retry: RetryPolicy::fixed(Duration::from_millis(
                settings.chain.fetch_interval_milliseconds,
            )),
            call_timeout: Duration::from_secs(settings.observer.rpc_timeout_secs),
        }
    }

    pub fn with_start_height(mut self, start_height: u64) -> Self {
        self.start_height = start_height;
        self
    }

    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn bounded<T>(
        &self,
        what: &str,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| anyhow!("{} timed out after {:?}", what, self.call_timeout))?
    }

    /// Fetches and applies the block after the current head.
    pub async fn step(&self) -> anyhow::Result<StepOutcome> {
        let head = self.bounded("reading head", self.store.head()).await?;
        let (head_height, head_hash) = head
            .as_ref()
            .map_or((0, ""), |b| (b.height, b.block_hash.as_str()));

        let target = if head_height == 0 && self.start_height != 0 {
            self.start_height
        } else {
            head_height + 1
        };

        let watched = self.reader.watched_addresses();
        let block = self
            .reader
            .fetch_block(target, &watched)
            .await
            .map_err(|e| match e {
                ChainError::NotFound(_) => anyhow::Error::new(e),
                other => anyhow::Error::new(other).context(format!("fetching block {}", target)),
            })?;

        if head_height != 0 && block.parent_hash != head_hash {
            let deleted = self
                .bounded("deleting head", self.store.delete_block(head_height))
                .await
                .with_context(|| format!("repairing fork at height {}", head_height))?;
            warn!(
                "Fork at height {}: block {} has parent {}, expected {}. Dropped head and {} pending events",
                head_height, target, block.parent_hash, head_hash, deleted.pending_events
            );
            return Ok(StepOutcome::ForkRepaired {
                height: head_height,
            });
        }

        let parsed = parser::parse_swaps(&block.events, block.block_time, self.decimals.as_ref());
        if parsed.skipped > 0 {
            debug!("Skipped {} swap events in block {}", parsed.skipped, target);
        }

        let record = BlockRecord::new(target, block.hash, block.parent_hash, block.block_time);
        let summary = self
            .bounded("storing block", self.store.insert_block(&record, &parsed.events))
            .await
            .with_context(|| format!("storing block {}", target))?;

        let confirmed = self
            .bounded(
                "updating confirmations",
                self.store.update_confirmations(target, self.confirmations),
            )
            .await?;

        Ok(StepOutcome::Advanced {
            height: target,
            events: summary.inserted_events,
            confirmed,
        })
    }

    /// Steps until cancelled. Failures never end the loop; the step is
    /// retried after the retry interval.
    pub async fn run(&self, cancellation_token: CancellationToken) {
        let mut last_progress_log = Instant::now();
        info!("Block observer started");

        loop {
            if cancellation_token.is_cancelled() {
                info!("Block observer received cancellation signal");
                break;
            }

            let result = tokio::select! {
                _ = cancellation_token.cancelled() => continue,
                r = self.step() => r,
            };

            match result {
                Ok(StepOutcome::Advanced { height, .. }) => {
                    if last_progress_log.elapsed() >= PROGRESS_LOG_INTERVAL {
                        info!("Observed block {}", height);
                        last_progress_log = Instant::now();
                    }
                },
                Ok(StepOutcome::ForkRepaired { .. }) => {},
                Err(e) => {
                    match e.downcast_ref::<ChainError>() {
                        Some(ChainError::NotFound(height)) => {
                            debug!("Block {} not produced yet", height)
                        },
                        _ => warn!("Observer step failed: {:#}", e),
                    }
                    tokio::select! {
                        _ = cancellation_token.cancelled() => {},
                        _ = self.retry.wait() => {},
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{models::TxStatus, MemoryLedger};
    use crate::test_utils::{test_settings, FakeChainReader, StaticDecimals};

    const PAIR: &str = "0x00000000000000000000000000000000000000aa";

    struct Harness {
        store: Arc<MemoryLedger>,
        chain: Arc<FakeChainReader>,
        observer: BlockObserver,
    }

    fn harness(start_height: u64, confirmations: u64) -> Harness {
        let store = Arc::new(MemoryLedger::new());
        let chain = Arc::new(FakeChainReader::new(vec![PAIR.to_string()]));
        let decimals = Arc::new(StaticDecimals::new(&[(PAIR, 18, 18)]));
        let observer = BlockObserver::new(&test_settings(), store.clone(), chain.clone(), decimals)
            .with_start_height(start_height)
            .with_confirmations(confirmations)
            .with_retry(RetryPolicy::fixed(Duration::from_millis(500)));
        Harness {
            store,
            chain,
            observer,
        }
    }

    #[tokio::test]
    async fn test_advances_and_chains_parent_hashes() {
        let h = harness(100, 3);
        h.chain.extend_canonical(100, 5, "a");

        for i in 0..5 {
            let outcome = h.observer.step().await.unwrap();
            assert!(matches!(outcome, StepOutcome::Advanced { height, .. } if height == 100 + i));
        }

        let blocks = h.store.blocks().await;
        assert_eq!(blocks.len(), 5);
        assert_eq!(h.store.head().await.unwrap().unwrap().height, 104);
        for pair in blocks.windows(2) {
            assert_eq!(pair[1].parent_hash, pair[0].block_hash);
        }

        // Chain tip reached
        assert!(h.observer.step().await.is_err());
    }

    #[tokio::test]
    async fn test_cold_start_without_start_height_begins_at_one() {
        let h = harness(0, 3);
        h.chain.extend_canonical(1, 2, "a");

        h.observer.step().await.unwrap();

        assert_eq!(h.store.head().await.unwrap().unwrap().height, 1);
    }

    #[tokio::test]
    async fn test_fork_drops_head_then_recovers() {
        let h = harness(10, 3);
        h.chain.extend_canonical(10, 1, "a");
        h.chain.add_swap(10, PAIR, 1, 2);
        h.observer.step().await.unwrap();
        assert_eq!(h.store.events().await.len(), 1);

        // Height 10 gets replaced on chain; height 11 builds on the new one.
        h.chain.extend_canonical(10, 2, "b");

        let outcome = h.observer.step().await.unwrap();
        assert_eq!(outcome, StepOutcome::ForkRepaired { height: 10 });
        assert!(h.store.blocks().await.is_empty());
        assert!(h.store.events().await.is_empty());

        let outcome = h.observer.step().await.unwrap();
        assert!(matches!(outcome, StepOutcome::Advanced { height: 10, .. }));
        let head = h.store.head().await.unwrap().unwrap();
        assert_eq!(head.block_hash, h.chain.hash_at(10).unwrap());

        let outcome = h.observer.step().await.unwrap();
        assert!(matches!(outcome, StepOutcome::Advanced { height: 11, .. }));
    }

    #[tokio::test]
    async fn test_fork_keeps_confirmed_events() {
        let h = harness(10, 1);
        h.chain.extend_canonical(10, 1, "a");
        h.chain.add_swap(10, PAIR, 1, 2);
        h.observer.step().await.unwrap();

        h.chain.extend_canonical(10, 2, "b");
        h.observer.step().await.unwrap();

        let events = h.store.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, TxStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_confirmation_counter_monotonic() {
        let confirmations = 3;
        let h = harness(1, confirmations);
        h.chain.extend_canonical(1, 6, "a");
        h.chain.add_swap(1, PAIR, 5, 5);

        let mut last = 0;
        for step in 0..6u64 {
            h.observer.step().await.unwrap();
            let ev = h.store.events().await[0].clone();
            assert!(ev.confirmed_num >= last);
            last = ev.confirmed_num;

            // Head is at height step + 1
            let expected = if step + 1 >= confirmations {
                TxStatus::Confirmed
            } else {
                TxStatus::Pending
            };
            assert_eq!(ev.status, expected, "after step {}", step);
        }
        assert_eq!(last, confirmations);
    }

    #[tokio::test]
    async fn test_out_of_range_swap_does_not_block_height() {
        let h = harness(1, 3);
        h.chain.extend_canonical(1, 1, "a");
        // 1e12 tokens does not fit NUMERIC(28,18)
        h.chain.add_swap(1, PAIR, 1_000_000_000_000, 1);
        h.chain.add_swap(1, PAIR, 2, 3);

        let outcome = h.observer.step().await.unwrap();

        assert!(matches!(outcome, StepOutcome::Advanced { height: 1, events: 1, .. }));
        assert_eq!(h.store.events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_leaves_head_unchanged() {
        let h = harness(1, 3);
        h.chain.extend_canonical(1, 2, "a");
        h.observer.step().await.unwrap();

        h.store.set_offline(true);
        assert!(h.observer.step().await.is_err());
        h.store.set_offline(false);

        assert_eq!(h.store.head().await.unwrap().unwrap().height, 1);
        h.observer.step().await.unwrap();
        assert_eq!(h.store.head().await.unwrap().unwrap().height, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_at_fixed_interval() {
        let h = harness(1, 3);
        let observer = Arc::new(h.observer);
        let token = CancellationToken::new();

        let task = {
            let observer = observer.clone();
            let token = token.clone();
            tokio::spawn(async move { observer.run(token).await })
        };

        // Nothing on chain yet: every attempt fails and waits 500ms.
        tokio::time::sleep(Duration::from_millis(1_250)).await;
        assert_eq!(h.chain.fetch_attempts(), 3);
        assert!(h.store.head().await.unwrap().is_none());

        h.chain.extend_canonical(1, 1, "a");
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.store.head().await.unwrap().unwrap().height, 1);

        token.cancel();
        task.await.unwrap();
    }
}
