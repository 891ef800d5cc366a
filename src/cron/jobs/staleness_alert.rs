//! Job to alert when the observer stops ingesting blocks.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::debug;

use crate::{alert::Alerter, db::LedgerStore};

/// Sends one alert if the newest block was ingested more than
/// `timeout_secs` before `now`. Returns whether an alert went out.
///
/// Nothing is checked while the ledger is empty.
pub async fn run(
    store: &dyn LedgerStore,
    alerter: &dyn Alerter,
    timeout_secs: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let head = match store.head().await.context("Failed to read ledger head")? {
        Some(head) if head.height > 0 => head,
        _ => {
            debug!("Ledger is empty, skipping staleness check");
            return Ok(false);
        },
    };

    let lag = now.signed_duration_since(head.created_at).num_seconds();
    if lag <= timeout_secs {
        return Ok(false);
    }

    let message = format!(
        "swapstat: big lagger now, last block fetched at {}, height={}",
        head.created_at.to_rfc3339(),
        head.height
    );
    alerter
        .send(&message)
        .await
        .context("Failed to deliver staleness alert")?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration;

    use super::*;
    use crate::db::{BlockRecord, MemoryLedger};

    #[derive(Default)]
    struct RecordingAlerter {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Alerter for RecordingAlerter {
        async fn send(&self, message: &str) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    async fn ledger_at(height: u64) -> MemoryLedger {
        let store = MemoryLedger::new();
        let block = BlockRecord::new(height, "0xaa".to_string(), "0x99".to_string(), 1_700_000_000);
        store.insert_block(&block, &[]).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_fresh_head_does_not_alert() {
        let store = ledger_at(100).await;
        let alerter = RecordingAlerter::default();

        let sent = run(&store, &alerter, 60, Utc::now()).await.unwrap();

        assert!(!sent);
        assert!(alerter.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_head_alerts_once_per_check() {
        let store = ledger_at(100).await;
        let alerter = RecordingAlerter::default();
        let later = Utc::now() + Duration::seconds(120);

        assert!(run(&store, &alerter, 60, later).await.unwrap());
        assert!(run(&store, &alerter, 60, later).await.unwrap());

        let sent = alerter.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains("height=100"));
    }

    #[tokio::test]
    async fn test_empty_ledger_is_skipped() {
        let store = MemoryLedger::new();
        let alerter = RecordingAlerter::default();
        let later = Utc::now() + Duration::seconds(3_600);

        assert!(!run(&store, &alerter, 60, later).await.unwrap());
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let store = ledger_at(100).await;
        store.set_offline(true);
        let alerter = RecordingAlerter::default();

        assert!(run(&store, &alerter, 60, Utc::now()).await.is_err());
    }
}
