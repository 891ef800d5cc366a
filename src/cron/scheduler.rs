//! Cron scheduler for periodic background tasks.
//!
//! Runs jobs like:
//! - Pruning blocks and events outside the retention windows
//! - Alerting when no new block was ingested for a while
//! - Re-enumerating the pair universe and rebuilding the filtered pair list
//! - Running the price and volume aggregation cycle

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Utc;
use log::{error, info};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::{alert::Alerter, chain::ChainReader, config::Settings, db::LedgerStore, worker::Aggregator};

use super::jobs;

/// Cron scheduler that manages periodic background jobs.
pub struct CronScheduler {
    store: Arc<dyn LedgerStore>,
    reader: Arc<dyn ChainReader>,
    aggregator: Arc<Aggregator>,
    alerter: Arc<dyn Alerter>,
    settings: Arc<CronSettings>,
}

/// Configuration for cron job intervals and the values the jobs need.
#[derive(Debug, Clone)]
pub struct CronSettings {
    pub prune_interval_secs: u64,
    pub block_retention: u64,
    pub tx_retention: u64,
    pub alert_interval_secs: u64,
    pub block_update_timeout_secs: i64,
    pub universe_refresh_interval_secs: u64,
    pub pair_refresh_interval_secs: u64,
    pub aggregate_interval_secs: u64,
}

impl CronSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            prune_interval_secs: settings.observer.prune_interval_secs,
            block_retention: settings.observer.block_retention,
            tx_retention: settings.observer.tx_retention,
            alert_interval_secs: settings.observer.alert_interval_secs,
            block_update_timeout_secs: settings.alert.block_update_timeout_secs,
            universe_refresh_interval_secs: settings.chain.universe_refresh_interval_secs,
            pair_refresh_interval_secs: settings.aggregator.pair_refresh_interval_secs,
            aggregate_interval_secs: settings.aggregator.refresh_interval_secs,
        }
    }
}

impl CronScheduler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        reader: Arc<dyn ChainReader>,
        aggregator: Arc<Aggregator>,
        alerter: Arc<dyn Alerter>,
        settings: CronSettings,
    ) -> Self {
        Self {
            store,
            reader,
            aggregator,
            alerter,
            settings: Arc::new(settings),
        }
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        self.register_prune_job(&scheduler).await?;
        self.register_staleness_alert_job(&scheduler).await?;
        self.register_refresh_universe_job(&scheduler).await?;
        self.register_refresh_pairs_job(&scheduler).await?;
        self.register_aggregate_job(&scheduler).await?;

        scheduler.start().await?;
        info!("Cron scheduler started with {} jobs", 5);

        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_prune_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let store = self.store.clone();
        let settings = self.settings.clone();
        let interval = settings.prune_interval_secs;

        let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _lock| {
            let store = store.clone();
            let settings = settings.clone();
            Box::pin(async move {
                if let Err(e) =
                    jobs::prune::run(store.as_ref(), settings.block_retention, settings.tx_retention)
                        .await
                {
                    error!("Failed to prune ledger: {:#}", e);
                }
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered prune job (every {}s)", interval);
        Ok(())
    }

    async fn register_staleness_alert_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let store = self.store.clone();
        let alerter = self.alerter.clone();
        let timeout = self.settings.block_update_timeout_secs;
        let interval = self.settings.alert_interval_secs;

        let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _lock| {
            let store = store.clone();
            let alerter = alerter.clone();
            Box::pin(async move {
                if let Err(e) =
                    jobs::staleness_alert::run(store.as_ref(), alerter.as_ref(), timeout, Utc::now())
                        .await
                {
                    error!("Failed to check block staleness: {:#}", e);
                }
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered staleness_alert job (every {}s)", interval);
        Ok(())
    }

    async fn register_refresh_universe_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let reader = self.reader.clone();
        let interval = self.settings.universe_refresh_interval_secs;

        let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _lock| {
            let reader = reader.clone();
            Box::pin(async move {
                if let Err(e) = jobs::refresh_universe::run(reader.as_ref()).await {
                    error!("Failed to refresh pair universe: {:#}", e);
                }
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered refresh_universe job (every {}s)", interval);
        Ok(())
    }

    async fn register_refresh_pairs_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let aggregator = self.aggregator.clone();
        let interval = self.settings.pair_refresh_interval_secs;

        let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _lock| {
            let aggregator = aggregator.clone();
            Box::pin(async move {
                if let Err(e) = jobs::refresh_pairs::run(&aggregator).await {
                    error!("Failed to refresh filtered pairs: {:#}", e);
                }
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered refresh_pairs job (every {}s)", interval);
        Ok(())
    }

    async fn register_aggregate_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let aggregator = self.aggregator.clone();
        let interval = self.settings.aggregate_interval_secs;

        let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _lock| {
            let aggregator = aggregator.clone();
            Box::pin(async move {
                if let Err(e) = jobs::aggregate::run(&aggregator).await {
                    error!("{:#}", e);
                }
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered aggregate job (every {}s)", interval);
        Ok(())
    }
}
