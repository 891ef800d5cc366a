use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use jemallocator::Jemalloc;
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use swapstat::{
    alert, server, Aggregator, BlockObserver, ChainReader, CronScheduler, CronSettings,
    LedgerStore, PostgresClient, RpcChainReader, Settings,
};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let settings = Settings::new()
        .context("Failed to load config.yaml. Please ensure it exists and is valid")?;
    settings.validate().context("Invalid configuration")?;

    let level: LevelFilter = settings.log.level.parse().unwrap_or(LevelFilter::Info);
    SimpleLogger::new()
        .with_level(level)
        .init()
        .context("Failed to initialize logger")?;

    let settings = Arc::new(settings);

    let postgres = PostgresClient::new(settings.postgres.clone())
        .await
        .context("Failed to initialize database connection")?;
    postgres.migrate().await.context("Failed to apply database schema")?;
    let store: Arc<dyn LedgerStore> = Arc::new(postgres);

    let reader: Arc<dyn ChainReader> = Arc::new(
        RpcChainReader::new(
            &settings.chain,
            Duration::from_secs(settings.observer.rpc_timeout_secs),
        )
        .context("Failed to initialize chain reader")?,
    );

    let alerter: Arc<dyn alert::Alerter> =
        Arc::from(alert::from_settings(&settings.alert).context("Failed to initialize alerter")?);

    let aggregator = Arc::new(Aggregator::new(&settings, reader.clone(), store.clone()));

    // The observer decodes amounts with decimals from the first snapshot, so
    // one full cycle runs before anything is spawned.
    match reader.refresh_watched_addresses().await {
        Ok(count) => info!("Watching {} pairs", count),
        Err(e) => warn!("Failed to enumerate pair universe: {}", e),
    }
    aggregator.refresh_pairs().await;
    if let Err(e) = aggregator.run_cycle().await {
        warn!("Initial aggregation cycle failed: {:#}", e);
    }

    let listen_addr: SocketAddr = settings
        .server
        .listen_addr
        .parse()
        .context("Invalid server.listen_addr")?;

    let cancellation_token = CancellationToken::new();

    let observer = BlockObserver::new(&settings, store.clone(), reader.clone(), aggregator.clone());
    let observer_token = cancellation_token.child_token();
    let observer_handle = tokio::spawn(async move {
        observer.run(observer_token).await;
    });

    let cron_scheduler = CronScheduler::new(
        store.clone(),
        reader.clone(),
        aggregator.clone(),
        alerter,
        CronSettings::from_settings(&settings),
    );

    let cron_token = cancellation_token.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = cron_scheduler.run(cron_token).await {
            error!("Cron scheduler failed: {:#}", e);
        }
    });

    info!("Cron scheduler started - background jobs will run periodically");

    let server_token = cancellation_token.child_token();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::serve(listen_addr, aggregator, server_token).await {
            error!("HTTP server failed: {:#}", e);
        }
    });

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("swapstat running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    info!("Finishing all tasks...");

    cancellation_token.cancel();

    info!("Waiting for block observer to stop...");
    let _ = observer_handle.await;

    info!("Waiting for cron scheduler to stop...");
    let _ = cron_handle.await;

    info!("Waiting for HTTP server to stop...");
    let _ = server_handle.await;

    info!("All tasks stopped");
    Ok(())
}
