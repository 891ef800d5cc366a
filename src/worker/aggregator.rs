use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use log::{debug, info, warn};
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::{
    chain::{ChainError, ChainReader},
    config::Settings,
    db::LedgerStore,
    utils::{normalize_address, u256_to_f64},
    worker::{
        pair_filter,
        price_resolver::{PriceGraph, PriceResolver},
        DecimalsError, DecimalsQuery,
    },
};

/// Concurrent pair metadata reads per cycle.
const METADATA_CONCURRENCY: usize = 16;

/// One pair as published by the stat endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwapPairInfo {
    #[serde(rename = "swap_pair_contract")]
    pub contract: String,
    pub base_symbol: String,
    pub quote_symbol: String,
    /// Quote units per base unit, from reserves.
    pub last_price: f64,
    #[serde(rename = "base_volume_24_h")]
    pub base_volume_24h: f64,
    #[serde(rename = "quote_volume_24_h")]
    pub quote_volume_24h: f64,

    #[serde(skip)]
    pub decimals0: u8,
    #[serde(skip)]
    pub decimals1: u8,
    #[serde(skip)]
    pub reserve0: f64,
    #[serde(skip)]
    pub reserve1: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyrupPoolInfo {
    pub name: String,
    pub tvl: f64,
}

/// Everything one aggregation cycle produces. Published as a whole.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Pairs that met the qualification volume, in pair universe order.
    pub pairs: Vec<SwapPairInfo>,
    /// Decimals of every pair with metadata this cycle, qualified or not.
    pub pair_decimals: FxHashMap<String, (u8, u8)>,
    pub token_prices: BTreeMap<String, f64>,
    pub syrup_pools: Vec<SyrupPoolInfo>,
    pub total_volume: f64,
    pub total_locked: f64,
    pub syrup_tvl: f64,
    pub updated_at: DateTime<Utc>,
}

/// Builds and publishes the price, volume and TVL snapshot.
///
/// The filtered pair list and the published snapshot each sit behind their
/// own mutex, held only to clone or swap an `Arc`. Readers never wait on RPC
/// or store calls, and a failed cycle leaves the previous snapshot in place.
///
/// Cycles and pair refreshes each run one at a time. A tick that arrives
/// while the previous run is still in flight is skipped, so an older cycle
/// can never publish over a newer one.
pub struct Aggregator {
    reader: Arc<dyn ChainReader>,
    store: Arc<dyn LedgerStore>,
    resolver: PriceResolver,
    certified_pairs: Vec<String>,
    syrup_pools: Vec<String>,
    governance_token: String,
    governance_symbol: String,
    primary_pool_name: String,
    qualified_volume: f64,
    min_liquidity: f64,
    /// Bounds the store query. Reader calls are bounded by the reader.
    call_timeout: Duration,
    filtered_pairs: Mutex<Arc<Vec<String>>>,
    snapshot: Mutex<Arc<Snapshot>>,
    refresh_running: tokio::sync::Mutex<()>,
    cycle_running: tokio::sync::Mutex<()>,
}

impl Aggregator {
    pub fn new(
        settings: &Settings,
        reader: Arc<dyn ChainReader>,
        store: Arc<dyn LedgerStore>,
    ) -> Self {
        let normalize_all =
            |list: &[String]| list.iter().map(|a| normalize_address(a)).collect::<Vec<_>>();

        Self {
            reader,
            store,
            resolver: PriceResolver::new(&settings.aggregator),
            certified_pairs: normalize_all(&settings.chain.certified_pairs),
            syrup_pools: normalize_all(&settings.chain.syrup_pools),
            governance_token: normalize_address(&settings.chain.governance_token_address),
            governance_symbol: settings.chain.governance_token_symbol.clone(),
            primary_pool_name: settings.chain.primary_pool_name.clone(),
            qualified_volume: settings.aggregator.qualified_volume,
            min_liquidity: settings.aggregator.min_liquidity,
            call_timeout: Duration::from_secs(settings.observer.rpc_timeout_secs),
            filtered_pairs: Mutex::new(Arc::new(Vec::new())),
            snapshot: Mutex::new(Arc::new(Snapshot::default())),
            refresh_running: tokio::sync::Mutex::new(()),
            cycle_running: tokio::sync::Mutex::new(()),
        }
    }

    /// Last published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn filtered_pairs(&self) -> Arc<Vec<String>> {
        self.filtered_pairs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-runs the anti-spoofing filter over the reader's pair universe and
    /// swaps the result in. Returns the number of kept pairs, or the current
    /// count when another refresh is still running.
    pub async fn refresh_pairs(&self) -> usize {
        let Ok(_running) = self.refresh_running.try_lock() else {
            info!("Pair refresh still in flight, skipping this tick");
            return self.filtered_pairs().len();
        };

        let start = Instant::now();
        let trusted =
            pair_filter::trusted_symbols(self.reader.as_ref(), &self.certified_pairs).await;
        let universe = self.reader.watched_addresses();
        let pairs = pair_filter::filter_pairs(self.reader.as_ref(), &universe, &trusted).await;

        info!(
            "Filtered pairs in {:?}: kept {} of {} ({} trusted symbols)",
            start.elapsed(),
            pairs.len(),
            universe.len(),
            trusted.len()
        );

        let count = pairs.len();
        *self
            .filtered_pairs
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(pairs);
        count
    }

    /// Builds a new snapshot and publishes it. On error nothing is published.
    /// Returns at once when another cycle is still running.
    pub async fn run_cycle(&self) -> anyhow::Result<()> {
        let Ok(_running) = self.cycle_running.try_lock() else {
            info!("Aggregation cycle still in flight, skipping this tick");
            return Ok(());
        };

        let start = Instant::now();
        let snapshot = self.build_snapshot().await?;

        info!(
            "Aggregation cycle done in {:?}: {} qualified pairs, {} prices, volume {:.2}, locked {:.2}, syrup {:.2}",
            start.elapsed(),
            snapshot.pairs.len(),
            snapshot.token_prices.len(),
            snapshot.total_volume,
            snapshot.total_locked,
            snapshot.syrup_tvl
        );

        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
        Ok(())
    }

    async fn read_pair_info(&self, pair: &str) -> Result<SwapPairInfo, ChainError> {
        let (raw0, raw1) = self.reader.read_reserves(pair).await?;
        let (token0, token1) = self.reader.read_pair_tokens(pair).await?;
        let info0 = self.reader.read_token(&token0).await?;
        let info1 = self.reader.read_token(&token1).await?;

        let reserve0 = u256_to_f64(raw0, info0.decimals);
        let reserve1 = u256_to_f64(raw1, info1.decimals);
        let last_price = if raw0.is_zero() { 0.0 } else { reserve1 / reserve0 };

        Ok(SwapPairInfo {
            contract: pair.to_string(),
            base_symbol: info0.symbol,
            quote_symbol: info1.symbol,
            last_price,
            base_volume_24h: 0.0,
            quote_volume_24h: 0.0,
            decimals0: info0.decimals,
            decimals1: info1.decimals,
            reserve0,
            reserve1,
        })
    }

    /// Live metadata of every filtered pair. Reverted reads and dust pairs are
    /// skipped; a transport failure aborts the whole pass.
    async fn collect_pair_infos(&self) -> anyhow::Result<Vec<SwapPairInfo>> {
        let pairs = self.filtered_pairs();

        let results: Vec<(String, Result<SwapPairInfo, ChainError>)> =
            stream::iter(pairs.iter().cloned())
                .map(|pair| async move {
                    let result = self.read_pair_info(&pair).await;
                    (pair, result)
                })
                .buffered(METADATA_CONCURRENCY)
                .collect()
                .await;

        let mut infos = Vec::with_capacity(results.len());
        for (pair, result) in results {
            match result {
                Ok(info) if info.reserve0 * info.reserve1 < self.min_liquidity => {
                    debug!("Skipping dust pair {}", pair);
                },
                Ok(info) => infos.push(info),
                Err(e) if e.is_transport() => {
                    return Err(anyhow!(e).context(format!("reading pair {}", pair)));
                },
                Err(e) => warn!("Skipping pair {}: {}", pair, e),
            }
        }
        Ok(infos)
    }

    async fn collect_syrup_pools(&self, governance_price: f64) -> Vec<SyrupPoolInfo> {
        let mut pools = Vec::with_capacity(self.syrup_pools.len());

        let decimals = match self.reader.read_token(&self.governance_token).await {
            Ok(info) => info.decimals,
            Err(e) => {
                warn!("Failed to read governance token {}: {}", self.governance_token, e);
                return pools;
            },
        };

        for (idx, pool) in self.syrup_pools.iter().enumerate() {
            match self.read_syrup_pool(idx, pool, decimals, governance_price).await {
                Ok(info) => pools.push(info),
                Err(e) => warn!("Skipping syrup pool {}: {}", pool, e),
            }
        }
        pools
    }

    async fn read_syrup_pool(
        &self,
        idx: usize,
        pool: &str,
        decimals: u8,
        governance_price: f64,
    ) -> Result<SyrupPoolInfo, ChainError> {
        let name = if idx == 0 {
            self.primary_pool_name.clone()
        } else {
            let reward = self.reader.read_reward_token(pool).await?;
            self.reader.read_token_name(&reward).await?
        };

        let balance = self.reader.read_balance(&self.governance_token, pool).await?;

        Ok(SyrupPoolInfo {
            name,
            tvl: u256_to_f64(balance, decimals) * governance_price,
        })
    }

    async fn build_snapshot(&self) -> anyhow::Result<Snapshot> {
        let mut infos = self.collect_pair_infos().await?;

        let volumes = tokio::time::timeout(self.call_timeout, self.store.volume_24h())
            .await
            .map_err(|_| anyhow!("volume query timed out after {:?}", self.call_timeout))?
            .context("loading 24h volumes")?;
        let volumes: FxHashMap<&str, (f64, f64)> = volumes
            .iter()
            .map(|v| (v.contract_address.as_str(), (v.total_amount0, v.total_amount1)))
            .collect();

        let mut graph = PriceGraph::new();
        for info in infos.iter_mut() {
            if let Some(&(v0, v1)) = volumes.get(info.contract.as_str()) {
                info.base_volume_24h = v0;
                info.quote_volume_24h = v1;
            }
            graph.add_pair(
                &info.base_symbol,
                &info.quote_symbol,
                info.last_price,
                info.base_volume_24h,
                info.quote_volume_24h,
            );
        }

        let token_prices = self.resolver.resolve(&graph);

        let mut snapshot = Snapshot {
            pair_decimals: infos
                .iter()
                .map(|i| (i.contract.clone(), (i.decimals0, i.decimals1)))
                .collect(),
            ..Default::default()
        };

        for info in infos {
            let mut volume = 0.0;
            let mut locked = 0.0;
            if let Some(price) = token_prices.get(&info.base_symbol) {
                volume += info.base_volume_24h * price;
                locked += info.reserve0 * price;
            }
            if let Some(price) = token_prices.get(&info.quote_symbol) {
                volume += info.quote_volume_24h * price;
                locked += info.reserve1 * price;
            }

            if volume >= self.qualified_volume {
                snapshot.total_volume += volume;
                snapshot.total_locked += locked;
                snapshot.pairs.push(info);
            }
        }

        let governance_price = token_prices
            .get(&self.governance_symbol)
            .copied()
            .unwrap_or(0.0);
        snapshot.syrup_pools = self.collect_syrup_pools(governance_price).await;
        snapshot.syrup_tvl = snapshot.syrup_pools.iter().map(|p| p.tvl).sum();

        snapshot.token_prices = token_prices;
        snapshot.updated_at = Utc::now();
        Ok(snapshot)
    }
}

impl DecimalsQuery for Aggregator {
    fn decimals(&self, pair: &str) -> Result<(u8, u8), DecimalsError> {
        let pair = normalize_address(pair);
        self.snapshot()
            .pair_decimals
            .get(&pair)
            .copied()
            .ok_or(DecimalsError::NotFound(pair))
    }
}
