use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::Filter,
    sol_types::SolEvent,
    transports::{RpcError, TransportError},
};
use anyhow::Context;
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use log::{debug, info, warn};
use moka::future::Cache;
use url::Url;

use super::{ChainError, ChainReader, FetchedBlock, RawSwapEvent, TokenInfo};
use crate::abis::{IFactory, IPair, ISmartChef, Swap, IERC20};
use crate::config::ChainSettings;
use crate::utils::{hex_encode, normalize_address};

/// Concurrent `allPairs(i)` calls while enumerating the factory.
const ENUMERATION_CONCURRENCY: usize = 16;

impl From<alloy::contract::Error> for ChainError {
    fn from(e: alloy::contract::Error) -> Self {
        match e {
            alloy::contract::Error::TransportError(e) => e.into(),
            other => ChainError::Contract(other.to_string()),
        }
    }
}

impl From<TransportError> for ChainError {
    fn from(e: TransportError) -> Self {
        match e {
            // The node answered: the call itself failed.
            RpcError::ErrorResp(payload) => ChainError::Contract(payload.to_string()),
            other => ChainError::Transport(other.to_string()),
        }
    }
}

/// [`ChainReader`] over a JSON-RPC HTTP endpoint.
///
/// Token metadata never changes on chain, so symbol and decimals are cached
/// per address. The pair universe lives behind a lock that is only held to
/// clone or replace the list. Only one enumeration runs at a time.
pub struct RpcChainReader {
    provider: DynProvider,
    factory: Option<Address>,
    certified_pairs: Vec<String>,
    timeout: Duration,
    tokens: Cache<Address, TokenInfo>,
    watched: RwLock<Arc<Vec<String>>>,
    refresh_running: tokio::sync::Mutex<()>,
}

impl RpcChainReader {
    pub fn new(settings: &ChainSettings, timeout: Duration) -> anyhow::Result<Self> {
        let url = Url::parse(&settings.rpc_url).context("Invalid RPC URL")?;
        let provider = DynProvider::new(ProviderBuilder::new().connect_http(url));

        let factory = if settings.factory_address.is_empty() {
            None
        } else {
            Some(
                settings
                    .factory_address
                    .parse()
                    .context("Invalid factory address")?,
            )
        };

        let certified_pairs: Vec<String> = settings
            .certified_pairs
            .iter()
            .map(|p| normalize_address(p))
            .collect();

        let tokens = Cache::builder().max_capacity(10_000).build();

        Ok(Self {
            provider,
            factory,
            watched: RwLock::new(Arc::new(certified_pairs.clone())),
            certified_pairs,
            timeout,
            tokens,
            refresh_running: tokio::sync::Mutex::new(()),
        })
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, ChainError>
    where
        F: Future<Output = Result<T, ChainError>>,
    {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            ChainError::Transport(format!("call timed out after {:?}", self.timeout))
        })?
    }

    async fn enumerate_factory(&self, factory: Address) -> Result<Vec<String>, ChainError> {
        let contract = IFactory::new(factory, &self.provider);
        let len = self
            .timed(async { Ok::<_, ChainError>(contract.allPairsLength().call().await?) })
            .await?;
        let len: u64 = len
            .try_into()
            .map_err(|_| ChainError::Contract(format!("pair count {} out of range", len)))?;

        info!("Enumerating {} pairs of factory {}", len, factory);

        let pairs: Vec<String> = stream::iter(0..len)
            .map(|i| {
                let contract = &contract;
                async move {
                    let call = contract.allPairs(U256::from(i));
                    let pair = self
                        .timed(async { Ok::<_, ChainError>(call.call().await?) })
                        .await?;
                    Ok::<_, ChainError>(hex_encode(pair.as_slice()))
                }
            })
            .buffered(ENUMERATION_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(pairs)
    }
}

fn parse_address(addr: &str) -> Result<Address, ChainError> {
    addr.parse()
        .map_err(|_| ChainError::Contract(format!("invalid address {}", addr)))
}

/// Decodes one log of the block at `height`. Logs are queried by block hash,
/// so the block's own height and hash are used rather than the optional
/// fields on the log.
fn decode_swap(
    log: &alloy::rpc::types::Log,
    height: u64,
    block_hash: &str,
) -> Option<RawSwapEvent> {
    let swap = match Swap::decode_log_data(&log.inner.data) {
        Ok(s) => s,
        Err(e) => {
            warn!(
                "Skipping undecodable swap log of {} in tx {:?}: {}",
                log.address(),
                log.transaction_hash,
                e
            );
            return None;
        },
    };

    Some(RawSwapEvent {
        contract: hex_encode(log.address().as_slice()),
        amount0_in: swap.amount0In,
        amount1_in: swap.amount1In,
        amount0_out: swap.amount0Out,
        amount1_out: swap.amount1Out,
        sender: hex_encode(swap.sender.as_slice()),
        to: hex_encode(swap.to.as_slice()),
        tx_hash: log.transaction_hash.map(|h| hex_encode(h.as_slice())).unwrap_or_default(),
        block_hash: block_hash.to_string(),
        block_number: height,
    })
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn fetch_block(
        &self,
        height: u64,
        watched: &[String],
    ) -> Result<FetchedBlock, ChainError> {
        let block = self
            .timed(async {
                let block = self
                    .provider
                    .get_block_by_number(BlockNumberOrTag::Number(height))
                    .await?;
                Ok::<_, ChainError>(block)
            })
            .await?
            .ok_or(ChainError::NotFound(height))?;

        let hash = block.header.hash;
        let mut fetched = FetchedBlock {
            hash: hex_encode(hash.as_slice()),
            parent_hash: hex_encode(block.header.parent_hash.as_slice()),
            block_time: block.header.timestamp as i64,
            events: Vec::new(),
        };

        // An empty address list would match every contract.
        if watched.is_empty() {
            return Ok(fetched);
        }

        let addresses = watched
            .iter()
            .map(|a| parse_address(a))
            .collect::<Result<Vec<_>, _>>()?;
        let filter = Filter::new()
            .at_block_hash(hash)
            .event_signature(Swap::SIGNATURE_HASH)
            .address(addresses);

        let logs = self
            .timed(async { Ok::<_, ChainError>(self.provider.get_logs(&filter).await?) })
            .await?;

        fetched.events = logs
            .iter()
            .filter_map(|log| decode_swap(log, height, &fetched.hash))
            .collect();
        debug!(
            "Fetched block {} with {} swap events",
            height,
            fetched.events.len()
        );
        Ok(fetched)
    }

    fn watched_addresses(&self) -> Vec<String> {
        let watched = self.watched.read().unwrap_or_else(PoisonError::into_inner);
        watched.as_ref().clone()
    }

    async fn refresh_watched_addresses(&self) -> Result<usize, ChainError> {
        let Ok(_running) = self.refresh_running.try_lock() else {
            info!("Pair universe refresh still in flight, skipping this tick");
            return Ok(self.watched_addresses().len());
        };

        let pairs = match self.factory {
            Some(factory) => self.enumerate_factory(factory).await?,
            None => self.certified_pairs.clone(),
        };

        let count = pairs.len();
        *self.watched.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(pairs);
        Ok(count)
    }

    async fn read_pair_tokens(&self, pair: &str) -> Result<(String, String), ChainError> {
        let contract = IPair::new(parse_address(pair)?, &self.provider);
        let token0 = self
            .timed(async { Ok::<_, ChainError>(contract.token0().call().await?) })
            .await?;
        let token1 = self
            .timed(async { Ok::<_, ChainError>(contract.token1().call().await?) })
            .await?;
        Ok((hex_encode(token0.as_slice()), hex_encode(token1.as_slice())))
    }

    async fn read_token(&self, token: &str) -> Result<TokenInfo, ChainError> {
        let address = parse_address(token)?;
        if let Some(info) = self.tokens.get(&address).await {
            return Ok(info);
        }

        let contract = IERC20::new(address, &self.provider);
        let symbol = self
            .timed(async { Ok::<_, ChainError>(contract.symbol().call().await?) })
            .await?;
        let decimals = self
            .timed(async { Ok::<_, ChainError>(contract.decimals().call().await?) })
            .await?;

        let info = TokenInfo {
            address: hex_encode(address.as_slice()),
            symbol,
            decimals,
        };
        self.tokens.insert(address, info.clone()).await;
        Ok(info)
    }

    async fn read_token_name(&self, token: &str) -> Result<String, ChainError> {
        let contract = IERC20::new(parse_address(token)?, &self.provider);
        self.timed(async { Ok::<_, ChainError>(contract.name().call().await?) }).await
    }

    async fn read_reserves(&self, pair: &str) -> Result<(U256, U256), ChainError> {
        let contract = IPair::new(parse_address(pair)?, &self.provider);
        let reserves = self
            .timed(async { Ok::<_, ChainError>(contract.getReserves().call().await?) })
            .await?;
        Ok((U256::from(reserves.reserve0), U256::from(reserves.reserve1)))
    }

    async fn read_balance(&self, token: &str, owner: &str) -> Result<U256, ChainError> {
        let contract = IERC20::new(parse_address(token)?, &self.provider);
        let owner = parse_address(owner)?;
        self.timed(async { Ok::<_, ChainError>(contract.balanceOf(owner).call().await?) })
            .await
    }

    async fn read_reward_token(&self, pool: &str) -> Result<String, ChainError> {
        let contract = ISmartChef::new(parse_address(pool)?, &self.provider);
        let reward = self
            .timed(async { Ok::<_, ChainError>(contract.rewardToken().call().await?) })
            .await?;
        Ok(hex_encode(reward.as_slice()))
    }
}
