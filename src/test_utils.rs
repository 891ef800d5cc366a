//! Scripted collaborators for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use alloy::primitives::U256;
use async_trait::async_trait;

use crate::chain::{ChainError, ChainReader, FetchedBlock, RawSwapEvent, TokenInfo};
use crate::config::*;
use crate::utils::normalize_address;
use crate::worker::{DecimalsError, DecimalsQuery};

const E18: u128 = 1_000_000_000_000_000_000;

pub fn test_settings() -> Settings {
    Settings {
        postgres: PostgresSettings {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            database: "swapstat".to_string(),
            pool_size: 4,
        },
        chain: ChainSettings {
            rpc_url: "http://localhost:8545".to_string(),
            factory_address: String::new(),
            start_height: 0,
            confirmations: 15,
            fetch_interval_milliseconds: 1_000,
            universe_refresh_interval_secs: 1_000,
            certified_pairs: vec!["0x1b96b92314c44b159149f7e0303511fb2fc4774f".to_string()],
            syrup_pools: vec![],
            governance_token_address: "0x0e09fabb73bd3ade0a17ecc321fd13a19e81ce82".to_string(),
            governance_token_symbol: "Cake".to_string(),
            primary_pool_name: "Cake".to_string(),
        },
        observer: ObserverSettings::default(),
        aggregator: AggregatorSettings::default(),
        alert: AlertSettings {
            telegram_bot_id: String::new(),
            telegram_chat_id: String::new(),
            block_update_timeout_secs: 60,
        },
        server: ServerSettings::default(),
        log: LogSettings::default(),
    }
}

/// Fixed decimals table.
pub struct StaticDecimals(HashMap<String, (u8, u8)>);

impl StaticDecimals {
    pub fn new(entries: &[(&str, u8, u8)]) -> Self {
        Self(
            entries
                .iter()
                .map(|(pair, d0, d1)| (normalize_address(pair), (*d0, *d1)))
                .collect(),
        )
    }
}

impl DecimalsQuery for StaticDecimals {
    fn decimals(&self, pair: &str) -> Result<(u8, u8), DecimalsError> {
        self.0
            .get(&normalize_address(pair))
            .copied()
            .ok_or_else(|| DecimalsError::NotFound(pair.to_string()))
    }
}

#[derive(Debug, Clone)]
struct FakeBlock {
    hash: String,
    parent_hash: String,
    block_time: i64,
    events: Vec<RawSwapEvent>,
}

#[derive(Default)]
struct FakeState {
    blocks: BTreeMap<u64, FakeBlock>,
    pairs: HashMap<String, (String, String)>,
    tokens: HashMap<String, TokenInfo>,
    reserves: HashMap<String, (U256, U256)>,
    balances: HashMap<(String, String), U256>,
    reward_tokens: HashMap<String, String>,
    transport_failures: HashSet<String>,
    contract_failures: HashSet<String>,
    latency: Duration,
}

/// In-memory chain whose blocks and contract state are set by the test.
///
/// Token names equal their symbols. Reads touching an address registered
/// with `fail_transport` or `fail_contract` fail with that error kind.
/// Contract reads wait `latency` per underlying RPC, so `read_pair_tokens`
/// and `read_token` take two round trips like the RPC reader.
pub struct FakeChainReader {
    universe: Vec<String>,
    state: Mutex<FakeState>,
    fetch_attempts: AtomicUsize,
}

impl FakeChainReader {
    pub fn new(universe: Vec<String>) -> Self {
        Self {
            universe,
            state: Mutex::new(FakeState::default()),
            fetch_attempts: AtomicUsize::new(0),
        }
    }

    /// Writes `count` chained blocks from `from` on, replacing whatever was
    /// there. Hashes embed `tag` so competing branches differ.
    pub fn extend_canonical(&self, from: u64, count: u64, tag: &str) {
        let mut state = self.state.lock().unwrap();
        for height in from..from + count {
            let parent_hash = state
                .blocks
                .get(&(height.wrapping_sub(1)))
                .map(|b| b.hash.clone())
                .unwrap_or_else(|| format!("0x{:x}", height.wrapping_sub(1)));
            state.blocks.insert(
                height,
                FakeBlock {
                    hash: format!("0x{}{:x}", tag, height),
                    parent_hash,
                    block_time: 1_700_000_000 + 3 * height as i64,
                    events: Vec::new(),
                },
            );
        }
    }

    /// Adds a swap of `amount_in` whole tokens of side 0 for `amount_out`
    /// whole tokens of side 1 (18 decimals) to the block at `height`.
    pub fn add_swap(&self, height: u64, pair: &str, amount_in: u128, amount_out: u128) {
        let mut state = self.state.lock().unwrap();
        let block = state.blocks.get_mut(&height).expect("block must exist");
        let index = block.events.len();
        block.events.push(RawSwapEvent {
            contract: normalize_address(pair),
            amount0_in: U256::from(amount_in * E18),
            amount1_in: U256::ZERO,
            amount0_out: U256::ZERO,
            amount1_out: U256::from(amount_out * E18),
            sender: "0x0000000000000000000000000000000000000001".to_string(),
            to: "0x0000000000000000000000000000000000000002".to_string(),
            tx_hash: format!("0x{:x}{:04x}", height, index),
            block_hash: block.hash.clone(),
            block_number: height,
        });
    }

    pub fn hash_at(&self, height: u64) -> Option<String> {
        self.state.lock().unwrap().blocks.get(&height).map(|b| b.hash.clone())
    }

    pub fn fetch_attempts(&self) -> usize {
        self.fetch_attempts.load(Ordering::SeqCst)
    }

    pub fn set_token(&self, address: &str, symbol: &str, decimals: u8) {
        let address = normalize_address(address);
        self.state.lock().unwrap().tokens.insert(
            address.clone(),
            TokenInfo {
                address,
                symbol: symbol.to_string(),
                decimals,
            },
        );
    }

    pub fn set_pair(&self, pair: &str, token0: &str, token1: &str) {
        self.state.lock().unwrap().pairs.insert(
            normalize_address(pair),
            (normalize_address(token0), normalize_address(token1)),
        );
    }

    pub fn set_reserves(&self, pair: &str, reserve0: U256, reserve1: U256) {
        self.state
            .lock()
            .unwrap()
            .reserves
            .insert(normalize_address(pair), (reserve0, reserve1));
    }

    pub fn set_balance(&self, token: &str, owner: &str, amount: U256) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert((normalize_address(token), normalize_address(owner)), amount);
    }

    pub fn set_reward_token(&self, pool: &str, token: &str) {
        self.state
            .lock()
            .unwrap()
            .reward_tokens
            .insert(normalize_address(pool), normalize_address(token));
    }

    pub fn fail_transport(&self, address: &str) {
        self.state
            .lock()
            .unwrap()
            .transport_failures
            .insert(normalize_address(address));
    }

    pub fn fail_contract(&self, address: &str) {
        self.state
            .lock()
            .unwrap()
            .contract_failures
            .insert(normalize_address(address));
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = latency;
    }

    async fn round_trips(&self, calls: u32) {
        let latency = self.state.lock().unwrap().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency * calls).await;
        }
    }

    fn check(&self, address: &str) -> Result<String, ChainError> {
        let address = normalize_address(address);
        let state = self.state.lock().unwrap();
        if state.transport_failures.contains(&address) {
            return Err(ChainError::Transport(format!("{} unreachable", address)));
        }
        if state.contract_failures.contains(&address) {
            return Err(ChainError::Contract(format!("{} reverted", address)));
        }
        Ok(address)
    }
}

#[async_trait]
impl ChainReader for FakeChainReader {
    async fn fetch_block(
        &self,
        height: u64,
        watched: &[String],
    ) -> Result<FetchedBlock, ChainError> {
        self.fetch_attempts.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        let block = state.blocks.get(&height).ok_or(ChainError::NotFound(height))?;
        Ok(FetchedBlock {
            hash: block.hash.clone(),
            parent_hash: block.parent_hash.clone(),
            block_time: block.block_time,
            events: block
                .events
                .iter()
                .filter(|ev| watched.contains(&ev.contract))
                .cloned()
                .collect(),
        })
    }

    fn watched_addresses(&self) -> Vec<String> {
        self.universe.clone()
    }

    async fn refresh_watched_addresses(&self) -> Result<usize, ChainError> {
        Ok(self.universe.len())
    }

    async fn read_pair_tokens(&self, pair: &str) -> Result<(String, String), ChainError> {
        let pair = self.check(pair)?;
        self.round_trips(2).await;
        self.state
            .lock()
            .unwrap()
            .pairs
            .get(&pair)
            .cloned()
            .ok_or_else(|| ChainError::Contract(format!("{} is not a pair", pair)))
    }

    async fn read_token(&self, token: &str) -> Result<TokenInfo, ChainError> {
        let token = self.check(token)?;
        self.round_trips(2).await;
        self.state
            .lock()
            .unwrap()
            .tokens
            .get(&token)
            .cloned()
            .ok_or_else(|| ChainError::Contract(format!("{} is not a token", token)))
    }

    async fn read_token_name(&self, token: &str) -> Result<String, ChainError> {
        self.read_token(token).await.map(|t| t.symbol)
    }

    async fn read_reserves(&self, pair: &str) -> Result<(U256, U256), ChainError> {
        let pair = self.check(pair)?;
        self.round_trips(1).await;
        Ok(self
            .state
            .lock()
            .unwrap()
            .reserves
            .get(&pair)
            .copied()
            .unwrap_or((U256::ZERO, U256::ZERO)))
    }

    async fn read_balance(&self, token: &str, owner: &str) -> Result<U256, ChainError> {
        let token = self.check(token)?;
        let owner = self.check(owner)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .balances
            .get(&(token, owner))
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn read_reward_token(&self, pool: &str) -> Result<String, ChainError> {
        let pool = self.check(pool)?;
        self.state
            .lock()
            .unwrap()
            .reward_tokens
            .get(&pool)
            .cloned()
            .ok_or_else(|| ChainError::Contract(format!("{} has no reward token", pool)))
    }
}
