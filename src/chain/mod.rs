//! Read access to the chain.
//!
//! The observer and the aggregator only talk to the chain through
//! [`ChainReader`]; [`RpcChainReader`] is the JSON-RPC implementation.

use alloy::primitives::U256;
use async_trait::async_trait;
use thiserror::Error;

mod rpc;

pub use rpc::RpcChainReader;

#[derive(Debug, Error)]
pub enum ChainError {
    /// The endpoint could not be reached or did not answer in time.
    #[error("transport error: {0}")]
    Transport(String),
    /// The call reached the chain but reverted or returned garbage.
    #[error("contract error: {0}")]
    Contract(String),
    /// The block at this height does not exist yet.
    #[error("block {0} not found")]
    NotFound(u64),
}

impl ChainError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ChainError::Transport(_))
    }
}

/// A `Swap` log as emitted by a pair, before netting and scaling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSwapEvent {
    pub contract: String,
    pub amount0_in: U256,
    pub amount1_in: U256,
    pub amount0_out: U256,
    pub amount1_out: U256,
    pub sender: String,
    pub to: String,
    pub tx_hash: String,
    pub block_hash: String,
    pub block_number: u64,
}

/// Header fields and swap logs of one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBlock {
    pub hash: String,
    pub parent_hash: String,
    /// Unix seconds.
    pub block_time: i64,
    pub events: Vec<RawSwapEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Every address in and out of a reader is a lower-cased `0x` hex string.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Header of block `height` plus the swap logs emitted by any of
    /// `watched` in it.
    async fn fetch_block(&self, height: u64, watched: &[String])
        -> Result<FetchedBlock, ChainError>;

    /// Current pair universe. Cheap; returns the last refreshed list.
    fn watched_addresses(&self) -> Vec<String>;

    /// Re-enumerates the pair universe and swaps it in. Returns its size.
    async fn refresh_watched_addresses(&self) -> Result<usize, ChainError>;

    async fn read_pair_tokens(&self, pair: &str) -> Result<(String, String), ChainError>;

    async fn read_token(&self, token: &str) -> Result<TokenInfo, ChainError>;

    async fn read_token_name(&self, token: &str) -> Result<String, ChainError>;

    async fn read_reserves(&self, pair: &str) -> Result<(U256, U256), ChainError>;

    async fn read_balance(&self, token: &str, owner: &str) -> Result<U256, ChainError>;

    async fn read_reward_token(&self, pool: &str) -> Result<String, ChainError>;
}
