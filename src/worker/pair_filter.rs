//! Anti-spoofing filter over the pair universe.
//!
//! Anyone can deploy a token called `BUSD`. The certified pairs pin each of
//! their symbols to a contract address, and a discovered pair is dropped when
//! one of its tokens uses a pinned symbol from a different address.

use std::collections::BTreeMap;

use futures::{stream, StreamExt};
use log::{debug, warn};

use crate::chain::{ChainError, ChainReader, TokenInfo};

/// Concurrent pair reads while filtering.
const FILTER_CONCURRENCY: usize = 16;

/// Symbol -> token address, seeded from the certified pairs.
pub type TrustedSymbols = BTreeMap<String, String>;

async fn read_pair_token_infos(
    reader: &dyn ChainReader,
    pair: &str,
) -> Result<(TokenInfo, TokenInfo), ChainError> {
    let (token0, token1) = reader.read_pair_tokens(pair).await?;
    let info0 = reader.read_token(&token0).await?;
    let info1 = reader.read_token(&token1).await?;
    Ok((info0, info1))
}

/// Reads both tokens of every certified pair. Pairs whose reads fail are
/// left out; a later pair overrides an earlier one on the same symbol.
pub async fn trusted_symbols(reader: &dyn ChainReader, certified: &[String]) -> TrustedSymbols {
    let mut trusted = TrustedSymbols::new();
    for pair in certified {
        match read_pair_token_infos(reader, pair).await {
            Ok((t0, t1)) => {
                trusted.insert(t0.symbol, t0.address);
                trusted.insert(t1.symbol, t1.address);
            },
            Err(e) => warn!("Failed to read certified pair {}: {}", pair, e),
        }
    }
    trusted
}

/// Whether a token may appear under its symbol.
pub fn is_trusted(trusted: &TrustedSymbols, token: &TokenInfo) -> bool {
    match trusted.get(&token.symbol) {
        Some(address) => address.eq_ignore_ascii_case(&token.address),
        None => true,
    }
}

/// Keeps the pairs of `universe` whose tokens pass [`is_trusted`], in
/// universe order. Pairs whose reads fail are dropped.
pub async fn filter_pairs(
    reader: &dyn ChainReader,
    universe: &[String],
    trusted: &TrustedSymbols,
) -> Vec<String> {
    let checked: Vec<Option<String>> = stream::iter(universe.iter().cloned())
        .map(|pair| async move {
            match read_pair_token_infos(reader, &pair).await {
                Ok((t0, t1)) if is_trusted(trusted, &t0) && is_trusted(trusted, &t1) => {
                    Some(pair)
                },
                Ok((t0, t1)) => {
                    debug!(
                        "Dropping pair {} ({} {}, {} {}): symbol spoofs a certified token",
                        pair, t0.symbol, t0.address, t1.symbol, t1.address
                    );
                    None
                },
                Err(e) => {
                    debug!("Dropping pair {}: {}", pair, e);
                    None
                },
            }
        })
        .buffered(FILTER_CONCURRENCY)
        .collect()
        .await;

    checked.into_iter().flatten().collect()
}
