//! Swap log decoding.
//!
//! Turns the raw `Swap` legs of a fetched block into ledger events: each side
//! is netted to |in - out| and scaled by the pair's token decimals.

use log::warn;

use crate::{
    chain::RawSwapEvent,
    db::models::{LedgerEvent, SwapEventRecord},
    utils::{net_amount, u256_to_f64_safe},
    worker::DecimalsQuery,
};

/// Events decoded from one block.
#[derive(Debug, Default)]
pub struct ParseResult {
    pub events: Vec<LedgerEvent>,
    /// Events dropped because their pair is unknown or an amount did not
    /// scale to a finite number.
    pub skipped: usize,
}

/// Decodes one swap. `None` means the event is malformed for storage and is
/// to be skipped.
pub fn parse_swap(
    event: &RawSwapEvent,
    block_time: i64,
    decimals: &dyn DecimalsQuery,
) -> Option<SwapEventRecord> {
    let (decimals0, decimals1) = match decimals.decimals(&event.contract) {
        Ok(d) => d,
        Err(e) => {
            warn!("Skipping swap in tx {}: {}", event.tx_hash, e);
            return None;
        },
    };

    let amount0 = u256_to_f64_safe(net_amount(event.amount0_in, event.amount0_out), decimals0)?;
    let amount1 = u256_to_f64_safe(net_amount(event.amount1_in, event.amount1_out), decimals1)?;

    Some(SwapEventRecord::new(
        &event.contract,
        amount0,
        amount1,
        &event.block_hash,
        &event.tx_hash,
        event.block_number,
        block_time,
    ))
}

/// Decodes every swap of a block, in log order.
pub fn parse_swaps(
    events: &[RawSwapEvent],
    block_time: i64,
    decimals: &dyn DecimalsQuery,
) -> ParseResult {
    let mut result = ParseResult {
        events: Vec::with_capacity(events.len()),
        skipped: 0,
    };

    for event in events {
        match parse_swap(event, block_time, decimals) {
            Some(record) => result.events.push(LedgerEvent::Swap(record)),
            None => result.skipped += 1,
        }
    }

    result
}
