use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::utils::normalize_address;

/// Largest magnitude an amount column can hold: NUMERIC(28,18) leaves ten
/// integer digits.
pub const MAX_STORED_AMOUNT: f64 = 1e10;

/// Lifecycle of a swap event. Only ever moves `Pending -> Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
}

impl TxStatus {
    pub fn as_i16(self) -> i16 {
        match self {
            TxStatus::Pending => 0,
            TxStatus::Confirmed => 1,
        }
    }
}

/// One decoded swap log (PostgreSQL `tx_event_log`).
///
/// Amounts are the netted per-side magnitudes |in - out| scaled by each
/// token's decimals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwapEventRecord {
    pub contract_address: String,
    pub amount0: f64,
    pub amount1: f64,
    pub block_hash: String,
    pub tx_hash: String,
    pub height: u64,
    pub block_time: i64,
    pub status: TxStatus,
    pub confirmed_num: u64,
    pub created_at: DateTime<Utc>,
}

impl SwapEventRecord {
    pub fn new(
        contract_address: &str,
        amount0: f64,
        amount1: f64,
        block_hash: &str,
        tx_hash: &str,
        height: u64,
        block_time: i64,
    ) -> Self {
        Self {
            contract_address: normalize_address(contract_address),
            amount0,
            amount1,
            block_hash: block_hash.to_lowercase(),
            tx_hash: tx_hash.to_lowercase(),
            height,
            block_time,
            status: TxStatus::Pending,
            confirmed_num: 0,
            created_at: Utc::now(),
        }
    }

    /// Whether both amounts fit the storage column.
    pub fn amounts_in_range(&self) -> bool {
        self.amount0.abs() < MAX_STORED_AMOUNT && self.amount1.abs() < MAX_STORED_AMOUNT
    }
}

/// Event kinds accepted by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LedgerEvent {
    Swap(SwapEventRecord),
}

/// Trailing 24h per-side volume of one pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PairVolume {
    pub contract_address: String,
    pub total_amount0: f64,
    pub total_amount1: f64,
}
