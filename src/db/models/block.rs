use chrono::{DateTime, Utc};
use serde::Serialize;

/// One observed block (PostgreSQL `block_log`).
///
/// At most one record exists per height. The head's `parent_hash` equals the
/// previous height's `block_hash`; fork repair keeps it that way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockRecord {
    pub height: u64,
    pub block_hash: String,
    pub parent_hash: String,
    /// Block timestamp, unix seconds.
    pub block_time: i64,
    /// Local ingestion time.
    pub created_at: DateTime<Utc>,
}

impl BlockRecord {
    pub fn new(height: u64, block_hash: String, parent_hash: String, block_time: i64) -> Self {
        Self {
            height,
            block_hash: block_hash.to_lowercase(),
            parent_hash: parent_hash.to_lowercase(),
            block_time,
            created_at: Utc::now(),
        }
    }
}
