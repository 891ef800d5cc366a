pub mod abis;
pub mod alert;
pub mod chain;
pub mod config;
pub mod cron;
pub mod db;
pub mod server;
pub mod utils;
pub mod worker;

#[cfg(test)]
mod test_utils;

pub use chain::{ChainReader, RpcChainReader};
pub use config::Settings;
pub use cron::{CronScheduler, CronSettings};
pub use db::{LedgerStore, MemoryLedger, PostgresClient};
pub use worker::{Aggregator, BlockObserver};
