//! Job to re-enumerate the pair universe the observer watches.

use std::time::Instant;

use anyhow::{Context, Result};
use log::info;

use crate::chain::ChainReader;

pub async fn run(reader: &dyn ChainReader) -> Result<usize> {
    let start = Instant::now();
    let count = reader
        .refresh_watched_addresses()
        .await
        .context("Failed to enumerate pair universe")?;
    info!("Pair universe refreshed in {:?}: {} pairs", start.elapsed(), count);
    Ok(count)
}
