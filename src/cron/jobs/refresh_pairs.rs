//! Job to rebuild the anti-spoofing filtered pair list.

use anyhow::Result;

use crate::worker::Aggregator;

pub async fn run(aggregator: &Aggregator) -> Result<usize> {
    Ok(aggregator.refresh_pairs().await)
}
