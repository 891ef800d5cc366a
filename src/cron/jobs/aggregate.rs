//! Job to run one aggregation cycle and publish its snapshot.

use anyhow::{Context, Result};

use crate::worker::Aggregator;

pub async fn run(aggregator: &Aggregator) -> Result<()> {
    aggregator
        .run_cycle()
        .await
        .context("Aggregation cycle aborted, previous snapshot kept")
}
