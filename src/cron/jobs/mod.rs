pub mod aggregate;
pub mod prune;
pub mod refresh_pairs;
pub mod refresh_universe;
pub mod staleness_alert;
