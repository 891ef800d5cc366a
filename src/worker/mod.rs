use thiserror::Error;

pub mod aggregator;
pub mod observer;
pub mod pair_filter;
pub mod parser;
pub mod price_resolver;

pub use aggregator::{Aggregator, Snapshot};
pub use observer::{BlockObserver, RetryPolicy, StepOutcome};
pub use parser::{parse_swaps, ParseResult};
pub use price_resolver::PriceResolver;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecimalsError {
    #[error("no decimals known for pair {0}")]
    NotFound(String),
}

/// Token decimals of a pair, keyed by pair address.
///
/// Implemented by the aggregator from its last published snapshot; the
/// observer needs it to scale raw swap amounts.
pub trait DecimalsQuery: Send + Sync {
    fn decimals(&self, pair: &str) -> Result<(u8, u8), DecimalsError>;
}
