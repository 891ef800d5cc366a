//! Utility functions for the swapstat service.
//!
//! - [`conversion`] - Type conversions (U256, f64, hex encoding) and swap leg netting

mod conversion;

pub use conversion::{hex_encode, net_amount, normalize_address, u256_to_f64, u256_to_f64_safe};
