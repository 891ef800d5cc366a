//! Type conversion and formatting utilities.
//!
//! Functions for converting on-chain integers into decimal-adjusted floats
//! and for canonicalising addresses.

use alloy::primitives::{hex, U256};
use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use once_cell::sync::Lazy;

// ============================================
// Hex Encoding
// ============================================

/// Encode bytes as a lowercase hex string with 0x prefix.
pub fn hex_encode(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Canonical form of an address string: trimmed, lowercase, 0x-prefixed.
pub fn normalize_address(addr: &str) -> String {
    let trimmed = addr.trim().to_lowercase();
    if trimmed.starts_with("0x") {
        trimmed
    } else {
        format!("0x{}", trimmed)
    }
}

// ============================================
// U256 Conversions
// ============================================

/// Convert U256 to f64 with decimal adjustment using BigDecimal for precision.
///
/// Returns 0.0 if the conversion fails.
///
/// # Example
/// ```ignore
/// let value = U256::from(1_000_000_000_000_000_000u128); // 1e18
/// let adjusted = u256_to_f64(value, 18); // Returns 1.0
/// ```
pub fn u256_to_f64(value: U256, decimals: u8) -> f64 {
    u256_to_f64_safe(value, decimals).unwrap_or(0.0)
}

/// Convert U256 to f64 with decimal adjustment, returning None when the
/// result is not a finite f64.
pub fn u256_to_f64_safe(value: U256, decimals: u8) -> Option<f64> {
    // Convert U256 to BigDecimal via bytes (faster than string parsing)
    let bytes: [u8; 32] = value.to_le_bytes();
    let big_int = BigInt::from_bytes_le(num_bigint::Sign::Plus, &bytes);
    let big_value = BigDecimal::from(big_int);

    let adjusted = if decimals == 0 { big_value } else { big_value / big_pow10(decimals) };

    let result = adjusted.to_f64()?;

    if result.is_finite() {
        Some(result)
    } else {
        None
    }
}

// ============================================
// Swap Legs
// ============================================

/// Net amount of one side of a swap: |in - out|.
#[inline]
pub fn net_amount(amount_in: U256, amount_out: U256) -> U256 {
    if amount_in > amount_out {
        amount_in - amount_out
    } else {
        amount_out - amount_in
    }
}

// ============================================
// Internal Helpers
// ============================================

static POW10_CACHE: Lazy<[BigDecimal; 37]> =
    Lazy::new(|| std::array::from_fn(|i| BigDecimal::from(BigInt::from(10u32).pow(i as u32))));

/// Compute 10^exp as BigDecimal.
pub(crate) fn big_pow10(exp: u8) -> BigDecimal {
    if (exp as usize) < POW10_CACHE.len() {
        POW10_CACHE[exp as usize].clone()
    } else {
        BigDecimal::from(BigInt::from(10u32).pow(exp as u32))
    }
}
