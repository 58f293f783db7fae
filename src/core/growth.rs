//! Growth Function
//!
//! Maps elapsed round time to the payout multiplier and back.
//! Multipliers are integers scaled by 100 (`250` = 2.50x).
//!
//! ## Curve
//!
//! ```text
//! growth(t)    = floor(100 * e^(r * t))        r = 0.00006 per ms
//! inverse(m)   = c * ln(0.01 * m)              c = 16666.666667 ms
//! duration(m)  = ceil(inverse(m + 1))
//! ```
//!
//! The server quantizes with `floor`, and the fairness proof depends on it.
//! Everything here is plain IEEE-754 double arithmetic so results are
//! reproducible bit for bit against the server.

use std::f64::consts::E;

/// Growth rate per elapsed millisecond.
pub const GROWTH_RATE: f64 = 0.00006;

/// Inverse growth coefficient (1 / GROWTH_RATE, as published by the server).
pub const INVERSE_COEFFICIENT: f64 = 16666.666667;

/// Multiplier at elapsed = 0 (1.00x).
pub const BASE_MULTIPLIER: u64 = 100;

/// Multiplier (x100) reached after `elapsed_ms` milliseconds.
#[inline]
pub fn growth(elapsed_ms: u64) -> u64 {
    (100.0 * E.powf(GROWTH_RATE * elapsed_ms as f64)).floor() as u64
}

/// Fractional elapsed milliseconds at which the curve reaches `multiplier`.
///
/// Not quantized. Multipliers below 100 give negative times.
#[inline]
pub fn inverse_growth(multiplier: u64) -> f64 {
    INVERSE_COEFFICIENT * (0.01 * multiplier as f64).ln()
}

/// Elapsed milliseconds at which the next integer multiplier after
/// `crash` would have been reached.
///
/// Used to sanity-check the elapsed time a server reports with a crash.
#[inline]
pub fn duration(crash: u64) -> u64 {
    let ms = inverse_growth(crash.saturating_add(1)).ceil();
    if ms <= 0.0 {
        0
    } else {
        ms as u64
    }
}

// =============================================================================
// TESTS
// =============================================================================
