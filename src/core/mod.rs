//! Core numeric and cryptographic primitives.
//!
//! Pure functions shared by the session engine and the verifier. No I/O,
//! no clocks; the same inputs give the same outputs everywhere.

pub mod growth;
pub mod hash;

// Re-export core functions
pub use growth::{duration, growth, inverse_growth};
pub use hash::{hmac_sha256, sha256, to_hex, Digest256};
