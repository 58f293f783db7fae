//! Crash Point Derivation
//!
//! Recomputes a round's crash multiplier from its revealed server seed
//! and the long-lived public client seed.
//!
//! ```text
//! digest = HMAC-SHA256(key = server_seed, msg = client_seed)
//! digest mod 101 == 0       -> 0 (instant crash, 1 in 101 rounds)
//! h = first 52 bits, e = 2^52
//! crash = floor((100e - h) / (e - h))
//! ```

use crate::core::hash::{digest_mod, hmac_sha256, leading_52_bits, to_hex};

/// Client seed the server combines with every round's seed.
pub const DEFAULT_CLIENT_SEED: &str =
    "000000000000000007a9a31ff7f07463d91af6b5454241d5faf282e5e0fe1b3a";

/// One in this many rounds crashes instantly.
pub const INSTANT_CRASH_MODULUS: u64 = 101;

/// 2^52, the range of the 52-bit digest prefix.
const E: f64 = 4_503_599_627_370_496.0;

/// Crash multiplier (x100) for a round.
pub fn crash_point(server_seed: &str, client_seed: &str) -> u64 {
    let digest = hmac_sha256(server_seed.as_bytes(), client_seed.as_bytes());

    if digest_mod(&digest, INSTANT_CRASH_MODULUS) == 0 {
        return 0;
    }

    let h = leading_52_bits(&digest) as f64;
    ((100.0 * E - h) / (E - h)).floor() as u64
}

/// Hex digest behind a crash point, for audit output.
pub fn crash_digest(server_seed: &str, client_seed: &str) -> String {
    to_hex(&hmac_sha256(server_seed.as_bytes(), client_seed.as_bytes()))
}
