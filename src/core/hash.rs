//! Digest Primitives
//!
//! Hashing used by round verification:
//! - HMAC-SHA256 of the revealed server seed over the client seed
//! - SHA-256 links of the seed reveal chain
//! - Modular reduction of a digest read as one big hex number

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

/// Digest output type (256 bits / 32 bytes)
pub type Digest256 = [u8; 32];

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 with `key` over `message`.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> Digest256 {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Plain SHA-256 of arbitrary data.
pub fn sha256(data: &[u8]) -> Digest256 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Lowercase hex of a digest.
#[inline]
pub fn to_hex(digest: &Digest256) -> String {
    hex::encode(digest)
}

/// Reduce a digest, read as a big-endian number, modulo `modulus`.
///
/// Folds one nibble at a time: `acc = (acc * 16 + nibble) % modulus`.
pub fn digest_mod(digest: &Digest256, modulus: u64) -> u64 {
    digest.iter().fold(0u64, |acc, byte| {
        let acc = (acc * 16 + u64::from(byte >> 4)) % modulus;
        (acc * 16 + u64::from(byte & 0x0f)) % modulus
    })
}

/// Reduce a hex string modulo `modulus` with the same nibble fold.
///
/// Returns `None` if the string holds a non-hex character.
pub fn hex_mod(hex: &str, modulus: u64) -> Option<u64> {
    hex.chars().try_fold(0u64, |acc, c| {
        let nibble = c.to_digit(16)?;
        Some((acc * 16 + u64::from(nibble)) % modulus)
    })
}

/// Whether the hex number is divisible by `modulus`.
pub fn hex_divisible(hex: &str, modulus: u64) -> bool {
    hex_mod(hex, modulus) == Some(0)
}

/// Leading 52 bits (13 hex characters) of a digest.
#[inline]
pub fn leading_52_bits(digest: &Digest256) -> u64 {
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head) >> 12
}

// =============================================================================
// TESTS
// =============================================================================
