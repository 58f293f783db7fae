//! Round Verification
//!
//! Checks a finished round against its revealed seed:
//! - the recomputed crash point against the one the server reported
//! - the revealed seed against the commitment published before the round
//!
//! A mismatch is data, not a failure. Nothing here returns an error.

use serde::{Deserialize, Serialize};

use crate::core::hash::{sha256, to_hex};
use crate::proof::crash::crash_point;

/// Above this crash point (x100) a small float drift is tolerated.
pub const EXACT_MATCH_LIMIT: u64 = 1_000_000;

/// Largest tolerated drift (x100, exclusive) above [`EXACT_MATCH_LIMIT`].
pub const DRIFT_TOLERANCE: u64 = 8;

/// Outcome of comparing a recomputed crash point with the reported one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Reported crash matches the seed.
    Ok,
    /// Reported crash does not follow from the seed.
    Scam,
}

impl Verdict {
    /// Whether the round verified.
    pub fn is_ok(self) -> bool {
        matches!(self, Verdict::Ok)
    }
}

/// Whether a revealed seed hashes to the round's commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainCheck {
    /// sha256(seed) equals the commitment.
    Linked,
    /// sha256(seed) differs from the commitment.
    Broken,
    /// No commitment known for this round (joined mid-chain).
    Unknown,
}

/// Full verification record for one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundVerification {
    /// Crash point recomputed from the seed.
    pub computed: u64,
    /// Crash point the server reported.
    pub reported: u64,
    /// Comparison verdict.
    pub verdict: Verdict,
    /// Reveal chain link.
    pub chain: ChainCheck,
}

/// Compare a computed crash point with the reported one.
pub fn verdict_for(computed: u64, reported: u64) -> Verdict {
    if computed == reported {
        return Verdict::Ok;
    }
    if computed <= EXACT_MATCH_LIMIT {
        return Verdict::Scam;
    }
    if computed.abs_diff(reported) < DRIFT_TOLERANCE {
        Verdict::Ok
    } else {
        Verdict::Scam
    }
}

/// Check one link of the reveal chain.
pub fn check_chain(server_seed: &str, commitment: Option<&str>) -> ChainCheck {
    match commitment {
        None => ChainCheck::Unknown,
        Some(hash) if to_hex(&sha256(server_seed.as_bytes())).eq_ignore_ascii_case(hash) => {
            ChainCheck::Linked
        }
        Some(_) => ChainCheck::Broken,
    }
}

/// Verify a finished round.
pub fn verify_round(
    server_seed: &str,
    client_seed: &str,
    reported: u64,
    commitment: Option<&str>,
) -> RoundVerification {
    let computed = crash_point(server_seed, client_seed);
    RoundVerification {
        computed,
        reported,
        verdict: verdict_for(computed, reported),
        chain: check_chain(server_seed, commitment),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::crash::DEFAULT_CLIENT_SEED;

    const SEED: &str = "e1f7c3b2a6d4c0d9f8e7a6b5c4d3e2f1a0b9c8d7e6f5a4b3c2d1e0f9a8b7c6d5";
    const SEED_HASH: &str = "bdbda14ce533755e384b3759752deb1d56ade35175b2a2d982c4587b858e029d";

    #[test]
    fn test_exact_zone_boundaries() {
        assert_eq!(verdict_for(1_000_000, 1_000_000), Verdict::Ok);
        assert_eq!(verdict_for(999_999, 999_999), Verdict::Ok);
        assert_eq!(verdict_for(999_999, 1_000_000), Verdict::Scam);
        assert_eq!(verdict_for(1_000_000, 1_000_001), Verdict::Scam);
    }

    #[test]
    fn test_drift_zone_boundaries() {
        assert_eq!(verdict_for(1_000_008, 1_000_000), Verdict::Scam);
        assert_eq!(verdict_for(1_000_007, 1_000_000), Verdict::Ok);
        assert_eq!(verdict_for(1_000_001, 1_000_008), Verdict::Ok);
        assert_eq!(verdict_for(2_000_000, 2_000_008), Verdict::Scam);
    }

    #[test]
    fn test_equality_always_passes() {
        for value in [0, 100, 12_345, 1_000_000, 50_000_000] {
            assert!(verdict_for(value, value).is_ok());
        }
    }

    #[test]
    fn test_verify_round_ok() {
        let result = verify_round(SEED, DEFAULT_CLIENT_SEED, 299, Some(SEED_HASH));
        assert_eq!(result.computed, 299);
        assert_eq!(result.verdict, Verdict::Ok);
        assert_eq!(result.chain, ChainCheck::Linked);
    }

    #[test]
    fn test_verify_round_scam() {
        let result = verify_round(SEED, DEFAULT_CLIENT_SEED, 300, None);
        assert_eq!(result.verdict, Verdict::Scam);
        assert_eq!(result.chain, ChainCheck::Unknown);
    }

    #[test]
    fn test_chain_case_insensitive() {
        assert_eq!(
            check_chain(SEED, Some(&SEED_HASH.to_uppercase())),
            ChainCheck::Linked
        );
    }

    #[test]
    fn test_chain_broken() {
        assert_eq!(check_chain(SEED, Some(&"0".repeat(64))), ChainCheck::Broken);
    }

    #[test]
    fn test_verdict_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Verdict::Ok).unwrap(), "\"ok\"");
        assert_eq!(serde_json::to_string(&Verdict::Scam).unwrap(), "\"scam\"");
    }
}
