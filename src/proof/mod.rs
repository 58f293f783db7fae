//! Provably-Fair Verification
//!
//! Recomputes a round's crash point from its revealed seed and checks
//! it against what the server reported.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PROOF SYSTEM                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  crash.rs        - HMAC-SHA256 crash point derivation        │
//! │  verify.rs       - Verdict and reveal-chain check            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod crash;
pub mod verify;

// Re-export key types
pub use crash::{crash_point, DEFAULT_CLIENT_SEED};
pub use verify::{check_chain, verdict_for, verify_round, ChainCheck, RoundVerification, Verdict};
