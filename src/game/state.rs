//! Round State Definitions
//!
//! Data for the round currently on the table and the local player's
//! view of it. Uses BTreeMap so player listings come out sorted.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::proof::verify::{RoundVerification, Verdict};

// =============================================================================
// ROUND STATE
// =============================================================================

/// Lifecycle of a round.
///
/// STARTING -> IN_PROGRESS -> ENDED, then a new round replaces it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundState {
    /// Countdown; bets are being accepted.
    Starting,
    /// Multiplier is climbing; ticks arrive.
    InProgress,
    /// Crashed; seed revealed.
    Ended,
}

/// The local identity's position in the current round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserState {
    /// No bet in this round.
    Watching,
    /// Bet sent, not yet acknowledged.
    Placing,
    /// Bet acknowledged, round not started.
    Placed,
    /// Bet is riding.
    Playing,
    /// Cashout sent, not yet acknowledged.
    #[serde(rename = "CASHINGOUT")]
    CashingOut,
    /// Cashed out this round.
    #[serde(rename = "CASHEDOUT")]
    CashedOut,
    /// Lost the bet this round.
    Crashed,
}

impl UserState {
    /// States from which a cashout or auto-cashout change may be requested.
    pub fn holds_bet(self) -> bool {
        matches!(self, UserState::Playing | UserState::Placing | UserState::Placed)
    }

    /// Terminal for the round (stays visible until the next countdown).
    pub fn is_terminal(self) -> bool {
        matches!(self, UserState::CashedOut | UserState::Crashed)
    }
}

// =============================================================================
// PLAYERS
// =============================================================================

/// One participant's stake in a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRoundInfo {
    /// Bet in the smallest currency unit.
    pub bet: u64,
    /// Auto cashout multiplier (x100), if set.
    pub auto_cashout: Option<u64>,
    /// Multiplier (x100) the player cashed out at.
    pub cashed_out_at: Option<u64>,
    /// Bonus paid at the end of the round.
    pub bonus: Option<u64>,
    /// When the bet was first seen.
    pub joined_at: DateTime<Utc>,
}

impl PlayerRoundInfo {
    /// A fresh bet.
    pub fn new(bet: u64, auto_cashout: Option<u64>, joined_at: DateTime<Utc>) -> Self {
        Self {
            bet,
            auto_cashout,
            cashed_out_at: None,
            bonus: None,
            joined_at,
        }
    }

    /// Payout for a cashout at `multiplier` (x100), floored.
    pub fn payout_at(&self, multiplier: u64) -> u64 {
        self.bet.saturating_mul(multiplier) / 100
    }
}

// =============================================================================
// TICKS
// =============================================================================

/// One tick observed (or projected) during a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSample {
    /// Server-reported elapsed milliseconds.
    pub elapsed_ms: u64,
    /// Multiplier (x100) at that elapsed time.
    pub growth: u64,
    /// Local monotonic microseconds since the round's start anchor.
    pub monotonic_offset_us: i64,
}

// =============================================================================
// ROUND
// =============================================================================

/// One game instance, from countdown to crash.
#[derive(Clone, Debug)]
pub struct Round {
    /// Server-assigned identifier.
    pub id: u64,
    /// Lifecycle state.
    pub state: RoundState,
    /// Commitment published before the round (previous round's seed).
    pub server_seed_hash: Option<String>,
    /// Seed revealed at the crash.
    pub server_seed: Option<String>,
    /// Maximum payout the server allows this round.
    pub max_win: Option<u64>,
    /// Wall-clock start (projected during the countdown).
    pub start_time: DateTime<Utc>,
    /// Monotonic start anchor (projected during the countdown).
    pub monotonic_start: Instant,
    /// Observed ticks, strictly increasing by elapsed.
    pub ticks: Vec<TickSample>,
    /// Crash multiplier (x100), set when ENDED.
    pub crash: Option<u64>,
    /// Whether the server forced the end, set when ENDED.
    pub forced: Option<bool>,
    /// Verification of the revealed seed, set when ENDED by a crash event.
    pub verification: Option<RoundVerification>,
    /// Participants by username.
    pub players: BTreeMap<String, PlayerRoundInfo>,
}

impl Round {
    /// A round in countdown.
    pub fn starting(
        id: u64,
        server_seed_hash: Option<String>,
        max_win: Option<u64>,
        start_time: DateTime<Utc>,
        monotonic_start: Instant,
    ) -> Self {
        Self {
            id,
            state: RoundState::Starting,
            server_seed_hash,
            server_seed: None,
            max_win,
            start_time,
            monotonic_start,
            ticks: Vec::new(),
            crash: None,
            forced: None,
            verification: None,
            players: BTreeMap::new(),
        }
    }

    /// Latest tick, if any.
    pub fn last_tick(&self) -> Option<&TickSample> {
        self.ticks.last()
    }

    /// Microseconds from the start anchor to `now` (negative before start).
    pub fn monotonic_offset_us(&self, now: Instant) -> i64 {
        if now >= self.monotonic_start {
            now.duration_since(self.monotonic_start).as_micros() as i64
        } else {
            -(self.monotonic_start.duration_since(now).as_micros() as i64)
        }
    }

    /// Milliseconds since the wall-clock start (negative before start).
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.start_time).num_milliseconds()
    }

    /// Summary for the history list, once ended.
    pub fn summary(&self) -> Option<RoundSummary> {
        if self.state != RoundState::Ended {
            return None;
        }
        Some(RoundSummary {
            game_id: self.id,
            crash: self.crash?,
            server_seed: self.server_seed.clone(),
            verdict: self.verification.as_ref().map(|v| v.verdict),
        })
    }
}

/// Compact record of an ended round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    /// Round identifier.
    pub game_id: u64,
    /// Crash multiplier (x100).
    pub crash: u64,
    /// Revealed seed, when known.
    pub server_seed: Option<String>,
    /// Verification verdict, when this client verified it.
    pub verdict: Option<Verdict>,
}

// =============================================================================
// TESTS
// =============================================================================
