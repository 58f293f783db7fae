//! Domain Events
//!
//! What subscribers see after the session has applied a server event.
//! Each variant has a fixed payload; the serialized form is tagged by
//! `event` with the protocol's event names.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::game::state::{RoundState, TickSample, UserState};
use crate::proof::verify::{RoundVerification, Verdict};

/// Snapshot facts published after a join (resync).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinInfo {
    /// Round on the table.
    pub game_id: u64,
    /// Its state.
    pub state: RoundState,
    /// Elapsed time reported by the server (negative during countdown).
    pub elapsed_ms: i64,
    /// Local identity, if logged in.
    pub username: Option<String>,
    /// Local balance, if logged in.
    pub balance: Option<u64>,
    /// Local state derived from the snapshot.
    pub user_state: UserState,
    /// Participants in the snapshot.
    pub player_count: usize,
}

/// Round summary published at the crash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashSummary {
    /// Round identifier.
    pub game_id: u64,
    /// Crash multiplier (x100) reported by the server.
    pub crash: u64,
    /// Server-forced end.
    pub forced: bool,
    /// Elapsed time reported with the crash.
    pub elapsed_ms: u64,
    /// Elapsed time the crash multiplier implies.
    pub expected_duration_ms: u64,
    /// Revealed seed.
    pub server_seed: String,
    /// Bonuses paid, by username.
    pub bonuses: BTreeMap<String, u64>,
    /// Seed verification.
    pub verification: RoundVerification,
    /// Local state after the crash.
    pub user_state: UserState,
}

impl CrashSummary {
    /// Verdict of the seed check.
    pub fn verdict(&self) -> Verdict {
        self.verification.verdict
    }
}

/// Event published to subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    /// Session resynchronized from a snapshot.
    Join(JoinInfo),

    /// Countdown to a new round.
    GameStarting {
        /// New round.
        game_id: u64,
        /// Maximum payout this round.
        max_win: Option<u64>,
        /// Countdown in milliseconds.
        time_till_start: u64,
        /// Commitment for the round's seed.
        server_seed_hash: Option<String>,
        /// Local state after the reset.
        user_state: UserState,
    },

    /// Round began with the confirmed bets.
    GameStarted {
        /// Round identifier.
        game_id: u64,
        /// Confirmed bets by username.
        bets: BTreeMap<String, u64>,
        /// Local state after reconciliation.
        user_state: UserState,
    },

    /// A tick was recorded.
    GameTick {
        /// Round identifier.
        game_id: u64,
        /// The recorded tick.
        tick: TickSample,
    },

    /// Round ended.
    GameCrash(CrashSummary),

    /// A bet was placed.
    PlayerBet {
        /// Round identifier.
        game_id: u64,
        /// Bettor.
        username: String,
        /// Amount.
        bet: u64,
        /// Auto cashout (x100).
        auto_cashout: Option<u64>,
        /// Whether it was the local identity.
        local: bool,
    },

    /// A player cashed out.
    CashedOut {
        /// Round identifier.
        game_id: u64,
        /// Player.
        username: String,
        /// Multiplier (x100).
        stopped_at: u64,
        /// Amount paid back.
        payout: u64,
        /// Whether it was the local identity.
        local: bool,
    },

    /// Transport dropped; state is stale until the next join.
    Disconnected {
        /// Why the connection ended.
        reason: String,
    },
}

impl GameEvent {
    /// Protocol name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::Join(_) => "join",
            GameEvent::GameStarting { .. } => "game_starting",
            GameEvent::GameStarted { .. } => "game_started",
            GameEvent::GameTick { .. } => "game_tick",
            GameEvent::GameCrash(_) => "game_crash",
            GameEvent::PlayerBet { .. } => "player_bet",
            GameEvent::CashedOut { .. } => "cashed_out",
            GameEvent::Disconnected { .. } => "disconnected",
        }
    }

    /// Round the event belongs to, if any.
    pub fn game_id(&self) -> Option<u64> {
        match self {
            GameEvent::Join(info) => Some(info.game_id),
            GameEvent::GameStarting { game_id, .. }
            | GameEvent::GameStarted { game_id, .. }
            | GameEvent::GameTick { game_id, .. }
            | GameEvent::PlayerBet { game_id, .. }
            | GameEvent::CashedOut { game_id, .. } => Some(*game_id),
            GameEvent::GameCrash(summary) => Some(summary.game_id),
            GameEvent::Disconnected { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tag_matches_name() {
        let events = vec![
            GameEvent::GameTick {
                game_id: 4,
                tick: TickSample {
                    elapsed_ms: 150,
                    growth: 100,
                    monotonic_offset_us: 150_000,
                },
            },
            GameEvent::CashedOut {
                game_id: 4,
                username: "alice".to_string(),
                stopped_at: 150,
                payout: 1500,
                local: false,
            },
            GameEvent::Disconnected {
                reason: "closed".to_string(),
            },
        ];

        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event"], event.name());
        }
    }

    #[test]
    fn test_game_id() {
        let event = GameEvent::PlayerBet {
            game_id: 77,
            username: "bob".to_string(),
            bet: 100,
            auto_cashout: Some(200),
            local: true,
        };
        assert_eq!(event.game_id(), Some(77));
        assert_eq!(
            GameEvent::Disconnected { reason: String::new() }.game_id(),
            None
        );
    }
}
