//! Protocol Messages
//!
//! One record per inbound event and outbound request, decoded from and
//! encoded to the JSON arguments carried by socket frames.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::game::state::RoundState;

/// Protocol decode errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Event arrived without its payload argument.
    #[error("{event}: missing payload")]
    MissingPayload {
        /// Event name.
        event: String,
    },
    /// Payload did not match the event's shape.
    #[error("{event}: malformed payload: {source}")]
    Malformed {
        /// Event name.
        event: String,
        /// Decode failure.
        #[source]
        source: serde_json::Error,
    },
    /// Server answered a request with an error.
    #[error("{request} rejected by server: {reason}")]
    Rejected {
        /// Request name.
        request: &'static str,
        /// Server's reason.
        reason: String,
    },
}

// =============================================================================
// SERVER -> CLIENT
// =============================================================================

/// Full resync snapshot (reply to `join`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSnapshot {
    /// Round state.
    pub state: RoundState,
    /// Round on the table.
    pub game_id: u64,
    /// Hash of the last ended round (its revealed seed).
    #[serde(default)]
    pub last_hash: Option<String>,
    /// Maximum payout this round.
    #[serde(default)]
    pub max_win: Option<u64>,
    /// Elapsed ms; negative while counting down.
    #[serde(default)]
    pub elapsed: i64,
    /// Logged-in username.
    #[serde(default)]
    pub username: Option<String>,
    /// Logged-in balance.
    #[serde(default, alias = "balance_satoshis")]
    pub balance: Option<u64>,
    /// Bets in the current round.
    #[serde(default)]
    pub player_info: BTreeMap<String, SnapshotPlayer>,
    /// Usernames that joined during the countdown.
    #[serde(default)]
    pub joined: Vec<String>,
    /// Recently ended rounds, newest first.
    #[serde(default)]
    pub table_history: Vec<HistoryEntry>,
}

/// A player's record in a join snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPlayer {
    /// Bet amount.
    pub bet: u64,
    /// Cashout multiplier (x100), if stopped.
    #[serde(default)]
    pub stopped_at: Option<u64>,
    /// Bonus, if paid.
    #[serde(default)]
    pub bonus: Option<u64>,
}

/// Ended round in the snapshot's table history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Round identifier.
    pub game_id: u64,
    /// Crash multiplier (x100).
    pub game_crash: u64,
    /// Revealed seed.
    #[serde(default)]
    pub hash: Option<String>,
}

/// `game_starting`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStarting {
    /// New round.
    pub game_id: u64,
    /// Maximum payout.
    #[serde(default)]
    pub max_win: Option<u64>,
    /// Countdown in ms.
    pub time_till_start: u64,
}

/// `game_tick`: an object or, in the legacy form, a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GameTick {
    /// `{ "elapsed": n }`
    Object {
        /// Elapsed ms.
        elapsed: u64,
    },
    /// `n`
    Bare(u64),
}

impl GameTick {
    /// Elapsed ms regardless of form.
    pub fn elapsed(self) -> u64 {
        match self {
            GameTick::Object { elapsed } | GameTick::Bare(elapsed) => elapsed,
        }
    }
}

/// `game_crash`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameCrash {
    /// Server-forced end.
    #[serde(default)]
    pub forced: bool,
    /// Elapsed ms at the crash.
    pub elapsed: u64,
    /// Crash multiplier (x100).
    pub game_crash: u64,
    /// Bonuses by username.
    #[serde(default)]
    pub bonuses: BTreeMap<String, u64>,
    /// Revealed server seed.
    pub hash: String,
}

/// `player_bet`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerBet {
    /// Bettor.
    pub username: String,
    /// Amount.
    pub bet: u64,
    /// Auto cashout (x100).
    #[serde(default, rename = "autoCashoutFactor", alias = "auto_cash_out")]
    pub auto_cashout: Option<u64>,
}

/// `cashed_out`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashedOut {
    /// Player.
    pub username: String,
    /// Multiplier (x100).
    pub stopped_at: u64,
}

/// Inbound event with a typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Snapshot.
    Join(JoinSnapshot),
    /// Countdown.
    GameStarting(GameStarting),
    /// Round begins: confirmed bets by username.
    GameStarted(BTreeMap<String, u64>),
    /// Tick.
    GameTick(GameTick),
    /// Crash.
    GameCrash(GameCrash),
    /// Bet.
    PlayerBet(PlayerBet),
    /// Cashout.
    CashedOut(CashedOut),
}

impl ServerEvent {
    /// Decode a named event from its first argument.
    ///
    /// Returns `Ok(None)` for events outside the game engine (chat, etc.).
    pub fn decode(name: &str, args: &[Value]) -> Result<Option<Self>, ProtocolError> {
        fn payload<T: serde::de::DeserializeOwned>(
            name: &str,
            args: &[Value],
        ) -> Result<T, ProtocolError> {
            let value = args.first().ok_or_else(|| ProtocolError::MissingPayload {
                event: name.to_string(),
            })?;
            T::deserialize(value).map_err(|source| ProtocolError::Malformed {
                event: name.to_string(),
                source,
            })
        }

        let event = match name {
            "join" => ServerEvent::Join(payload(name, args)?),
            "game_starting" => ServerEvent::GameStarting(payload(name, args)?),
            "game_started" => ServerEvent::GameStarted(payload(name, args)?),
            "game_tick" => ServerEvent::GameTick(payload(name, args)?),
            "game_crash" => ServerEvent::GameCrash(payload(name, args)?),
            "player_bet" => ServerEvent::PlayerBet(payload(name, args)?),
            "cashed_out" => ServerEvent::CashedOut(payload(name, args)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

// =============================================================================
// CLIENT -> SERVER
// =============================================================================

/// Outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    /// Ask for a snapshot, optionally authenticating.
    Join {
        /// One-time token.
        ott: Option<String>,
    },
    /// Bet on the next (or current countdown) round.
    PlaceBet {
        /// Amount.
        amount: u64,
        /// Auto cashout (x100).
        auto_cashout: u64,
    },
    /// Cash out now.
    CashOut,
    /// Change the auto cashout of the current bet.
    SetAutoCashOut {
        /// Auto cashout (x100).
        factor: u64,
    },
}

impl ClientRequest {
    /// Event name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ClientRequest::Join { .. } => "join",
            ClientRequest::PlaceBet { .. } => "place_bet",
            ClientRequest::CashOut => "cash_out",
            ClientRequest::SetAutoCashOut { .. } => "set_auto_cash_out",
        }
    }

    /// Event arguments.
    pub fn args(&self) -> Vec<Value> {
        match self {
            ClientRequest::Join { ott: Some(ott) } => vec![json!({ "ott": ott })],
            ClientRequest::Join { ott: None } => vec![json!({})],
            ClientRequest::PlaceBet {
                amount,
                auto_cashout,
            } => vec![json!(amount), json!(auto_cashout)],
            ClientRequest::CashOut => Vec::new(),
            ClientRequest::SetAutoCashOut { factor } => vec![json!(factor)],
        }
    }

    /// Whether the server replies with an ack.
    pub fn expects_ack(&self) -> bool {
        !matches!(self, ClientRequest::SetAutoCashOut { .. })
    }
}

/// Split an ack's `[err, data]` arguments.
pub fn ack_result<'a>(
    request: &'static str,
    args: &'a [Value],
) -> Result<Option<&'a Value>, ProtocolError> {
    match args.first() {
        None | Some(Value::Null) => Ok(args.get(1)),
        Some(Value::String(reason)) => Err(ProtocolError::Rejected {
            request,
            reason: reason.clone(),
        }),
        Some(other) => Err(ProtocolError::Rejected {
            request,
            reason: other.to_string(),
        }),
    }
}
