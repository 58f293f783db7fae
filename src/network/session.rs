//! Game Session
//!
//! Protocol state machine for the round on the table. Applies server
//! events in order, tracks the local identity's bet, feeds the tick
//! estimator and verifies every crash against its revealed seed.
//!
//! ```text
//! join ───────────────► (any state, rebuilt from snapshot)
//! game_starting ──────► STARTING
//! game_started ───────► IN_PROGRESS   (from STARTING)
//! game_tick ──────────► IN_PROGRESS   (append tick)
//! game_crash ─────────► ENDED         (verify)
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::growth::{duration, growth};
use crate::game::events::{CrashSummary, GameEvent, JoinInfo};
use crate::game::state::{
    PlayerRoundInfo, Round, RoundState, RoundSummary, TickSample, UserState,
};
use crate::game::tick::{
    estimate_next_tick, estimate_tick_time_diff, EstimatorError, NextTickEstimate, TickEstimator,
};
use crate::network::protocol::{
    CashedOut, ClientRequest, GameCrash, GameStarting, GameTick, JoinSnapshot, PlayerBet,
    ServerEvent,
};
use crate::proof::verify::{verify_round, Verdict};

/// Ended rounds kept in the history list.
pub const DEFAULT_HISTORY_LIMIT: usize = 40;

/// Lowest auto cashout the server accepts (1.00x).
pub const MIN_AUTO_CASHOUT: u64 = 100;

// =============================================================================
// CLOCK
// =============================================================================

/// Source of wall-clock and monotonic time.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
    /// Current monotonic instant.
    fn instant(&self) -> Instant;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    inner: Mutex<(DateTime<Utc>, Instant)>,
}

impl ManualClock {
    /// Start at the current system time.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new((Utc::now(), Instant::now())),
        }
    }

    /// Move both clocks forward.
    pub fn advance(&self, ms: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.0 += chrono::Duration::milliseconds(ms as i64);
        inner.1 += Duration::from_millis(ms);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).0
    }

    fn instant(&self) -> Instant {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).1
    }
}

/// Shift both clock readings by signed milliseconds.
///
/// Offsets outside either clock's range leave both readings unshifted, so
/// the wall and monotonic anchors of a round always agree.
fn shift_clock(now: DateTime<Utc>, instant: Instant, ms: i64) -> (DateTime<Utc>, Instant) {
    let delta = Duration::from_millis(ms.unsigned_abs());
    let shifted_instant = if ms >= 0 {
        instant.checked_add(delta)
    } else {
        instant.checked_sub(delta)
    };
    let shifted_now =
        chrono::Duration::try_milliseconds(ms).and_then(|offset| now.checked_add_signed(offset));

    match (shifted_now, shifted_instant) {
        (Some(now), Some(instant)) => (now, instant),
        _ => {
            warn!("Clock offset of {} ms out of range, anchoring at now", ms);
            (now, instant)
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Protocol invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No snapshot since start or since the last disconnect.
    #[error("{event} before join snapshot")]
    NotSynced {
        /// Event name.
        event: &'static str,
    },

    /// Event not valid in the round's current state.
    #[error("{event} in round {game_id} while {state:?}")]
    WrongState {
        /// Event name.
        event: &'static str,
        /// Round identifier.
        game_id: u64,
        /// Round state at the time.
        state: RoundState,
    },

    /// Event names a player not in the round.
    #[error("{event} for unknown player {username} in round {game_id}")]
    UnknownPlayer {
        /// Event name.
        event: &'static str,
        /// Round identifier.
        game_id: u64,
        /// Username from the event.
        username: String,
    },

    /// Tick did not advance elapsed time.
    #[error("non-increasing tick in round {game_id}: {elapsed_ms} after {last_ms}")]
    NonIncreasingTick {
        /// Round identifier.
        game_id: u64,
        /// Elapsed of the last recorded tick.
        last_ms: u64,
        /// Elapsed of the rejected tick.
        elapsed_ms: u64,
    },
}

/// Locally rejected actions. Nothing is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// No snapshot yet.
    #[error("not synchronized with the server")]
    NotSynced,

    /// Snapshot carried no username.
    #[error("not logged in")]
    NotLoggedIn,

    /// Local state does not allow the action.
    #[error("cannot {action} while {state:?}")]
    InvalidState {
        /// Action name.
        action: &'static str,
        /// Local state.
        state: UserState,
    },

    /// Zero bet.
    #[error("bet amount must be positive")]
    InvalidAmount,

    /// Auto cashout below 1.00x.
    #[error("auto cashout {0} is below {MIN_AUTO_CASHOUT}")]
    InvalidAutoCashout(u64),

    /// Bet exceeds the known balance.
    #[error("bet {amount} exceeds balance {balance}")]
    InsufficientBalance {
        /// Requested amount.
        amount: u64,
        /// Known balance.
        balance: u64,
    },
}

// =============================================================================
// QUERIES
// =============================================================================

/// Public view of the current round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameInfo {
    /// Round identifier.
    pub game_id: u64,
    /// Lifecycle state.
    pub state: RoundState,
    /// Milliseconds since start (negative during countdown).
    pub elapsed_ms: i64,
    /// Wall-clock start.
    pub start_time: DateTime<Utc>,
    /// Commitment for the round's seed.
    pub server_seed_hash: Option<String>,
    /// Maximum payout.
    pub max_win: Option<u64>,
    /// Participants.
    pub players: BTreeMap<String, PlayerRoundInfo>,
    /// Recorded ticks.
    pub ticks: Vec<TickSample>,
    /// Revealed seed (ENDED only).
    pub server_seed: Option<String>,
    /// Crash multiplier (ENDED only).
    pub crash: Option<u64>,
    /// Seed verdict (ENDED by a crash event only).
    pub verdict: Option<Verdict>,
}

// =============================================================================
// SESSION
// =============================================================================

/// State of the table as seen by one client.
pub struct GameSession {
    clock: Arc<dyn Clock>,
    client_seed: String,
    round: Option<Round>,
    user_state: UserState,
    username: Option<String>,
    balance: Option<u64>,
    /// Local bet already taken from the balance this round.
    debited: Option<u64>,
    estimator: TickEstimator,
    /// Most recent revealed seed; the next round's commitment.
    last_revealed: Option<String>,
    history: VecDeque<RoundSummary>,
    history_limit: usize,
}

impl GameSession {
    /// Session on the system clock.
    pub fn new(client_seed: impl Into<String>) -> Self {
        Self::with_clock(client_seed, Arc::new(SystemClock))
    }

    /// Session on a given clock.
    pub fn with_clock(client_seed: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            client_seed: client_seed.into(),
            round: None,
            user_state: UserState::Watching,
            username: None,
            balance: None,
            debited: None,
            estimator: TickEstimator::new(),
            last_revealed: None,
            history: VecDeque::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Change how many ended rounds are kept.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Apply one decoded server event.
    pub fn apply(&mut self, event: ServerEvent) -> Result<GameEvent, SessionError> {
        match event {
            ServerEvent::Join(snapshot) => Ok(self.on_join(snapshot)),
            ServerEvent::GameStarting(msg) => self.on_game_starting(msg),
            ServerEvent::GameStarted(bets) => self.on_game_started(bets),
            ServerEvent::GameTick(tick) => self.on_game_tick(tick),
            ServerEvent::GameCrash(msg) => self.on_game_crash(msg),
            ServerEvent::PlayerBet(msg) => self.on_player_bet(msg),
            ServerEvent::CashedOut(msg) => self.on_cashed_out(msg),
        }
    }

    /// Drop round state after a disconnect.
    pub fn invalidate(&mut self) {
        if let Some(round) = self.round.take() {
            debug!("Session invalidated in round {}", round.id);
        }
        self.user_state = UserState::Watching;
        self.debited = None;
        self.estimator = TickEstimator::new();
    }

    // =========================================================================
    // INBOUND EVENTS
    // =========================================================================

    /// Rebuild everything from a join snapshot.
    pub fn on_join(&mut self, snapshot: JoinSnapshot) -> GameEvent {
        let now = self.clock.now();
        let instant = self.clock.instant();
        let elapsed = snapshot.elapsed;

        let (start_time, start_instant) = shift_clock(now, instant, elapsed.saturating_neg());
        let mut round = Round::starting(
            snapshot.game_id,
            None,
            snapshot.max_win,
            start_time,
            start_instant,
        );
        round.state = snapshot.state;

        if snapshot.state == RoundState::Ended {
            round.server_seed = snapshot.last_hash.clone();
            round.crash = snapshot
                .table_history
                .iter()
                .find(|entry| entry.game_id == snapshot.game_id)
                .map(|entry| entry.game_crash);
        } else {
            round.server_seed_hash = snapshot.last_hash.clone();
        }
        self.last_revealed = snapshot.last_hash.clone();

        for (username, info) in &snapshot.player_info {
            let mut player = PlayerRoundInfo::new(info.bet, None, now);
            player.cashed_out_at = info.stopped_at;
            player.bonus = info.bonus;
            round.players.insert(username.clone(), player);
        }
        for username in &snapshot.joined {
            round
                .players
                .entry(username.clone())
                .or_insert_with(|| PlayerRoundInfo::new(0, None, now));
        }

        self.estimator = TickEstimator::new();
        if snapshot.state == RoundState::InProgress {
            let elapsed_ms = elapsed.max(0) as u64;
            let offset = round.monotonic_offset_us(instant);
            self.estimator = TickEstimator::seeded();
            if elapsed_ms > 0 {
                self.estimator.add(elapsed_ms as f64, offset as f64);
            }
            // Only the join point was observed; tick gaps start after it.
            round.ticks.push(TickSample {
                elapsed_ms,
                growth: growth(elapsed_ms),
                monotonic_offset_us: offset,
            });
        }

        self.username = snapshot.username.clone();
        self.balance = snapshot.balance;
        self.user_state = match snapshot
            .username
            .as_ref()
            .and_then(|name| round.players.get(name))
        {
            None => UserState::Watching,
            Some(player) if player.cashed_out_at.is_some() => UserState::CashedOut,
            Some(_) if snapshot.state == RoundState::Ended => UserState::Crashed,
            Some(_) => UserState::Playing,
        };
        // The snapshot balance already excludes a bet the server holds.
        self.debited = snapshot
            .username
            .as_ref()
            .and_then(|name| round.players.get(name))
            .map(|player| player.bet);

        self.history = snapshot
            .table_history
            .iter()
            .take(self.history_limit)
            .map(|entry| RoundSummary {
                game_id: entry.game_id,
                crash: entry.game_crash,
                server_seed: entry.hash.clone(),
                verdict: entry.hash.as_deref().map(|seed| {
                    verify_round(seed, &self.client_seed, entry.game_crash, None).verdict
                }),
            })
            .collect();

        info!(
            "Joined round {} ({:?}, elapsed {} ms) as {:?}",
            round.id, round.state, elapsed, self.username
        );

        let info = JoinInfo {
            game_id: round.id,
            state: round.state,
            elapsed_ms: elapsed,
            username: self.username.clone(),
            balance: self.balance,
            user_state: self.user_state,
            player_count: round.players.len(),
        };
        self.round = Some(round);
        GameEvent::Join(info)
    }

    /// New round enters its countdown.
    pub fn on_game_starting(&mut self, msg: GameStarting) -> Result<GameEvent, SessionError> {
        let previous = self.round.as_ref().ok_or(SessionError::NotSynced {
            event: "game_starting",
        })?;
        if previous.state != RoundState::Ended {
            warn!(
                "Round {} replaced while {:?}; crash was missed",
                previous.id, previous.state
            );
        }

        let countdown = i64::try_from(msg.time_till_start).unwrap_or(i64::MAX);
        let (start_time, start_instant) =
            shift_clock(self.clock.now(), self.clock.instant(), countdown);
        let round = Round::starting(
            msg.game_id,
            self.last_revealed.clone(),
            msg.max_win,
            start_time,
            start_instant,
        );

        self.user_state = UserState::Watching;
        self.debited = None;
        self.estimator = TickEstimator::new();

        let event = GameEvent::GameStarting {
            game_id: round.id,
            max_win: round.max_win,
            time_till_start: msg.time_till_start,
            server_seed_hash: round.server_seed_hash.clone(),
            user_state: self.user_state,
        };
        self.round = Some(round);
        Ok(event)
    }

    /// Countdown over; confirmed bets ride.
    pub fn on_game_started(
        &mut self,
        bets: BTreeMap<String, u64>,
    ) -> Result<GameEvent, SessionError> {
        let now = self.clock.now();
        let instant = self.clock.instant();
        let round = self.round_in("game_started", RoundState::Starting)?;

        round.state = RoundState::InProgress;
        round.start_time = now;
        round.monotonic_start = instant;
        round.players.retain(|username, _| bets.contains_key(username));
        for (username, &bet) in &bets {
            round
                .players
                .entry(username.clone())
                .and_modify(|player| player.bet = bet)
                .or_insert_with(|| PlayerRoundInfo::new(bet, None, now));
        }
        round.ticks = vec![TickSample {
            elapsed_ms: 0,
            growth: growth(0),
            monotonic_offset_us: 0,
        }];
        let game_id = round.id;

        self.estimator = TickEstimator::seeded();

        let local_bet = self.username.as_ref().and_then(|name| bets.get(name)).copied();
        match local_bet {
            Some(bet) => {
                if self.debited.is_none() {
                    self.debit(bet);
                }
                if matches!(
                    self.user_state,
                    UserState::Watching | UserState::Placing | UserState::Placed
                ) {
                    self.user_state = UserState::Playing;
                }
            }
            None => {
                if let Some(refund) = self.debited.take() {
                    self.credit(refund);
                }
                if self.user_state != UserState::Watching {
                    debug!("Local bet excluded from round {}", game_id);
                    self.user_state = UserState::Watching;
                }
            }
        }

        Ok(GameEvent::GameStarted {
            game_id,
            bets,
            user_state: self.user_state,
        })
    }

    /// Record a tick.
    pub fn on_game_tick(&mut self, tick: GameTick) -> Result<GameEvent, SessionError> {
        let instant = self.clock.instant();
        let round = self.round_in("game_tick", RoundState::InProgress)?;

        let elapsed_ms = tick.elapsed();
        if let Some(last) = round.last_tick() {
            if elapsed_ms <= last.elapsed_ms {
                return Err(SessionError::NonIncreasingTick {
                    game_id: round.id,
                    last_ms: last.elapsed_ms,
                    elapsed_ms,
                });
            }
        }

        let sample = TickSample {
            elapsed_ms,
            growth: growth(elapsed_ms),
            monotonic_offset_us: round.monotonic_offset_us(instant),
        };
        round.ticks.push(sample);
        let game_id = round.id;

        self.estimator
            .add(sample.elapsed_ms as f64, sample.monotonic_offset_us as f64);

        Ok(GameEvent::GameTick {
            game_id,
            tick: sample,
        })
    }

    /// Round over; verify the revealed seed.
    pub fn on_game_crash(&mut self, msg: GameCrash) -> Result<GameEvent, SessionError> {
        let client_seed = self.client_seed.clone();
        let round = self.round_in("game_crash", RoundState::InProgress)?;

        if let Some(username) = msg.bonuses.keys().find(|name| !round.players.contains_key(*name)) {
            return Err(SessionError::UnknownPlayer {
                event: "game_crash",
                game_id: round.id,
                username: username.clone(),
            });
        }

        round.state = RoundState::Ended;
        round.server_seed = Some(msg.hash.clone());
        round.crash = Some(msg.game_crash);
        round.forced = Some(msg.forced);
        for (username, &bonus) in &msg.bonuses {
            if let Some(player) = round.players.get_mut(username) {
                player.bonus = Some(bonus);
            }
        }

        let verification = verify_round(
            &msg.hash,
            &client_seed,
            msg.game_crash,
            round.server_seed_hash.as_deref(),
        );
        round.verification = Some(verification.clone());
        if !verification.verdict.is_ok() {
            warn!(
                "Round {} failed verification: computed {} reported {}",
                round.id, verification.computed, verification.reported
            );
        }

        let summary = round.summary();
        let game_id = round.id;

        if matches!(self.user_state, UserState::Playing | UserState::CashingOut) {
            self.user_state = UserState::Crashed;
        }
        let local_bonus = self
            .username
            .as_ref()
            .and_then(|name| msg.bonuses.get(name))
            .copied();
        if let Some(bonus) = local_bonus {
            self.credit(bonus);
        }

        self.last_revealed = Some(msg.hash.clone());
        if let Some(summary) = summary {
            self.history.push_front(summary);
            self.history.truncate(self.history_limit);
        }

        Ok(GameEvent::GameCrash(CrashSummary {
            game_id,
            crash: msg.game_crash,
            forced: msg.forced,
            elapsed_ms: msg.elapsed,
            expected_duration_ms: duration(msg.game_crash),
            server_seed: msg.hash,
            bonuses: msg.bonuses,
            verification,
            user_state: self.user_state,
        }))
    }

    /// A bet was accepted.
    pub fn on_player_bet(&mut self, msg: PlayerBet) -> Result<GameEvent, SessionError> {
        let now = self.clock.now();
        let round = self.round.as_mut().ok_or(SessionError::NotSynced {
            event: "player_bet",
        })?;
        if round.state == RoundState::Ended {
            return Err(SessionError::WrongState {
                event: "player_bet",
                game_id: round.id,
                state: round.state,
            });
        }

        round
            .players
            .entry(msg.username.clone())
            .and_modify(|player| {
                player.bet = msg.bet;
                player.auto_cashout = msg.auto_cashout;
            })
            .or_insert_with(|| PlayerRoundInfo::new(msg.bet, msg.auto_cashout, now));
        let game_id = round.id;

        let local = self.is_local(&msg.username);
        if local {
            if matches!(self.user_state, UserState::Watching | UserState::Placing) {
                self.user_state = UserState::Placed;
            }
            if self.debited.is_none() {
                self.debit(msg.bet);
            }
        }

        Ok(GameEvent::PlayerBet {
            game_id,
            username: msg.username,
            bet: msg.bet,
            auto_cashout: msg.auto_cashout,
            local,
        })
    }

    /// A player took their payout.
    pub fn on_cashed_out(&mut self, msg: CashedOut) -> Result<GameEvent, SessionError> {
        let round = self.round_in("cashed_out", RoundState::InProgress)?;
        let game_id = round.id;

        let player = round
            .players
            .get_mut(&msg.username)
            .ok_or_else(|| SessionError::UnknownPlayer {
                event: "cashed_out",
                game_id,
                username: msg.username.clone(),
            })?;
        player.cashed_out_at = Some(msg.stopped_at);
        let payout = player.payout_at(msg.stopped_at);

        let local = self.is_local(&msg.username);
        if local {
            self.credit(payout);
            self.user_state = UserState::CashedOut;
        }

        Ok(GameEvent::CashedOut {
            game_id,
            username: msg.username,
            stopped_at: msg.stopped_at,
            payout,
            local,
        })
    }

    // =========================================================================
    // OUTBOUND ACTIONS
    // =========================================================================

    /// WATCHING -> PLACING; returns the request to send.
    pub fn begin_place_bet(
        &mut self,
        amount: u64,
        auto_cashout: u64,
    ) -> Result<ClientRequest, ActionError> {
        self.require_identity()?;
        if self.user_state != UserState::Watching {
            return Err(ActionError::InvalidState {
                action: "place bet",
                state: self.user_state,
            });
        }
        if amount == 0 {
            return Err(ActionError::InvalidAmount);
        }
        if auto_cashout < MIN_AUTO_CASHOUT {
            return Err(ActionError::InvalidAutoCashout(auto_cashout));
        }
        if let Some(balance) = self.balance {
            if amount > balance {
                return Err(ActionError::InsufficientBalance { amount, balance });
            }
        }

        self.user_state = UserState::Placing;
        Ok(ClientRequest::PlaceBet {
            amount,
            auto_cashout,
        })
    }

    /// PLAYING/PLACING/PLACED -> CASHINGOUT; returns the request to send.
    pub fn begin_cashout(&mut self) -> Result<ClientRequest, ActionError> {
        self.require_identity()?;
        if !self.user_state.holds_bet() {
            return Err(ActionError::InvalidState {
                action: "cash out",
                state: self.user_state,
            });
        }

        self.user_state = UserState::CashingOut;
        Ok(ClientRequest::CashOut)
    }

    /// Change the auto cashout of the current bet; no state change.
    pub fn set_auto_cashout(&mut self, factor: u64) -> Result<ClientRequest, ActionError> {
        self.require_identity()?;
        if !self.user_state.holds_bet() {
            return Err(ActionError::InvalidState {
                action: "set auto cashout",
                state: self.user_state,
            });
        }
        if factor < MIN_AUTO_CASHOUT {
            return Err(ActionError::InvalidAutoCashout(factor));
        }

        let username = self.username.clone();
        if let (Some(round), Some(name)) = (self.round.as_mut(), username) {
            if let Some(player) = round.players.get_mut(&name) {
                player.auto_cashout = Some(factor);
            }
        }
        Ok(ClientRequest::SetAutoCashOut { factor })
    }

    /// Undo the local transition of a request the server refused.
    pub fn on_action_rejected(&mut self, request: &ClientRequest) {
        let restored = match (request, self.user_state) {
            (ClientRequest::PlaceBet { .. }, UserState::Placing) => UserState::Watching,
            (ClientRequest::CashOut, UserState::CashingOut) => {
                let started = self
                    .round
                    .as_ref()
                    .map_or(false, |round| round.state == RoundState::InProgress);
                if started {
                    UserState::Playing
                } else {
                    UserState::Placed
                }
            }
            _ => return,
        };
        debug!("{} rejected: {:?} -> {:?}", request.name(), self.user_state, restored);
        self.user_state = restored;
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Whether a snapshot is held.
    pub fn is_synced(&self) -> bool {
        self.round.is_some()
    }

    /// The current round.
    pub fn round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    /// Public view of the current round.
    pub fn game_info(&self) -> Option<GameInfo> {
        let round = self.round.as_ref()?;
        let ended = round.state == RoundState::Ended;
        Some(GameInfo {
            game_id: round.id,
            state: round.state,
            elapsed_ms: round.elapsed_ms(self.clock.now()),
            start_time: round.start_time,
            server_seed_hash: round.server_seed_hash.clone(),
            max_win: round.max_win,
            players: round.players.clone(),
            ticks: round.ticks.clone(),
            server_seed: round.server_seed.clone().filter(|_| ended),
            crash: round.crash.filter(|_| ended),
            verdict: round
                .verification
                .as_ref()
                .map(|v| v.verdict)
                .filter(|_| ended),
        })
    }

    /// Participants of the current round.
    pub fn players(&self) -> Option<&BTreeMap<String, PlayerRoundInfo>> {
        self.round.as_ref().map(|round| &round.players)
    }

    /// Latest tick of the current round.
    pub fn last_tick(&self) -> Option<&TickSample> {
        self.round.as_ref().and_then(Round::last_tick)
    }

    /// Window for the next tick.
    pub fn estimate_next_tick(&self) -> Result<NextTickEstimate, EstimatorError> {
        let insufficient = EstimatorError::InsufficientData {
            samples: self.estimator.samples(),
        };
        let round = self.round.as_ref().ok_or(insufficient)?;
        let last = round.last_tick().ok_or(insufficient)?;
        estimate_next_tick(last, estimate_tick_time_diff(&round.ticks), &self.estimator)
    }

    /// The round's tick estimator.
    pub fn estimator(&self) -> &TickEstimator {
        &self.estimator
    }

    /// Local state in the current round.
    pub fn user_state(&self) -> UserState {
        self.user_state
    }

    /// Local username.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Local balance as tracked from events.
    pub fn balance(&self) -> Option<u64> {
        self.balance
    }

    /// Ended rounds, newest first.
    pub fn history(&self) -> &VecDeque<RoundSummary> {
        &self.history
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn round_in(
        &mut self,
        event: &'static str,
        expected: RoundState,
    ) -> Result<&mut Round, SessionError> {
        let round = self
            .round
            .as_mut()
            .ok_or(SessionError::NotSynced { event })?;
        if round.state != expected {
            return Err(SessionError::WrongState {
                event,
                game_id: round.id,
                state: round.state,
            });
        }
        Ok(round)
    }

    fn require_identity(&self) -> Result<(), ActionError> {
        if self.round.is_none() {
            return Err(ActionError::NotSynced);
        }
        if self.username.is_none() {
            return Err(ActionError::NotLoggedIn);
        }
        Ok(())
    }

    fn is_local(&self, username: &str) -> bool {
        self.username.as_deref() == Some(username)
    }

    fn debit(&mut self, amount: u64) {
        self.debited = Some(amount);
        if let Some(balance) = self.balance.as_mut() {
            *balance = balance.saturating_sub(amount);
        }
    }

    fn credit(&mut self, amount: u64) {
        if let Some(balance) = self.balance.as_mut() {
            *balance = balance.saturating_add(amount);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
