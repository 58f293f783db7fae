//! Game Model
//!
//! Round data, tick timing and the events published to subscribers.
//!
//! ## Module Structure
//!
//! - `state`: Round, participants, tick samples, user state
//! - `tick`: Tick estimator and inter-tick interval bounds
//! - `events`: Domain events for subscribers

pub mod state;
pub mod tick;
pub mod events;

// Re-export key types
pub use state::{PlayerRoundInfo, Round, RoundState, RoundSummary, TickSample, UserState};
pub use tick::{EstimatorError, NextTickEstimate, TickEstimator, TickInterval};
pub use events::{CrashSummary, GameEvent, JoinInfo};
