//! # Crashpoint Client
//!
//! Session engine and provably-fair verifier for a real-time multiplayer
//! crash game.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CRASHPOINT CLIENT                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Pure primitives                           │
//! │  ├── growth.rs   - Elapsed time <-> multiplier curve         │
//! │  └── hash.rs     - HMAC-SHA256, SHA-256, digest folding      │
//! │                                                              │
//! │  proof/          - Provably-fair verification                │
//! │  ├── crash.rs    - Crash point from server + client seed     │
//! │  └── verify.rs   - Verdict and reveal-chain check            │
//! │                                                              │
//! │  game/           - Round model                               │
//! │  ├── state.rs    - Round, players, ticks, user state         │
//! │  ├── tick.rs     - Next-tick estimator                       │
//! │  └── events.rs   - Domain events for subscribers             │
//! │                                                              │
//! │  network/        - Networking (owns time and I/O)            │
//! │  ├── frame.rs    - Engine.IO / Socket.IO text framing        │
//! │  ├── protocol.rs - Typed event and request records           │
//! │  ├── session.rs  - Game session state machine                │
//! │  ├── auth.rs     - One-time join token                       │
//! │  └── client.rs   - WebSocket client, reconnect loop          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Control Flow
//!
//! transport -> `ProtocolClient` -> `GameSession` -> tick estimator and
//! crash verifier -> `GameEvent` -> subscribers.
//!
//! `core/` and `proof/` are pure: a round can be audited offline from its
//! revealed seed alone.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod proof;

// Re-export commonly used types
pub use core::growth::{duration, growth};
pub use game::events::GameEvent;
pub use game::state::{RoundState, UserState};
pub use network::client::{ClientConfig, ProtocolClient};
pub use network::session::GameSession;
pub use proof::crash::{crash_point, DEFAULT_CLIENT_SEED};
pub use proof::verify::{verify_round, Verdict};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
