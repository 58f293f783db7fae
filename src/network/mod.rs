//! Network Layer
//!
//! WebSocket client for the game server. This layer owns time and I/O;
//! the crash math lives in `core/` and `proof/`.

pub mod auth;
pub mod frame;
pub mod protocol;
pub mod session;
pub mod client;

pub use auth::{TokenError, TokenSource};
pub use frame::{Frame, FrameError, Handshake, Packet};
pub use protocol::{ClientRequest, JoinSnapshot, ProtocolError, ServerEvent};
pub use session::{
    ActionError, Clock, GameInfo, GameSession, ManualClock, SessionError, SystemClock,
};
pub use client::{ClientConfig, ClientError, ProtocolClient};
