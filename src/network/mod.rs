//! Network Layer
//!
//! Everything with clocks, channels and sockets. Rules live in `game/`;
//! this layer decides *when* they run and who hears about it.

pub mod auth;
pub mod matchmaking;
pub mod protocol;
pub mod session;
pub mod server;

pub use auth::{AuthConfig, AuthError, TokenClaims, validate_token};
pub use matchmaking::{BackfillTick, Matchmaker, MatchmakingConfig, MatchmakingError, QueueEntry, TierQueues};
pub use protocol::{ClientMessage, ErrorCode, RoomSnapshot, ServerMessage};
pub use session::{ActionSlot, ClientDirectory, RoomEnd, RoomRegistry, SessionError};
pub use server::{GameServer, GameServerError, ServerConfig};
