//! # Ludo Session Server
//!
//! Matchmaking and turn engine for four-seat Ludo rooms.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        LUDO SERVER                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  core/             - Primitives                               │
//! │  └── rng.rs        - Xorshift128+ dice                        │
//! │                                                               │
//! │  game/             - Rules (pure, no I/O)                     │
//! │  ├── board.rs      - Colors, squares, per-color routes        │
//! │  ├── state.rs      - Identities, pieces, rooms                │
//! │  ├── movement.rs   - Move validation and captures             │
//! │  ├── turn.rs       - Turn state machine and timings           │
//! │  └── events.rs     - Events drained by the room loop          │
//! │                                                               │
//! │  network/          - Clocks, channels, sockets                │
//! │  ├── matchmaking.rs- Tier queues and bot backfill             │
//! │  ├── session.rs    - Client directory, rooms, room loop       │
//! │  ├── protocol.rs   - Wire messages                            │
//! │  ├── auth.rs       - JWT validation                           │
//! │  └── server.rs     - WebSocket server                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A connection authenticates, joins its tier's queue, and is seated once
//! the queue fills (bots backfill slow queues). Each room is then driven by
//! its own task until someone wins, every player has gone, or the server
//! stops.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::rng::{DiceRng, DiceSource};
pub use game::board::Color;
pub use game::state::{GameRoom, PlayerId, PlayerIdentity, Tier};
pub use network::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
