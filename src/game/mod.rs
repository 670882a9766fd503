//! Game Logic Module
//!
//! Rules and room state. No I/O, no clocks, no logging: the network layer
//! drives rooms and owns all waiting.
//!
//! ## Module Structure
//!
//! - `board`: Seat colors, grid squares, per-color routes
//! - `state`: Identities, pieces, participants, rooms
//! - `movement`: Move validation, piece selection, captures
//! - `turn`: Turn state machine, timings, input windows
//! - `events`: Game events drained by the room loop

pub mod board;
pub mod state;
pub mod movement;
pub mod turn;
pub mod events;

// Re-export key types
pub use board::{Color, Square, FINISH_LINE, PATH_LEN};
pub use state::{GameRoom, Participant, ParticipantKind, Piece, PieceState, PlayerId, PlayerIdentity, RoomId, Tier};
pub use movement::{MoveError, MoveOutcome, Capture};
pub use turn::{InputWindow, MoveChoice, MoveResolution, RollOutcome, TurnError, TurnPhase, TurnTimings};
pub use events::{GameEvent, GameEventData};
