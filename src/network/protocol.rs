//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Inbound messages are tagged by `action`; outbound messages are
//! `{"event": ..., "message": ...}` envelopes.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::game::board::Color;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::state::{GameRoom, Participant, Piece, PieceState, PlayerId, RoomId, Tier};
use crate::game::turn::TurnPhase;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Roll for the named seat.
    Roll {
        /// Seat rolling.
        color: Color,
    },

    /// Move the named piece.
    Move {
        /// Piece name, e.g. `"blue2"`.
        piece: String,
    },

    /// Authenticate when no bearer header was sent on the handshake.
    Auth {
        /// Signed JWT.
        token: String,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client clock, echoed back.
        timestamp: u64,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "message", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Free-form status line.
    Status(String),

    /// Waiting in a tier queue.
    Queue(QueueStatus),

    /// Seat assigned to this connection.
    MyColor(Color),

    /// Room formed; full snapshot.
    RoomStart(RoomSnapshot),

    /// Snapshot after reconnecting to a running room.
    Sync(RoomSnapshot),

    /// Seat whose turn it is.
    Turn(Color),

    /// Die face just rolled.
    Dice(u8),

    /// Piece positions for every seat.
    Layout(Vec<SeatPieces>),

    /// A piece was sent home.
    Captured(CaptureInfo),

    /// The game has a winner.
    GameOver(GameOverInfo),

    /// Pong response.
    Pong {
        /// Timestamp from the ping.
        timestamp: u64,
        /// Server clock in milliseconds since the epoch.
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why the server is stopping.
        reason: String,
    },
}

/// Queue position report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Tier being queued for.
    pub tier: Tier,
    /// 1-based position in the queue.
    pub position: usize,
    /// Entries in the queue, bots included.
    pub size: usize,
}

/// Wire view of a piece.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceView {
    /// Piece name, e.g. `"blue2"`.
    pub name: String,
    /// Locked, unlocked or home.
    pub state: PieceState,
    /// Steps along the owner's route, `None` while locked.
    pub position: Option<u8>,
    /// Grid square, e.g. `"6B"`.
    pub square: Option<String>,
}

impl PieceView {
    fn new(piece: &Piece, owner: Color) -> Self {
        Self {
            name: piece.name().to_string(),
            state: piece.state(),
            position: piece.position(),
            square: piece.square(owner).map(|s| s.to_string()),
        }
    }
}

/// One seat's pieces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatPieces {
    /// Seat color.
    pub color: Color,
    /// The seat's four pieces in name order.
    pub pieces: Vec<PieceView>,
}

impl From<&Participant> for SeatPieces {
    fn from(p: &Participant) -> Self {
        Self {
            color: p.color,
            pieces: p.pieces.iter().map(|piece| PieceView::new(piece, p.color)).collect(),
        }
    }
}

/// One seat in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatView {
    /// Seat color.
    pub color: Color,
    /// Occupant's player id.
    pub id: PlayerId,
    /// Occupant's display name.
    pub username: String,
    /// Is the seat played by a bot.
    pub bot: bool,
    /// The seat's four pieces in name order.
    pub pieces: Vec<PieceView>,
}

impl From<&Participant> for SeatView {
    fn from(p: &Participant) -> Self {
        Self {
            color: p.color,
            id: p.id().clone(),
            username: p.username().to_string(),
            bot: p.is_bot(),
            pieces: SeatPieces::from(p).pieces,
        }
    }
}

/// Everything a client needs to draw a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    /// Room id.
    pub room_id: RoomId,
    /// Tier the room was formed from.
    pub tier: Tier,
    /// Seat to play.
    pub turn: Color,
    /// Most recent roll, if any.
    pub last_dice: Option<u8>,
    /// Turns begun so far.
    pub turn_number: u32,
    /// Where the current turn stands.
    pub phase: TurnPhase,
    /// When the room formed.
    pub created_at: DateTime<Utc>,
    /// Seats in turn order.
    pub seats: Vec<SeatView>,
}

impl From<&GameRoom> for RoomSnapshot {
    fn from(room: &GameRoom) -> Self {
        Self {
            room_id: room.id,
            tier: room.tier,
            turn: room.turn(),
            last_dice: room.last_dice(),
            turn_number: room.turn_number(),
            phase: room.phase(),
            created_at: room.created_at,
            seats: room.participants().iter().map(SeatView::from).collect(),
        }
    }
}

/// Capture notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureInfo {
    /// Capturing seat.
    pub by: Color,
    /// Owner of the captured piece.
    pub color: Color,
    /// Captured piece name.
    pub piece: String,
    /// Square the capture happened on.
    pub square: String,
}

/// Game end notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOverInfo {
    /// Room that finished.
    pub room_id: RoomId,
    /// Winning seat.
    pub winner: Color,
    /// Winner's display name.
    pub username: String,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// JWT token has expired.
    TokenExpired,
    /// Invalid JWT token (signature, format, claims).
    InvalidToken,
    /// Unparsable message.
    InvalidMessage,
    /// Already waiting in a tier queue.
    AlreadyQueued,
    /// Already seated in a running room.
    AlreadyInRoom,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

// =============================================================================
// CONVERSIONS
// =============================================================================

impl ServerMessage {
    /// Error envelope.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError { code, message: message.into() })
    }

    /// Piece layout of a room.
    pub fn layout(room: &GameRoom) -> Self {
        ServerMessage::Layout(room.participants().iter().map(SeatPieces::from).collect())
    }

    /// Outbound message for a game event, if clients see it.
    ///
    /// A moved piece becomes a full layout read from `room`, so drain events
    /// after the move has settled.
    pub fn from_event(event: &GameEvent, room: &GameRoom) -> Option<Self> {
        match &event.data {
            GameEventData::TurnStarted { seat } => Some(ServerMessage::Turn(*seat)),
            GameEventData::DiceRolled { value, .. } => Some(ServerMessage::Dice(*value)),
            GameEventData::PieceMoved { .. } => Some(Self::layout(room)),
            GameEventData::PieceCaptured { by, seat, piece, square } => {
                Some(ServerMessage::Captured(CaptureInfo {
                    by: *by,
                    color: *seat,
                    piece: piece.clone(),
                    square: square.to_string(),
                }))
            }
            GameEventData::GameWon { seat } => Some(ServerMessage::GameOver(GameOverInfo {
                room_id: room.id,
                winner: *seat,
                username: room.participant(*seat).username().to_string(),
            })),
            GameEventData::TurnPassed { .. } => None,
        }
    }

    /// Event name on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Status(_) => "status",
            ServerMessage::Queue(_) => "queue",
            ServerMessage::MyColor(_) => "my_color",
            ServerMessage::RoomStart(_) => "room_start",
            ServerMessage::Sync(_) => "sync",
            ServerMessage::Turn(_) => "turn",
            ServerMessage::Dice(_) => "dice",
            ServerMessage::Layout(_) => "layout",
            ServerMessage::Captured(_) => "captured",
            ServerMessage::GameOver(_) => "game_over",
            ServerMessage::Pong { .. } => "pong",
            ServerMessage::Error(_) => "error",
            ServerMessage::Shutdown { .. } => "shutdown",
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
