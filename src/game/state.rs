//! Game State Definitions
//!
//! Identities, pieces, participants and the room that owns them.
//! A [`GameRoom`] is mutated only by its own turn loop.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::game::board::{Color, Square, FINISH_LINE};
use crate::game::events::{GameEvent, GameEventData};
use crate::game::turn::TurnPhase;

/// Pieces owned by every participant.
pub const PIECES_PER_PLAYER: usize = 4;

/// Seats in every room.
pub const SEATS_PER_ROOM: usize = 4;

/// Globally unique room identifier, also the broadcast routing key.
pub type RoomId = Uuid;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Stable account identifier issued by the account service.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Wrap an account id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh id for a synthetic player.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// TIER
// =============================================================================

/// Matchmaking bracket. Players only meet others of the same tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Entry bracket.
    Bronze,
    /// Second bracket.
    Silver,
    /// Third bracket.
    Gold,
    /// Top bracket.
    Diamond,
}

impl Tier {
    /// All tiers, lowest first.
    pub const ALL: [Tier; 4] = [Tier::Bronze, Tier::Silver, Tier::Gold, Tier::Diamond];

    /// Lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Tier::Bronze => "bronze",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
            Tier::Diamond => "diamond",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated identity attached to a connection. Read-only here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerIdentity {
    /// Account id.
    pub id: PlayerId,
    /// Display name.
    pub username: String,
    /// Matchmaking bracket.
    pub tier: Tier,
    /// Account balance. Carried through untouched.
    #[serde(default)]
    pub balance: f64,
}

// =============================================================================
// PIECES
// =============================================================================

/// Whether a piece is in play.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceState {
    /// Waiting in the yard.
    Locked,
    /// On its route.
    Unlocked,
}

/// A single piece.
///
/// `position` is `Some` exactly when the piece is unlocked, and never
/// exceeds [`FINISH_LINE`]. The fields are private so that holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Piece {
    name: String,
    state: PieceState,
    position: Option<u8>,
}

impl Piece {
    /// A locked piece named `{color}{number}`.
    pub fn locked(color: Color, number: usize) -> Self {
        Self {
            name: format!("{color}{number}"),
            state: PieceState::Locked,
            position: None,
        }
    }

    /// An unlocked piece at `position` (clamped to the finish line).
    pub fn unlocked_at(color: Color, number: usize, position: u8) -> Self {
        Self {
            name: format!("{color}{number}"),
            state: PieceState::Unlocked,
            position: Some(position.min(FINISH_LINE)),
        }
    }

    /// Piece name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Locked or unlocked.
    pub fn state(&self) -> PieceState {
        self.state
    }

    /// Progress along the owner's route, `None` while locked.
    pub fn position(&self) -> Option<u8> {
        self.position
    }

    /// Is the piece on the board.
    #[inline]
    pub fn is_unlocked(&self) -> bool {
        self.state == PieceState::Unlocked
    }

    /// Has the piece reached the end of its route.
    pub fn is_finished(&self) -> bool {
        self.position == Some(FINISH_LINE)
    }

    /// Grid square for this piece, if it is on the board.
    pub fn square(&self, owner: Color) -> Option<Square> {
        self.position.and_then(|p| owner.square_at(p))
    }

    /// Bring the piece onto its start square.
    pub(crate) fn unlock(&mut self) {
        self.state = PieceState::Unlocked;
        self.position = Some(0);
    }

    /// Move `steps` forward. Callers check the finish line first.
    pub(crate) fn advance(&mut self, steps: u8) {
        if let Some(p) = self.position {
            self.position = Some(p.saturating_add(steps).min(FINISH_LINE));
        }
    }

    /// Return the piece to the yard.
    pub(crate) fn send_home(&mut self) {
        self.state = PieceState::Locked;
        self.position = None;
    }
}

/// Four fresh locked pieces for a seat.
pub fn starting_pieces(color: Color) -> [Piece; PIECES_PER_PLAYER] {
    std::array::from_fn(|i| Piece::locked(color, i + 1))
}

// =============================================================================
// PARTICIPANTS
// =============================================================================

/// Who sits in a seat.
#[derive(Clone, Debug, PartialEq)]
pub enum ParticipantKind {
    /// A connected player.
    Real(PlayerIdentity),
    /// A synthetic stand-in.
    Bot {
        /// Generated id.
        id: PlayerId,
        /// Generated name (`bot1`, `bot2`, ...).
        name: String,
    },
}

impl ParticipantKind {
    /// A bot with a fresh id.
    pub fn bot(number: usize) -> Self {
        ParticipantKind::Bot {
            id: PlayerId::random(),
            name: format!("bot{number}"),
        }
    }
}

/// A seated participant and its pieces.
#[derive(Clone, Debug)]
pub struct Participant {
    /// Seat color.
    pub color: Color,
    /// Real or bot.
    pub kind: ParticipantKind,
    /// The seat's four pieces, in name order.
    pub pieces: [Piece; PIECES_PER_PLAYER],
}

impl Participant {
    /// Seat `kind` at `color` with four locked pieces.
    pub fn new(color: Color, kind: ParticipantKind) -> Self {
        Self { color, kind, pieces: starting_pieces(color) }
    }

    /// Participant id (account id or generated bot id).
    pub fn id(&self) -> &PlayerId {
        match &self.kind {
            ParticipantKind::Real(identity) => &identity.id,
            ParticipantKind::Bot { id, .. } => id,
        }
    }

    /// Display name.
    pub fn username(&self) -> &str {
        match &self.kind {
            ParticipantKind::Real(identity) => &identity.username,
            ParticipantKind::Bot { name, .. } => name,
        }
    }

    /// Account id for real participants.
    pub fn player_id(&self) -> Option<&PlayerId> {
        match &self.kind {
            ParticipantKind::Real(identity) => Some(&identity.id),
            ParticipantKind::Bot { .. } => None,
        }
    }

    /// Is this seat played by a bot.
    pub fn is_bot(&self) -> bool {
        matches!(self.kind, ParticipantKind::Bot { .. })
    }

    /// All four pieces have reached the finish line.
    pub fn has_finished(&self) -> bool {
        self.pieces.iter().all(Piece::is_finished)
    }
}

// =============================================================================
// ROOM
// =============================================================================

/// A running four-seat game.
#[derive(Debug)]
pub struct GameRoom {
    /// Room identifier.
    pub id: RoomId,
    /// Bracket the room was formed from.
    pub tier: Tier,
    /// Seats in turn order (index = [`Color::index`]).
    pub(crate) participants: [Participant; SEATS_PER_ROOM],
    /// Seat whose turn it is.
    pub(crate) turn: Color,
    /// Most recent roll.
    pub(crate) last_dice: Option<u8>,
    /// Where the turn machine stands.
    pub(crate) phase: TurnPhase,
    /// Turns started so far.
    pub(crate) turn_number: u32,
    /// Formation time.
    pub created_at: DateTime<Utc>,
    /// Events not yet drained by the room loop.
    events: Vec<GameEvent>,
}

impl GameRoom {
    /// Seat four participants in blue, red, green, yellow order.
    pub fn new(id: RoomId, tier: Tier, seats: [ParticipantKind; SEATS_PER_ROOM]) -> Self {
        let mut colors = Color::ALL.into_iter();
        let participants = seats.map(|kind| {
            let color = colors.next().unwrap_or(Color::Yellow);
            Participant::new(color, kind)
        });

        Self {
            id,
            tier,
            participants,
            turn: Color::Blue,
            last_dice: None,
            phase: TurnPhase::AwaitingRoll { seat: Color::Blue },
            turn_number: 0,
            created_at: Utc::now(),
            events: Vec::new(),
        }
    }

    /// All seats in turn order.
    pub fn participants(&self) -> &[Participant; SEATS_PER_ROOM] {
        &self.participants
    }

    /// Seat lookup.
    pub fn participant(&self, color: Color) -> &Participant {
        &self.participants[color.index()]
    }

    /// Mutable seat lookup.
    pub fn participant_mut(&mut self, color: Color) -> &mut Participant {
        &mut self.participants[color.index()]
    }

    /// Seat held by an account, if any.
    pub fn seat_of(&self, player_id: &PlayerId) -> Option<Color> {
        self.participants.iter()
            .find(|p| p.player_id() == Some(player_id))
            .map(|p| p.color)
    }

    /// Account ids of all real participants.
    pub fn real_player_ids(&self) -> Vec<PlayerId> {
        self.participants.iter()
            .filter_map(|p| p.player_id().cloned())
            .collect()
    }

    /// Seat whose turn it is.
    pub fn turn(&self) -> Color {
        self.turn
    }

    /// Most recent roll.
    pub fn last_dice(&self) -> Option<u8> {
        self.last_dice
    }

    /// Current turn machine phase.
    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Turns started so far.
    pub fn turn_number(&self) -> u32 {
        self.turn_number
    }

    /// Record an event.
    pub(crate) fn push_event(&mut self, data: GameEventData) {
        self.events.push(GameEvent::new(self.turn_number, data));
    }

    /// Drain pending events in emission order.
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str) -> PlayerIdentity {
        PlayerIdentity {
            id: PlayerId::new(id),
            username: format!("user-{id}"),
            tier: Tier::Gold,
            balance: 0.0,
        }
    }

    #[test]
    fn test_starting_pieces() {
        let pieces = starting_pieces(Color::Green);
        let names: Vec<&str> = pieces.iter().map(Piece::name).collect();
        assert_eq!(names, ["green1", "green2", "green3", "green4"]);
        assert!(pieces.iter().all(|p| !p.is_unlocked() && p.position().is_none()));
    }

    #[test]
    fn test_piece_transitions_keep_invariant() {
        let mut piece = Piece::locked(Color::Red, 2);
        piece.unlock();
        assert_eq!((piece.state(), piece.position()), (PieceState::Unlocked, Some(0)));

        piece.advance(5);
        assert_eq!(piece.position(), Some(5));

        piece.advance(200);
        assert_eq!(piece.position(), Some(FINISH_LINE));
        assert!(piece.is_finished());

        piece.send_home();
        assert_eq!((piece.state(), piece.position()), (PieceState::Locked, None));
    }

    #[test]
    fn test_locked_piece_ignores_advance() {
        let mut piece = Piece::locked(Color::Blue, 1);
        piece.advance(3);
        assert_eq!(piece.position(), None);
    }

    #[test]
    fn test_piece_wire_shape() {
        let json = serde_json::to_value(Piece::locked(Color::Blue, 3)).unwrap();
        assert_eq!(json, serde_json::json!({"name": "blue3", "state": "locked", "position": null}));
    }

    #[test]
    fn test_room_seating() {
        let room = GameRoom::new(
            Uuid::new_v4(),
            Tier::Gold,
            [
                ParticipantKind::Real(identity("a")),
                ParticipantKind::Real(identity("b")),
                ParticipantKind::bot(1),
                ParticipantKind::bot(2),
            ],
        );

        let colors: Vec<Color> = room.participants().iter().map(|p| p.color).collect();
        assert_eq!(colors, Color::ALL);
        assert_eq!(room.turn(), Color::Blue);
        assert_eq!(room.last_dice(), None);
        assert_eq!(room.seat_of(&PlayerId::new("b")), Some(Color::Red));
        assert_eq!(room.real_player_ids().len(), 2);
        assert_eq!(room.participant(Color::Yellow).username(), "bot2");
        assert_eq!(room.participant(Color::Green).pieces[0].name(), "green1");
    }

    #[test]
    fn test_tier_serde() {
        let identity: PlayerIdentity = serde_json::from_str(
            r#"{"id":"663001c2","username":"bo","tier":"diamond","balance":12.5}"#,
        ).unwrap();
        assert_eq!(identity.tier, Tier::Diamond);
        assert!(Tier::Bronze < Tier::Diamond);
    }
}
