//! Game Events
//!
//! Events produced by the turn machine, drained by the room loop and turned
//! into outbound messages in emission order.

use serde::Serialize;

use crate::game::board::{Color, Square};

/// Game event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GameEventData {
    /// A seat's turn began
    TurnStarted {
        /// Seat to play.
        seat: Color,
    },

    /// The die was rolled for a seat
    DiceRolled {
        /// Seat that rolled.
        seat: Color,
        /// Face shown.
        value: u8,
    },

    /// The roll left no legal move
    TurnPassed {
        /// Seat that rolled.
        seat: Color,
        /// Face rolled.
        dice: u8,
        /// Seat to play next.
        next: Color,
    },

    /// A piece was unlocked or advanced
    PieceMoved {
        /// Owner of the piece.
        seat: Color,
        /// Piece name.
        piece: String,
        /// Route index before the move, `None` when unlocking.
        from: Option<u8>,
        /// Route index after the move.
        to: u8,
        /// Square landed on.
        square: Square,
    },

    /// An opponent piece was sent home
    PieceCaptured {
        /// Capturing seat.
        by: Color,
        /// Owner of the captured piece.
        seat: Color,
        /// Captured piece name.
        piece: String,
        /// Square of the capture.
        square: Square,
    },

    /// Every piece of a seat reached the finish line
    GameWon {
        /// Winning seat.
        seat: Color,
    },
}

/// A game event stamped with the turn it happened on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GameEvent {
    /// Turn number when the event occurred
    pub turn: u32,

    /// Seat the event is about (the victim, for captures)
    pub seat: Color,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(turn: u32, data: GameEventData) -> Self {
        let seat = match &data {
            GameEventData::TurnStarted { seat }
            | GameEventData::DiceRolled { seat, .. }
            | GameEventData::TurnPassed { seat, .. }
            | GameEventData::PieceMoved { seat, .. }
            | GameEventData::PieceCaptured { seat, .. }
            | GameEventData::GameWon { seat } => *seat,
        };

        Self { turn, seat, data }
    }

    /// Create turn started event.
    pub fn turn_started(turn: u32, seat: Color) -> Self {
        Self::new(turn, GameEventData::TurnStarted { seat })
    }

    /// Create dice rolled event.
    pub fn dice_rolled(turn: u32, seat: Color, value: u8) -> Self {
        Self::new(turn, GameEventData::DiceRolled { seat, value })
    }

    /// Does this event change piece positions.
    pub fn moves_pieces(&self) -> bool {
        matches!(
            self.data,
            GameEventData::PieceMoved { .. } | GameEventData::PieceCaptured { .. }
        )
    }
}
