//! Turn State Machine
//!
//! `AwaitingRoll -> (AwaitingMove | TurnComplete) -> AwaitingRoll[next]`.
//!
//! The room owns the phase. Waiting for input is not modelled here: the
//! room loop asks each participant for an [`InputWindow`], waits, then
//! feeds the result back through [`GameRoom::resolve_roll`] and
//! [`GameRoom::resolve_move`].

use std::env;
use std::time::Duration;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::rng::{DIE_MAX, DIE_MIN};
use crate::game::board::Color;
use crate::game::events::GameEventData;
use crate::game::movement::{
    apply_move, auto_select_piece, can_play, check_move, first_movable_piece,
    has_movable_piece, MoveError, MoveOutcome,
};
use crate::game::state::{GameRoom, Participant, ParticipantKind};

// =============================================================================
// PHASES
// =============================================================================

/// Where a room's turn machine stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum TurnPhase {
    /// Waiting for `seat` to roll.
    AwaitingRoll {
        /// Seat to roll.
        seat: Color,
    },
    /// Waiting for `seat` to pick a piece for `dice`.
    AwaitingMove {
        /// Seat to move.
        seat: Color,
        /// Face rolled.
        dice: u8,
    },
    /// `seat` is done; `next` rolls after the pause.
    TurnComplete {
        /// Seat that just played.
        seat: Color,
        /// Seat to play next.
        next: Color,
    },
    /// `winner` brought every piece home.
    Finished {
        /// Winning seat.
        winner: Color,
    },
}

impl TurnPhase {
    /// Seat the phase concerns.
    pub fn seat(self) -> Color {
        match self {
            TurnPhase::AwaitingRoll { seat }
            | TurnPhase::AwaitingMove { seat, .. }
            | TurnPhase::TurnComplete { seat, .. } => seat,
            TurnPhase::Finished { winner } => winner,
        }
    }
}

/// Turn machine misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
    /// A roll arrived outside the roll phase.
    #[error("not waiting for a roll")]
    NotAwaitingRoll,

    /// A move arrived outside the move phase.
    #[error("not waiting for a move")]
    NotAwaitingMove,

    /// The room already has a winner.
    #[error("game is over")]
    GameOver,

    /// Die faces run 1 to 6.
    #[error("die face {0} out of range")]
    InvalidDice(u8),

    /// The chosen move breaks a movement rule.
    #[error(transparent)]
    Illegal(#[from] MoveError),
}

// =============================================================================
// TIMINGS & INPUT WINDOWS
// =============================================================================

/// Turn timing knobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TurnTimings {
    /// How long a real player has to roll.
    pub roll_timeout: Duration,
    /// How long a real player has to pick a piece.
    pub move_timeout: Duration,
    /// Pause before a bot rolls.
    pub bot_delay: Duration,
    /// Pause after each resolved turn.
    pub turn_pause: Duration,
    /// How long a room keeps playing with no real participant connected.
    pub abandon_after: Duration,
}

impl Default for TurnTimings {
    fn default() -> Self {
        Self {
            roll_timeout: Duration::from_millis(5000),
            move_timeout: Duration::from_millis(5000),
            bot_delay: Duration::from_millis(1000),
            turn_pause: Duration::from_millis(2000),
            abandon_after: Duration::from_millis(30_000),
        }
    }
}

impl TurnTimings {
    /// Read `ROLL_TIMEOUT_MS`, `MOVE_TIMEOUT_MS`, `BOT_DELAY_MS`,
    /// `TURN_PAUSE_MS` and `ABANDON_AFTER_MS`, keeping defaults for anything
    /// unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            roll_timeout: millis_var("ROLL_TIMEOUT_MS").unwrap_or(defaults.roll_timeout),
            move_timeout: millis_var("MOVE_TIMEOUT_MS").unwrap_or(defaults.move_timeout),
            bot_delay: millis_var("BOT_DELAY_MS").unwrap_or(defaults.bot_delay),
            turn_pause: millis_var("TURN_PAUSE_MS").unwrap_or(defaults.turn_pause),
            abandon_after: millis_var("ABANDON_AFTER_MS").unwrap_or(defaults.abandon_after),
        }
    }

    /// Zero pause, for tests and simulations.
    pub fn without_pause(mut self) -> Self {
        self.turn_pause = Duration::ZERO;
        self
    }
}

fn millis_var(key: &str) -> Option<Duration> {
    env::var(key).ok()?.trim().parse::<u64>().ok().map(Duration::from_millis)
}

/// How the room loop obtains a participant's input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputWindow {
    /// Open the action slot and wait up to this long.
    Listen(Duration),
    /// Wait this long, then act automatically.
    Delay(Duration),
    /// Act automatically right away.
    Immediate,
}

impl InputWindow {
    /// Does this window accept client actions.
    pub fn listens(self) -> bool {
        matches!(self, InputWindow::Listen(_))
    }

    /// Upper bound on the wait.
    pub fn duration(self) -> Duration {
        match self {
            InputWindow::Listen(d) | InputWindow::Delay(d) => d,
            InputWindow::Immediate => Duration::ZERO,
        }
    }
}

impl Participant {
    /// Window for the roll step.
    pub fn roll_window(&self, timings: &TurnTimings) -> InputWindow {
        match self.kind {
            ParticipantKind::Real(_) => InputWindow::Listen(timings.roll_timeout),
            ParticipantKind::Bot { .. } => InputWindow::Delay(timings.bot_delay),
        }
    }

    /// Window for the move step.
    pub fn move_window(&self, timings: &TurnTimings) -> InputWindow {
        match self.kind {
            ParticipantKind::Real(_) => InputWindow::Listen(timings.move_timeout),
            ParticipantKind::Bot { .. } => InputWindow::Immediate,
        }
    }
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// A six keeps the turn unless it captured.
#[inline]
pub fn keeps_turn(dice: u8, captured: bool) -> bool {
    dice == DIE_MAX && !captured
}

/// What a roll led to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RollOutcome {
    /// The seat must now pick a piece.
    MustMove {
        /// Seat that rolled.
        seat: Color,
        /// Face rolled.
        dice: u8,
    },
    /// Nothing could move; the turn went to `next`.
    Pass {
        /// Seat that rolled.
        seat: Color,
        /// Face rolled.
        dice: u8,
        /// Seat to play next.
        next: Color,
    },
}

/// Which piece to move.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MoveChoice {
    /// A piece named by the player.
    Piece(String),
    /// Let the room pick.
    Auto,
}

/// What a move led to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveResolution {
    /// Seat that moved.
    pub seat: Color,
    /// The applied move, absent when nothing could move.
    pub outcome: Option<MoveOutcome>,
    /// Seat that rolls next (unchanged once the game is won).
    pub next: Color,
    /// Set when this move won the game.
    pub winner: Option<Color>,
}

impl GameRoom {
    /// Enter `AwaitingRoll` for the current seat.
    pub fn begin_turn(&mut self) -> Result<Color, TurnError> {
        if self.is_finished() {
            return Err(TurnError::GameOver);
        }
        let seat = self.turn;
        self.turn_number += 1;
        self.phase = TurnPhase::AwaitingRoll { seat };
        self.push_event(GameEventData::TurnStarted { seat });
        Ok(seat)
    }

    /// Record a roll for the waiting seat.
    ///
    /// Passes the turn when the seat cannot play or no piece can legally
    /// take the roll.
    pub fn resolve_roll(&mut self, dice: u8) -> Result<RollOutcome, TurnError> {
        let seat = match self.phase {
            TurnPhase::AwaitingRoll { seat } => seat,
            TurnPhase::Finished { .. } => return Err(TurnError::GameOver),
            _ => return Err(TurnError::NotAwaitingRoll),
        };
        if !(DIE_MIN..=DIE_MAX).contains(&dice) {
            return Err(TurnError::InvalidDice(dice));
        }

        self.last_dice = Some(dice);
        self.push_event(GameEventData::DiceRolled { seat, value: dice });

        let pieces = &self.participant(seat).pieces;
        if !can_play(pieces, dice) || !has_movable_piece(pieces, dice) {
            let next = seat.next();
            self.turn = next;
            self.phase = TurnPhase::TurnComplete { seat, next };
            self.push_event(GameEventData::TurnPassed { seat, dice, next });
            return Ok(RollOutcome::Pass { seat, dice, next });
        }

        self.phase = TurnPhase::AwaitingMove { seat, dice };
        Ok(RollOutcome::MustMove { seat, dice })
    }

    /// Check a player's piece choice without applying it.
    pub fn check_choice(&self, piece: &str) -> Result<(), TurnError> {
        match self.phase {
            TurnPhase::AwaitingMove { seat, dice } => {
                check_move(&self.participant(seat).pieces, piece, dice)?;
                Ok(())
            }
            TurnPhase::Finished { .. } => Err(TurnError::GameOver),
            _ => Err(TurnError::NotAwaitingMove),
        }
    }

    /// Apply the move for the waiting seat and settle who goes next.
    ///
    /// An explicit choice must be legal. `Auto` takes the furthest piece,
    /// or the first legal one when that would overshoot.
    pub fn resolve_move(&mut self, choice: MoveChoice) -> Result<MoveResolution, TurnError> {
        let (seat, dice) = match self.phase {
            TurnPhase::AwaitingMove { seat, dice } => (seat, dice),
            TurnPhase::Finished { .. } => return Err(TurnError::GameOver),
            _ => return Err(TurnError::NotAwaitingMove),
        };

        let piece = {
            let pieces = &self.participant(seat).pieces;
            match choice {
                MoveChoice::Piece(name) => {
                    check_move(pieces, &name, dice)?;
                    Some(name)
                }
                MoveChoice::Auto => auto_select_piece(pieces)
                    .filter(|name| check_move(pieces, name, dice).is_ok())
                    .or_else(|| first_movable_piece(pieces, dice))
                    .map(str::to_string),
            }
        };

        let Some(piece) = piece else {
            let next = seat.next();
            self.turn = next;
            self.phase = TurnPhase::TurnComplete { seat, next };
            self.push_event(GameEventData::TurnPassed { seat, dice, next });
            return Ok(MoveResolution { seat, outcome: None, next, winner: None });
        };

        let outcome = {
            let (head, tail) = self.participants.split_at_mut(seat.index());
            let Some((mover, after)) = tail.split_first_mut() else {
                return Err(TurnError::NotAwaitingMove);
            };
            apply_move(seat, &mut mover.pieces, &piece, dice, head.iter_mut().chain(after.iter_mut()))?
        };

        self.push_event(GameEventData::PieceMoved {
            seat,
            piece: outcome.piece.clone(),
            from: outcome.from,
            to: outcome.to,
            square: outcome.square,
        });
        for capture in &outcome.captures {
            self.push_event(GameEventData::PieceCaptured {
                by: seat,
                seat: capture.color,
                piece: capture.piece.clone(),
                square: capture.square,
            });
        }

        if self.participant(seat).has_finished() {
            self.phase = TurnPhase::Finished { winner: seat };
            self.push_event(GameEventData::GameWon { seat });
            return Ok(MoveResolution { seat, outcome: Some(outcome), next: seat, winner: Some(seat) });
        }

        let next = if keeps_turn(dice, outcome.captured()) { seat } else { seat.next() };
        self.turn = next;
        self.phase = TurnPhase::TurnComplete { seat, next };
        Ok(MoveResolution { seat, outcome: Some(outcome), next, winner: None })
    }

    /// Has someone won.
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, TurnPhase::Finished { .. })
    }

    /// Winning seat, once there is one.
    pub fn winner(&self) -> Option<Color> {
        match self.phase {
            TurnPhase::Finished { winner } => Some(winner),
            _ => None,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
