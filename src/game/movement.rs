//! Movement & Capture Rules
//!
//! Pure functions over a seat's pieces. Nothing here touches a room or
//! the network, so every rule can be exercised directly.
//!
//! Captures are resolved by grid square, not by route index: two colors
//! meet only where their routes share a square.

use thiserror::Error;

use crate::core::rng::DIE_MAX;
use crate::game::board::{Color, Square, FINISH_LINE};
use crate::game::state::{Participant, Piece};

/// Why a requested move was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveError {
    /// The seat has no piece by that name.
    #[error("no piece named {0}")]
    PieceNotFound(String),

    /// Locked pieces leave base only on a six.
    #[error("{0} is locked and needs a six")]
    Locked(String),

    /// The roll would carry the piece past the finish line.
    #[error("{piece} would overshoot the finish ({target} > 56)")]
    Overshoot {
        /// Piece name.
        piece: String,
        /// Route index the roll would reach.
        target: u16,
    },
}

/// One piece sent home by a move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    /// Owner of the captured piece.
    pub color: Color,
    /// Captured piece name.
    pub piece: String,
    /// Square where it was taken.
    pub square: Square,
}

/// Result of an applied move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    /// Piece that moved.
    pub piece: String,
    /// Position before the move (`None` when unlocking).
    pub from: Option<u8>,
    /// Position after the move.
    pub to: u8,
    /// Square the piece landed on.
    pub square: Square,
    /// Opponent pieces sent home.
    pub captures: Vec<Capture>,
}

impl MoveOutcome {
    /// Did the move capture anything.
    pub fn captured(&self) -> bool {
        !self.captures.is_empty()
    }
}

/// Can the seat do anything with this roll: a six, or a piece on the board.
pub fn can_play(pieces: &[Piece], dice: u8) -> bool {
    dice == DIE_MAX || pieces.iter().any(Piece::is_unlocked)
}

/// Validate a move and return the target position.
pub fn check_move(pieces: &[Piece], name: &str, dice: u8) -> Result<u8, MoveError> {
    let piece = pieces.iter()
        .find(|p| p.name() == name)
        .ok_or_else(|| MoveError::PieceNotFound(name.to_string()))?;

    match piece.position() {
        None if dice == DIE_MAX => Ok(0),
        None => Err(MoveError::Locked(name.to_string())),
        Some(position) => {
            let target = u16::from(position) + u16::from(dice);
            if target > u16::from(FINISH_LINE) {
                return Err(MoveError::Overshoot { piece: name.to_string(), target });
            }
            Ok(target as u8)
        }
    }
}

/// Is the move legal.
pub fn can_move_piece(pieces: &[Piece], name: &str, dice: u8) -> bool {
    check_move(pieces, name, dice).is_ok()
}

/// The furthest piece on the board, or the first piece if none is.
///
/// Not always legal: the furthest piece may overshoot. Callers validate and
/// fall back to [`first_movable_piece`].
pub fn auto_select_piece(pieces: &[Piece]) -> Option<&str> {
    let furthest = pieces.iter()
        .filter(|p| p.is_unlocked())
        // Ties keep the earliest piece
        .fold(None::<&Piece>, |best, p| match best {
            Some(b) if b.position() >= p.position() => Some(b),
            _ => Some(p),
        });

    furthest.or_else(|| pieces.first()).map(Piece::name)
}

/// First piece in name order that can legally move.
pub fn first_movable_piece(pieces: &[Piece], dice: u8) -> Option<&str> {
    pieces.iter()
        .map(Piece::name)
        .find(|name| can_move_piece(pieces, name, dice))
}

/// Does any piece have a legal move.
pub fn has_movable_piece(pieces: &[Piece], dice: u8) -> bool {
    first_movable_piece(pieces, dice).is_some()
}

/// Apply a move for `color` and resolve captures against `opponents`.
///
/// Unlocking puts the piece on its start square, which can capture too.
/// Opponents of the mover's own color are skipped. On error nothing changes.
pub fn apply_move<'a>(
    color: Color,
    pieces: &mut [Piece],
    name: &str,
    dice: u8,
    opponents: impl IntoIterator<Item = &'a mut Participant>,
) -> Result<MoveOutcome, MoveError> {
    let target = check_move(pieces, name, dice)?;

    let square = color.square_at(target)
        .ok_or(MoveError::Overshoot { piece: name.to_string(), target: u16::from(target) })?;

    let piece = pieces.iter_mut()
        .find(|p| p.name() == name)
        .ok_or_else(|| MoveError::PieceNotFound(name.to_string()))?;

    let from = piece.position();
    match from {
        None => piece.unlock(),
        Some(_) => piece.advance(dice),
    }

    let mut captures = Vec::new();
    for opponent in opponents {
        if opponent.color == color {
            continue;
        }
        let owner = opponent.color;
        for victim in opponent.pieces.iter_mut() {
            if victim.square(owner) == Some(square) {
                captures.push(Capture {
                    color: owner,
                    piece: victim.name().to_string(),
                    square,
                });
                victim.send_home();
            }
        }
    }

    Ok(MoveOutcome {
        piece: name.to_string(),
        from,
        to: target,
        square,
        captures,
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{starting_pieces, ParticipantKind, PieceState};
    use proptest::prelude::*;

    fn bot(color: Color) -> Participant {
        Participant::new(color, ParticipantKind::bot(color.index() + 1))
    }

    fn with_piece(color: Color, number: usize, position: u8) -> Participant {
        let mut p = bot(color);
        p.pieces[number - 1] = Piece::unlocked_at(color, number, position);
        p
    }

    #[test]
    fn test_can_play_truth_table() {
        let locked = starting_pieces(Color::Blue);
        let mut one_out = starting_pieces(Color::Blue);
        one_out[2] = Piece::unlocked_at(Color::Blue, 3, 10);

        for dice in 1..=6 {
            assert_eq!(can_play(&locked, dice), dice == 6, "locked, dice {dice}");
            assert!(can_play(&one_out, dice), "unlocked, dice {dice}");
        }
    }

    #[test]
    fn test_check_move_errors() {
        let mut pieces = starting_pieces(Color::Red);
        pieces[0] = Piece::unlocked_at(Color::Red, 1, 53);

        assert_eq!(check_move(&pieces, "red2", 6), Ok(0));
        assert_eq!(check_move(&pieces, "red2", 5), Err(MoveError::Locked("red2".into())));
        assert_eq!(check_move(&pieces, "red1", 3), Ok(FINISH_LINE));
        assert_eq!(
            check_move(&pieces, "red1", 4),
            Err(MoveError::Overshoot { piece: "red1".into(), target: 57 }),
        );
        assert_eq!(check_move(&pieces, "blue1", 6), Err(MoveError::PieceNotFound("blue1".into())));
    }

    #[test]
    fn test_finished_piece_cannot_move() {
        let mut pieces = starting_pieces(Color::Green);
        pieces[1] = Piece::unlocked_at(Color::Green, 2, FINISH_LINE);
        for dice in 1..=6 {
            assert!(!can_move_piece(&pieces, "green2", dice));
        }
    }

    #[test]
    fn test_auto_select() {
        let mut pieces = starting_pieces(Color::Blue);
        assert_eq!(auto_select_piece(&pieces), Some("blue1"));

        pieces[1] = Piece::unlocked_at(Color::Blue, 2, 4);
        pieces[3] = Piece::unlocked_at(Color::Blue, 4, 20);
        assert_eq!(auto_select_piece(&pieces), Some("blue4"));

        pieces[2] = Piece::unlocked_at(Color::Blue, 3, 20);
        assert_eq!(auto_select_piece(&pieces), Some("blue3"));
    }

    #[test]
    fn test_first_movable_skips_overshoot() {
        let mut pieces = starting_pieces(Color::Blue);
        pieces[0] = Piece::unlocked_at(Color::Blue, 1, 54);
        pieces[1] = Piece::unlocked_at(Color::Blue, 2, 12);

        assert_eq!(auto_select_piece(&pieces), Some("blue1"));
        assert!(!can_move_piece(&pieces, "blue1", 5));
        assert_eq!(first_movable_piece(&pieces, 5), Some("blue2"));

        let mut stuck = starting_pieces(Color::Blue);
        stuck[0] = Piece::unlocked_at(Color::Blue, 1, 55);
        assert!(can_play(&stuck, 3));
        assert!(!has_movable_piece(&stuck, 3));
    }

    #[test]
    fn test_unlock_on_six() {
        let mut mover = bot(Color::Blue);
        let outcome = apply_move(Color::Blue, &mut mover.pieces, "blue1", 6, []).unwrap();

        assert_eq!(outcome.from, None);
        assert_eq!(outcome.to, 0);
        assert_eq!(outcome.square, Square::new(6, b'B'));
        assert!(!outcome.captured());
        assert_eq!(mover.pieces[0].state(), PieceState::Unlocked);
        assert_eq!(mover.pieces[0].position(), Some(0));
    }

    #[test]
    fn test_red_captures_blue_on_shared_square() {
        // Blue progress 16 and red progress 3 are the same square
        let mut blue = with_piece(Color::Blue, 1, 16);
        let mut red = with_piece(Color::Red, 1, 0);

        let outcome = apply_move(Color::Red, &mut red.pieces, "red1", 3, [&mut blue]).unwrap();

        assert_eq!(outcome.to, 3);
        assert_eq!(outcome.captures, vec![Capture {
            color: Color::Blue,
            piece: "blue1".into(),
            square: Color::Red.path()[3],
        }]);
        assert_eq!(blue.pieces[0].state(), PieceState::Locked);
        assert_eq!(blue.pieces[0].position(), None);
    }

    #[test]
    fn test_same_index_different_square_is_safe() {
        let mut blue = with_piece(Color::Blue, 1, 3);
        let mut red = with_piece(Color::Red, 1, 0);

        let outcome = apply_move(Color::Red, &mut red.pieces, "red1", 3, [&mut blue]).unwrap();

        assert!(!outcome.captured());
        assert_eq!(blue.pieces[0].position(), Some(3));
    }

    #[test]
    fn test_captures_every_piece_on_square() {
        let mut blue = with_piece(Color::Blue, 1, 16);
        blue.pieces[2] = Piece::unlocked_at(Color::Blue, 3, 16);
        let mut red = with_piece(Color::Red, 1, 0);

        let outcome = apply_move(Color::Red, &mut red.pieces, "red1", 3, [&mut blue]).unwrap();

        assert_eq!(outcome.captures.len(), 2);
        assert!(blue.pieces.iter().all(|p| !p.is_unlocked()));
    }

    #[test]
    fn test_own_color_never_captured() {
        let mut mover = with_piece(Color::Blue, 1, 10);
        mover.pieces[1] = Piece::unlocked_at(Color::Blue, 2, 14);
        let mut shadow = with_piece(Color::Blue, 2, 14);

        let outcome = apply_move(Color::Blue, &mut mover.pieces, "blue1", 4, [&mut shadow]).unwrap();

        assert!(!outcome.captured());
        assert_eq!(shadow.pieces[1].position(), Some(14));
        assert_eq!(mover.pieces[1].position(), Some(14));
    }

    #[test]
    fn test_unlock_captures_on_start_square() {
        // Red's start square is blue progress 13
        let mut blue = with_piece(Color::Blue, 4, 13);
        let mut red = bot(Color::Red);

        let outcome = apply_move(Color::Red, &mut red.pieces, "red2", 6, [&mut blue]).unwrap();

        assert_eq!(outcome.captures.len(), 1);
        assert_eq!(outcome.captures[0].piece, "blue4");
    }

    #[test]
    fn test_illegal_move_changes_nothing() {
        let mut mover = bot(Color::Yellow);
        let before = mover.pieces.clone();

        let err = apply_move(Color::Yellow, &mut mover.pieces, "yellow1", 2, []).unwrap_err();

        assert_eq!(err, MoveError::Locked("yellow1".into()));
        assert_eq!(mover.pieces, before);
    }

    fn arb_pieces(color: Color) -> impl Strategy<Value = [Piece; 4]> {
        proptest::array::uniform4(proptest::option::of(0u8..=FINISH_LINE)).prop_map(move |slots| {
            let mut pieces = starting_pieces(color);
            for (i, slot) in slots.into_iter().enumerate() {
                if let Some(position) = slot {
                    pieces[i] = Piece::unlocked_at(color, i + 1, position);
                }
            }
            pieces
        })
    }

    proptest! {
        #[test]
        fn prop_moves_keep_piece_invariant(
            mover in arb_pieces(Color::Green),
            other in arb_pieces(Color::Yellow),
            index in 0usize..4,
            dice in 1u8..=6,
        ) {
            let mut green = bot(Color::Green);
            green.pieces = mover;
            let mut yellow = bot(Color::Yellow);
            yellow.pieces = other;
            let name = green.pieces[index].name().to_string();

            let legal = can_move_piece(&green.pieces, &name, dice);
            let result = apply_move(Color::Green, &mut green.pieces, &name, dice, [&mut yellow]);
            prop_assert_eq!(result.is_ok(), legal);

            for piece in green.pieces.iter().chain(yellow.pieces.iter()) {
                prop_assert_eq!(piece.position().is_some(), piece.is_unlocked());
                prop_assert!(piece.position().map_or(true, |p| p <= FINISH_LINE));
            }

            if let Ok(outcome) = result {
                for capture in &outcome.captures {
                    prop_assert_eq!(capture.color, Color::Yellow);
                    prop_assert_eq!(capture.square, outcome.square);
                }
            }
        }
    }
}
