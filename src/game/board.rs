//! Board Geometry
//!
//! Each color walks its own 57-square route around the shared 15x15 grid.
//! A piece stores only its progress along that route; the tables here turn
//! progress into a grid square so pieces of different colors can meet.
//!
//! ```text
//!   progress 0        progress 50        progress 56
//!   (start square) -> ... shared ring ... -> home column -> finish
//! ```

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Number of squares on every color's route (progress 0..=56).
pub const PATH_LEN: usize = 57;

/// Progress index of the final square of every route.
pub const FINISH_LINE: u8 = (PATH_LEN - 1) as u8;

// =============================================================================
// COLOR
// =============================================================================

/// Seat color. Turn order follows declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Color {
    /// First seat; always opens the game.
    Blue = 0,
    /// Second seat.
    Red = 1,
    /// Third seat.
    Green = 2,
    /// Fourth seat.
    Yellow = 3,
}

impl Color {
    /// All seats in turn order.
    pub const ALL: [Color; 4] = [Color::Blue, Color::Red, Color::Green, Color::Yellow];

    /// Seat index in turn order (0..4).
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Seat for a queue position. Positions past 3 wrap around.
    pub const fn from_index(index: usize) -> Color {
        Self::ALL[index % Self::ALL.len()]
    }

    /// The seat that plays after this one.
    #[inline]
    pub const fn next(self) -> Color {
        Self::from_index(self.index() + 1)
    }

    /// Lowercase name, also used as the piece-name prefix.
    pub const fn as_str(self) -> &'static str {
        match self {
            Color::Blue => "blue",
            Color::Red => "red",
            Color::Green => "green",
            Color::Yellow => "yellow",
        }
    }

    /// This color's route.
    #[inline]
    pub fn path(self) -> &'static [Square; PATH_LEN] {
        &PATHS[self.index()]
    }

    /// Grid square for a piece of this color at `progress`.
    ///
    /// Returns `None` past the finish line.
    #[inline]
    pub fn square_at(self, progress: u8) -> Option<Square> {
        self.path().get(progress as usize).copied()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// SQUARE
// =============================================================================

/// A grid square: row 0..=14 and column letter `A`..=`O`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Square {
    /// Row number.
    pub row: u8,
    /// Column letter as an ASCII byte.
    pub col: u8,
}

impl Square {
    /// Create a square from row and column letter.
    pub const fn new(row: u8, col: u8) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row, self.col as char)
    }
}

impl Serialize for Square {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

const fn sq(row: u8, col: u8) -> Square {
    Square::new(row, col)
}

// =============================================================================
// ROUTES
// =============================================================================

const BLUE_PATH: [Square; PATH_LEN] = [
    sq(6, b'B'), sq(6, b'C'), sq(6, b'D'), sq(6, b'E'), sq(6, b'F'), sq(5, b'G'),
    sq(4, b'G'), sq(3, b'G'), sq(2, b'G'), sq(1, b'G'), sq(0, b'G'), sq(0, b'H'),
    sq(0, b'I'), sq(1, b'I'), sq(2, b'I'), sq(3, b'I'), sq(4, b'I'), sq(5, b'I'),
    sq(6, b'J'), sq(6, b'K'), sq(6, b'L'), sq(6, b'M'), sq(6, b'N'), sq(6, b'O'),
    sq(7, b'O'), sq(8, b'O'), sq(8, b'N'), sq(8, b'M'), sq(8, b'L'), sq(8, b'K'),
    sq(8, b'J'), sq(9, b'I'), sq(10, b'I'), sq(11, b'I'), sq(12, b'I'), sq(13, b'I'),
    sq(14, b'I'), sq(14, b'H'), sq(14, b'G'), sq(13, b'G'), sq(12, b'G'), sq(11, b'G'),
    sq(10, b'G'), sq(9, b'G'), sq(8, b'F'), sq(8, b'E'), sq(8, b'D'), sq(8, b'C'),
    sq(8, b'B'), sq(8, b'A'), sq(7, b'A'), sq(7, b'B'), sq(7, b'C'), sq(7, b'D'),
    sq(7, b'E'), sq(7, b'F'), sq(7, b'G'),
];

const RED_PATH: [Square; PATH_LEN] = [
    sq(1, b'I'), sq(2, b'I'), sq(3, b'I'), sq(4, b'I'), sq(5, b'I'), sq(6, b'J'),
    sq(6, b'K'), sq(6, b'L'), sq(6, b'M'), sq(6, b'N'), sq(6, b'O'), sq(7, b'O'),
    sq(8, b'O'), sq(8, b'N'), sq(8, b'M'), sq(8, b'L'), sq(8, b'K'), sq(8, b'J'),
    sq(9, b'I'), sq(10, b'I'), sq(11, b'I'), sq(12, b'I'), sq(13, b'I'), sq(14, b'I'),
    sq(14, b'H'), sq(14, b'G'), sq(13, b'G'), sq(12, b'G'), sq(11, b'G'), sq(10, b'G'),
    sq(9, b'G'), sq(8, b'F'), sq(8, b'E'), sq(8, b'D'), sq(8, b'C'), sq(8, b'B'),
    sq(8, b'A'), sq(7, b'A'), sq(6, b'A'), sq(6, b'B'), sq(6, b'C'), sq(6, b'D'),
    sq(6, b'E'), sq(6, b'F'), sq(5, b'G'), sq(4, b'G'), sq(3, b'G'), sq(2, b'G'),
    sq(1, b'G'), sq(0, b'G'), sq(0, b'H'), sq(1, b'H'), sq(2, b'H'), sq(3, b'H'),
    sq(4, b'H'), sq(5, b'H'), sq(6, b'H'),
];

const GREEN_PATH: [Square; PATH_LEN] = [
    sq(8, b'N'), sq(8, b'M'), sq(8, b'L'), sq(8, b'K'), sq(8, b'J'), sq(9, b'I'),
    sq(10, b'I'), sq(11, b'I'), sq(12, b'I'), sq(13, b'I'), sq(14, b'I'), sq(14, b'H'),
    sq(14, b'G'), sq(13, b'G'), sq(12, b'G'), sq(11, b'G'), sq(10, b'G'), sq(9, b'G'),
    sq(8, b'F'), sq(8, b'E'), sq(8, b'D'), sq(8, b'C'), sq(8, b'B'), sq(8, b'A'),
    sq(7, b'A'), sq(6, b'A'), sq(6, b'B'), sq(6, b'C'), sq(6, b'D'), sq(6, b'E'),
    sq(6, b'F'), sq(5, b'G'), sq(4, b'G'), sq(3, b'G'), sq(2, b'G'), sq(1, b'G'),
    sq(0, b'G'), sq(0, b'H'), sq(0, b'I'), sq(1, b'I'), sq(2, b'I'), sq(3, b'I'),
    sq(4, b'I'), sq(5, b'I'), sq(6, b'J'), sq(6, b'K'), sq(6, b'L'), sq(6, b'M'),
    sq(6, b'N'), sq(6, b'O'), sq(7, b'O'), sq(7, b'N'), sq(7, b'M'), sq(7, b'L'),
    sq(7, b'K'), sq(7, b'J'), sq(7, b'I'),
];

const YELLOW_PATH: [Square; PATH_LEN] = [
    sq(13, b'G'), sq(12, b'G'), sq(11, b'G'), sq(10, b'G'), sq(9, b'G'), sq(8, b'F'),
    sq(8, b'E'), sq(8, b'D'), sq(8, b'C'), sq(8, b'B'), sq(8, b'A'), sq(7, b'A'),
    sq(6, b'A'), sq(6, b'B'), sq(6, b'C'), sq(6, b'D'), sq(6, b'E'), sq(6, b'F'),
    sq(5, b'G'), sq(4, b'G'), sq(3, b'G'), sq(2, b'G'), sq(1, b'G'), sq(0, b'G'),
    sq(0, b'H'), sq(0, b'I'), sq(1, b'I'), sq(2, b'I'), sq(3, b'I'), sq(4, b'I'),
    sq(5, b'I'), sq(6, b'J'), sq(6, b'K'), sq(6, b'L'), sq(6, b'M'), sq(6, b'N'),
    sq(6, b'O'), sq(7, b'O'), sq(8, b'O'), sq(8, b'N'), sq(8, b'M'), sq(8, b'L'),
    sq(8, b'K'), sq(8, b'J'), sq(9, b'I'), sq(10, b'I'), sq(11, b'I'), sq(12, b'I'),
    sq(13, b'I'), sq(14, b'I'), sq(14, b'H'), sq(13, b'H'), sq(12, b'H'), sq(11, b'H'),
    sq(10, b'H'), sq(9, b'H'), sq(8, b'H'),
];

/// Routes indexed by [`Color::index`].
static PATHS: [[Square; PATH_LEN]; 4] = [BLUE_PATH, RED_PATH, GREEN_PATH, YELLOW_PATH];
