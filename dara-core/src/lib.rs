//! Dara game logic with cached run-length board representation.
//!
//! # Rules
//!
//! ```text
//! Drop phase: players alternately place pieces (12 each, Black first)
//!             on empty cells. No run longer than 3 may be formed.
//! Move phase: players alternately slide one of their pieces to an
//!             orthogonally adjacent empty cell. Moving back along your own
//!             previous move is forbidden. A move that forms a run of exactly
//!             3 captures one enemy piece. Runs longer than 3 stay illegal.
//! End:        a side left with fewer than 3 pieces loses.
//! ```
//!
//! # Run cache
//!
//! ```text
//! Every occupied cell caches, per direction, how many pieces of its own
//! colour follow it contiguously in that direction:
//!
//!   . B B B .      runs of the middle B: Left=1 Right=1 Up=0 Down=0
//!
//! A placement or move only needs the four neighbours' caches to know the
//! length of the runs it would create.
//! ```

pub mod board;
pub mod drop;
pub mod game;
pub mod movement;

#[cfg(feature = "wasm")]
pub mod wasm;

pub use board::Board;
pub use drop::{DropOutcome, DropPhase};
pub use game::{Game, Notified, Phase, Step};
pub use movement::{CaptureOutcome, MoveOutcome, MovePhase, Slide};

use serde::{Deserialize, Serialize};

/// Pieces each player drops during the first phase.
pub const PIECES_PER_PLAYER: u8 = 12;

/// Longest legal run. A run of exactly this length formed by a move captures.
pub const MAX_RUN: u8 = 3;

/// A side with fewer pieces than this can no longer form a line and loses.
pub const MIN_PIECES: u8 = 3;

/// Player identifier. Also the colour of a piece.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Player {
    Black,
    White,
}

impl Player {
    /// Get the opponent player.
    #[inline]
    pub fn opponent(self) -> Player {
        match self {
            Player::Black => Player::White,
            Player::White => Player::Black,
        }
    }

    /// Index into per-player arrays (Black = 0, White = 1).
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Player::Black => 0,
            Player::White => 1,
        }
    }
}

/// Position on the board, row-major from the top-left corner.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub struct Pos {
    pub row: usize,
    #[serde(rename = "column")]
    pub col: usize,
}

impl Pos {
    #[inline]
    pub const fn new(row: usize, col: usize) -> Pos {
        Pos { row, col }
    }

    /// Neighbour in the given direction, or None when stepping off row/column 0.
    /// The far edges are checked by the board.
    #[inline]
    pub fn step(self, dir: Direction) -> Option<Pos> {
        let (dr, dc) = dir.delta();
        let row = self.row.checked_add_signed(dr)?;
        let col = self.col.checked_add_signed(dc)?;
        Some(Pos { row, col })
    }

    /// Direction from `self` to `to` if the two are orthogonal neighbours.
    pub fn direction_to(self, to: Pos) -> Option<Direction> {
        Direction::ALL.into_iter().find(|&d| self.step(d) == Some(to))
    }
}

impl std::fmt::Display for Pos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.row, self.col)
    }
}

/// Board dimensions.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub struct BoardSize {
    pub rows: usize,
    pub columns: usize,
}

impl BoardSize {
    /// The standard 6x6 board.
    pub const STANDARD: BoardSize = BoardSize { rows: 6, columns: 6 };

    /// Smallest and largest side length the server accepts.
    pub const MIN_SIDE: usize = 5;
    pub const MAX_SIDE: usize = 7;

    #[inline]
    pub const fn new(rows: usize, columns: usize) -> BoardSize {
        BoardSize { rows, columns }
    }

    /// Whether a game can be played on a board of this size.
    pub fn is_supported(self) -> bool {
        (Self::MIN_SIDE..=Self::MAX_SIDE).contains(&self.rows)
            && (Self::MIN_SIDE..=Self::MAX_SIDE).contains(&self.columns)
    }

    /// A supported size, or None.
    pub fn checked(rows: usize, columns: usize) -> Option<BoardSize> {
        let size = BoardSize::new(rows, columns);
        size.is_supported().then_some(size)
    }

    #[inline]
    pub fn cells(self) -> usize {
        self.rows * self.columns
    }

    #[inline]
    pub fn contains(self, pos: Pos) -> bool {
        pos.row < self.rows && pos.col < self.columns
    }

    /// Iterate over all positions, row-major.
    pub fn positions(self) -> impl Iterator<Item = Pos> {
        let columns = self.columns;
        (0..self.cells()).map(move |i| Pos::new(i / columns, i % columns))
    }
}

impl std::fmt::Display for BoardSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.rows, self.columns)
    }
}

/// Orthogonal direction.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// (row, column) offset.
    #[inline]
    pub const fn delta(self) -> (isize, isize) {
        match self {
            Direction::Up => (-1, 0),
            Direction::Down => (1, 0),
            Direction::Left => (0, -1),
            Direction::Right => (0, 1),
        }
    }

    #[inline]
    pub const fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    /// The direction at right angles, used to pick the other axis.
    #[inline]
    pub const fn perpendicular(self) -> Direction {
        match self {
            Direction::Up | Direction::Down => Direction::Left,
            Direction::Left | Direction::Right => Direction::Up,
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// A rejected play. The board is never modified when one of these is returned.
#[derive(Clone, Copy, PartialEq, Eq, Debug, thiserror::Error)]
pub enum RuleError {
    #[error("position is outside the board")]
    OutOfBounds,
    #[error("cell is not empty")]
    CellOccupied,
    #[error("no drops left")]
    NoDropsLeft,
    #[error("more than 3 pieces in a row")]
    LineLimitExceeded,
    #[error("not your piece")]
    NotOwned,
    #[error("destination is not empty")]
    DestinationOccupied,
    #[error("can only move to an adjacent cell")]
    NotAdjacent,
    #[error("cannot undo your previous move")]
    ImmediateReversal,
    #[error("cell is empty")]
    EmptyCell,
    #[error("not an enemy piece")]
    NotEnemyPiece,
    #[error("must capture an enemy piece first")]
    CapturePending,
    #[error("no capture to make")]
    NoCapturePending,
    #[error("game is over")]
    GameOver,
}
