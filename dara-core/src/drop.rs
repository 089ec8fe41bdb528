//! Drop phase: players alternately place their pieces on empty cells.

use crate::movement::MovePhase;
use crate::{Board, BoardSize, Player, Pos, RuleError, MAX_RUN, PIECES_PER_PLAYER};

/// Result of a successful drop.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DropOutcome {
    /// Who dropped.
    pub player: Player,
    pub pos: Pos,
    /// True when this was the last drop of the phase.
    pub phase_over: bool,
}

/// Drop phase engine. Owns the board until converted with
/// [`DropPhase::into_move_phase`].
#[derive(Clone, Debug)]
pub struct DropPhase {
    board: Board,
    turn: Player,
    remaining_drops: u8,
}

impl DropPhase {
    /// Start a game on an empty board with Black to drop.
    pub fn new(size: BoardSize) -> DropPhase {
        DropPhase {
            board: Board::new(size),
            turn: Player::Black,
            remaining_drops: 2 * PIECES_PER_PLAYER,
        }
    }

    #[inline]
    pub fn board(&self) -> &Board {
        &self.board
    }

    #[inline]
    pub fn turn(&self) -> Player {
        self.turn
    }

    #[inline]
    pub fn remaining_drops(&self) -> u8 {
        self.remaining_drops
    }

    #[inline]
    pub fn is_over(&self) -> bool {
        self.remaining_drops == 0
    }

    /// Check whether the side to move may drop at `pos`, without mutating.
    pub fn check(&self, pos: Pos) -> Result<(), RuleError> {
        if self.is_over() {
            return Err(RuleError::NoDropsLeft);
        }
        if !self.board.size().contains(pos) {
            return Err(RuleError::OutOfBounds);
        }
        if !self.board.is_empty(pos) {
            return Err(RuleError::CellOccupied);
        }
        if self.board.drop_run(pos, self.turn) > MAX_RUN {
            return Err(RuleError::LineLimitExceeded);
        }
        Ok(())
    }

    /// Non-mutating legality probe, used for hinting.
    #[inline]
    pub fn valid_play(&self, pos: Pos) -> bool {
        self.check(pos).is_ok()
    }

    /// Drop a piece for the side to move and pass the turn.
    pub fn play(&mut self, pos: Pos) -> Result<DropOutcome, RuleError> {
        self.check(pos)?;
        let player = self.turn;
        self.board.place(pos, player);
        self.turn = player.opponent();
        self.remaining_drops -= 1;
        Ok(DropOutcome {
            player,
            pos,
            phase_over: self.is_over(),
        })
    }

    /// All cells the side to move may currently drop on.
    pub fn move_list(&self) -> Vec<Pos> {
        self.board
            .size()
            .positions()
            .filter(|&pos| self.valid_play(pos))
            .collect()
    }

    /// Hand the board over to the move phase. The side to move carries over.
    pub fn into_move_phase(self) -> MovePhase {
        debug_assert!(self.is_over(), "drop phase converted with drops left");
        MovePhase::from_board(self.board, self.turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let drop = DropPhase::new(BoardSize::STANDARD);
        assert_eq!(drop.turn(), Player::Black);
        assert_eq!(drop.remaining_drops(), 24);
        assert_eq!(drop.move_list().len(), 36);
    }

    #[test]
    fn test_play_alternates() {
        let mut drop = DropPhase::new(BoardSize::STANDARD);
        let outcome = drop.play(Pos::new(0, 0)).unwrap();
        assert_eq!(outcome.player, Player::Black);
        assert!(!outcome.phase_over);
        assert_eq!(drop.turn(), Player::White);
        assert_eq!(drop.remaining_drops(), 23);
        assert_eq!(drop.board().get(Pos::new(0, 0)), Some(Player::Black));
    }

    #[test]
    fn test_cell_occupied() {
        let mut drop = DropPhase::new(BoardSize::STANDARD);
        drop.play(Pos::new(2, 2)).unwrap();
        assert_eq!(drop.play(Pos::new(2, 2)), Err(RuleError::CellOccupied));
        assert_eq!(drop.turn(), Player::White);
        assert_eq!(drop.remaining_drops(), 23);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut drop = DropPhase::new(BoardSize::STANDARD);
        assert_eq!(drop.play(Pos::new(6, 0)), Err(RuleError::OutOfBounds));
        assert!(!drop.valid_play(Pos::new(0, 6)));
    }

    #[test]
    fn test_line_limit() {
        let mut drop = DropPhase::new(BoardSize::STANDARD);
        // Black builds (0,0)-(0,2), White drops out of the way.
        for (black, white) in [((0, 0), (5, 0)), ((0, 1), (5, 2)), ((0, 2), (5, 4))] {
            drop.play(Pos::new(black.0, black.1)).unwrap();
            drop.play(Pos::new(white.0, white.1)).unwrap();
        }
        let board_before = drop.board().clone();
        assert!(!drop.valid_play(Pos::new(0, 3)));
        assert_eq!(drop.play(Pos::new(0, 3)), Err(RuleError::LineLimitExceeded));
        assert_eq!(drop.board(), &board_before);
        assert_eq!(drop.turn(), Player::Black);
        assert!(!drop.move_list().contains(&Pos::new(0, 3)));
        // A run of exactly three is fine.
        assert!(drop.valid_play(Pos::new(1, 0)));
    }

    #[test]
    fn test_line_limit_vertical_bridge() {
        let mut drop = DropPhase::new(BoardSize::STANDARD);
        // Black at (0,3), (1,3), (3,3); dropping (2,3) would make four.
        for (black, white) in [((0, 3), (0, 0)), ((1, 3), (2, 0)), ((3, 3), (4, 0))] {
            drop.play(Pos::new(black.0, black.1)).unwrap();
            drop.play(Pos::new(white.0, white.1)).unwrap();
        }
        assert_eq!(drop.play(Pos::new(2, 3)), Err(RuleError::LineLimitExceeded));
        // White may still drop there.
        drop.play(Pos::new(5, 5)).unwrap();
        assert!(drop.valid_play(Pos::new(2, 3)));
    }

    #[test]
    fn test_valid_play_matches_play() {
        use rand::prelude::*;

        let mut rng = rand::rng();
        for _ in 0..50 {
            let mut drop = DropPhase::new(BoardSize::STANDARD);
            while !drop.is_over() {
                let pos = Pos::new(rng.random_range(0..6), rng.random_range(0..6));
                let valid = drop.valid_play(pos);
                assert_eq!(drop.play(pos).is_ok(), valid);
                assert!(drop.board().cache_is_exact());
                if drop.move_list().is_empty() {
                    break;
                }
            }
        }
    }

    #[test]
    fn test_phase_ends_after_24_drops() {
        let mut drop = DropPhase::new(BoardSize::STANDARD);
        let cells: Vec<Pos> = BoardSize::STANDARD.positions().filter(|p| p.row < 4).collect();
        let black = cells.iter().filter(|p| (p.row + p.col) % 2 == 0);
        let white = cells.iter().filter(|p| (p.row + p.col) % 2 == 1);
        let mut drops = 0;
        for (&b, &w) in black.zip(white) {
            for pos in [b, w] {
                let outcome = drop.play(pos).unwrap();
                drops += 1;
                assert_eq!(outcome.phase_over, drops == 24);
            }
        }
        assert_eq!(drops, 24);
        assert!(drop.is_over());
        assert_eq!(drop.play(Pos::new(5, 5)), Err(RuleError::NoDropsLeft));

        let board = drop.board().clone();
        let movement = drop.into_move_phase();
        assert_eq!(movement.board(), &board);
        assert_eq!(movement.turn(), Player::Black);
        assert_eq!(movement.pieces(Player::Black), 12);
        assert_eq!(movement.pieces(Player::White), 12);
    }
}
