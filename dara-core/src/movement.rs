//! Move phase: players slide pieces to adjacent empty cells and capture by
//! forming runs of exactly three.
//!
//! A turn is `play(from, to)`, followed by `remove(pos)` when the move formed
//! a line. The turn passes only after the capture is resolved.

use crate::{Board, Direction, Player, Pos, RuleError, MAX_RUN, MIN_PIECES};

/// A legal slide for the side to move.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Slide {
    pub from: Pos,
    pub to: Pos,
    pub dir: Direction,
    /// Whether the slide forms a line and earns a capture.
    pub captures: bool,
}

/// Result of a successful `play`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MoveOutcome {
    pub player: Player,
    pub from: Pos,
    pub to: Pos,
    /// True when a line was formed: the same player must now `remove`.
    pub capture: bool,
}

/// Result of a successful `remove`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CaptureOutcome {
    pub player: Player,
    pub pos: Pos,
    /// Set when the capture left the enemy below the minimum piece count.
    pub winner: Option<Player>,
}

/// Move phase engine, built from a finished drop phase.
#[derive(Clone, Debug)]
pub struct MovePhase {
    board: Board,
    turn: Player,
    /// Each player's own previous move, as (from, to).
    last_move: [Option<(Pos, Pos)>; 2],
    pieces: [u8; 2],
    pending_capture: bool,
    winner: Option<Player>,
}

impl MovePhase {
    /// Take over a board. Piece counts are read from it.
    pub fn from_board(board: Board, turn: Player) -> MovePhase {
        let pieces = [
            board.pieces(Player::Black) as u8,
            board.pieces(Player::White) as u8,
        ];
        MovePhase {
            board,
            turn,
            last_move: [None; 2],
            pieces,
            pending_capture: false,
            winner: None,
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

    /// Pieces a player has left.
    #[inline]
    pub fn pieces(&self, player: Player) -> u8 {
        self.pieces[player.index()]
    }

    #[inline]
    pub fn pending_capture(&self) -> bool {
        self.pending_capture
    }

    #[inline]
    pub fn last_move(&self, player: Player) -> Option<(Pos, Pos)> {
        self.last_move[player.index()]
    }

    #[inline]
    pub fn winner(&self) -> Option<Player> {
        self.winner
    }

    /// Validate a slide for the side to move and return the run it forms.
    pub fn check(&self, from: Pos, to: Pos) -> Result<u8, RuleError> {
        if self.winner.is_some() {
            return Err(RuleError::GameOver);
        }
        if self.pending_capture {
            return Err(RuleError::CapturePending);
        }
        let size = self.board.size();
        if !size.contains(from) || !size.contains(to) {
            return Err(RuleError::OutOfBounds);
        }
        if self.board.get(from) != Some(self.turn) {
            return Err(RuleError::NotOwned);
        }
        if !self.board.is_empty(to) {
            return Err(RuleError::DestinationOccupied);
        }
        let dir = from.direction_to(to).ok_or(RuleError::NotAdjacent)?;
        if self.last_move[self.turn.index()] == Some((to, from)) {
            return Err(RuleError::ImmediateReversal);
        }
        let run = self
            .board
            .can_move(from, dir)
            .ok_or(RuleError::DestinationOccupied)?;
        if run > MAX_RUN {
            return Err(RuleError::LineLimitExceeded);
        }
        Ok(run)
    }

    /// Non-mutating legality probe.
    #[inline]
    pub fn valid_play(&self, from: Pos, to: Pos) -> bool {
        self.check(from, to).is_ok()
    }

    /// Slide a piece of the side to move.
    ///
    /// When the slide forms a run of exactly three the turn does not pass:
    /// the caller must follow with [`MovePhase::remove`].
    pub fn play(&mut self, from: Pos, to: Pos) -> Result<MoveOutcome, RuleError> {
        let run = self.check(from, to)?;
        let player = self.turn;
        self.board.move_piece(from, to);
        self.last_move[player.index()] = Some((from, to));

        let capture = run == MAX_RUN;
        if capture {
            self.pending_capture = true;
        } else {
            self.turn = player.opponent();
        }
        Ok(MoveOutcome {
            player,
            from,
            to,
            capture,
        })
    }

    /// Resolve a pending capture by removing an enemy piece, then pass the turn.
    pub fn remove(&mut self, pos: Pos) -> Result<CaptureOutcome, RuleError> {
        if self.winner.is_some() {
            return Err(RuleError::GameOver);
        }
        if !self.pending_capture {
            return Err(RuleError::NoCapturePending);
        }
        if !self.board.size().contains(pos) {
            return Err(RuleError::OutOfBounds);
        }
        let player = self.turn;
        let enemy = player.opponent();
        match self.board.get(pos) {
            None => return Err(RuleError::EmptyCell),
            Some(p) if p != enemy => return Err(RuleError::NotEnemyPiece),
            Some(_) => {}
        }

        self.board.remove(pos);
        self.pieces[enemy.index()] -= 1;
        self.pending_capture = false;
        self.turn = enemy;
        if self.pieces[enemy.index()] < MIN_PIECES {
            self.winner = Some(player);
        }
        Ok(CaptureOutcome {
            player,
            pos,
            winner: self.winner,
        })
    }

    /// Declare `loser` beaten (clock ran out, left the game, no legal move).
    pub fn resign(&mut self, loser: Player) {
        if self.winner.is_none() {
            self.winner = Some(loser.opponent());
        }
    }

    /// All legal slides for the side to move. Empty while a capture is owed.
    pub fn move_list(&self) -> Vec<Slide> {
        if self.pending_capture || self.winner.is_some() {
            return Vec::new();
        }
        let mut moves = Vec::with_capacity(32);
        let last = self.last_move[self.turn.index()];
        for from in self.board.size().positions() {
            if self.board.get(from) != Some(self.turn) {
                continue;
            }
            for dir in Direction::ALL {
                let Some(run) = self.board.can_move(from, dir) else {
                    continue;
                };
                if run > MAX_RUN {
                    continue;
                }
                let Some(to) = self.board.neighbor(from, dir) else {
                    continue;
                };
                if last == Some((to, from)) {
                    continue;
                }
                moves.push(Slide {
                    from,
                    to,
                    dir,
                    captures: run == MAX_RUN,
                });
            }
        }
        moves
    }

    /// Enemy pieces that may be taken while a capture is owed.
    pub fn capture_list(&self) -> Vec<Pos> {
        if !self.pending_capture {
            return Vec::new();
        }
        let enemy = self.turn.opponent();
        self.board
            .size()
            .positions()
            .filter(|&pos| self.board.get(pos) == Some(enemy))
            .collect()
    }

    /// Whether the side to move can do anything at all.
    pub fn has_legal_action(&self) -> bool {
        if self.winner.is_some() {
            return false;
        }
        if self.pending_capture {
            return !self.capture_list().is_empty();
        }
        !self.move_list().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(row: usize, col: usize) -> Pos {
        Pos::new(row, col)
    }

    fn phase(rows: &[&str], turn: Player) -> MovePhase {
        MovePhase::from_board(Board::parse(rows).unwrap(), turn)
    }

    #[test]
    fn test_simple_slide_passes_turn() {
        let mut game = phase(&["B.....", "......", ".....W"], Player::Black);
        let outcome = game.play(p(0, 0), p(0, 1)).unwrap();
        assert!(!outcome.capture);
        assert_eq!(game.turn(), Player::White);
        assert_eq!(game.board().get(p(0, 1)), Some(Player::Black));
        assert_eq!(game.last_move(Player::Black), Some((p(0, 0), p(0, 1))));
    }

    #[test]
    fn test_not_owned() {
        let mut game = phase(&["B....W"], Player::Black);
        assert_eq!(game.play(p(0, 5), p(0, 4)), Err(RuleError::NotOwned));
        assert_eq!(game.play(p(0, 2), p(0, 3)), Err(RuleError::NotOwned));
    }

    #[test]
    fn test_destination_occupied() {
        let mut game = phase(&["BW...."], Player::Black);
        assert_eq!(game.play(p(0, 0), p(0, 1)), Err(RuleError::DestinationOccupied));
    }

    #[test]
    fn test_not_adjacent() {
        let mut game = phase(&["B.....", "......"], Player::Black);
        assert_eq!(game.play(p(0, 0), p(0, 2)), Err(RuleError::NotAdjacent));
        assert_eq!(game.play(p(0, 0), p(1, 1)), Err(RuleError::NotAdjacent));
    }

    #[test]
    fn test_out_of_bounds() {
        let mut game = phase(&["B....."], Player::Black);
        assert_eq!(game.play(p(0, 0), p(1, 0)), Err(RuleError::OutOfBounds));
    }

    #[test]
    fn test_immediate_reversal() {
        let mut game = phase(&["B....W", "......"], Player::Black);
        game.play(p(0, 0), p(0, 1)).unwrap();
        game.play(p(0, 5), p(1, 5)).unwrap();
        assert_eq!(game.play(p(0, 1), p(0, 0)), Err(RuleError::ImmediateReversal));
        assert!(!game.move_list().iter().any(|s| s.from == p(0, 1) && s.to == p(0, 0)));

        // Once Black has moved in between, the first square may be revisited.
        game.play(p(0, 1), p(1, 1)).unwrap();
        game.play(p(1, 5), p(1, 4)).unwrap();
        game.play(p(1, 1), p(1, 0)).unwrap();
        game.play(p(1, 4), p(1, 3)).unwrap();
        assert!(game.play(p(1, 0), p(0, 0)).is_ok());
    }

    #[test]
    fn test_reversal_is_per_player() {
        let mut game = phase(&["B.W..."], Player::Black);
        game.play(p(0, 0), p(0, 1)).unwrap();
        // White moving into Black's vacated path is not a reversal.
        assert!(game.valid_play(p(0, 2), p(0, 3)));
    }

    #[test]
    fn test_line_limit() {
        let mut game = phase(&["BB.BB.", "..B..."], Player::Black);
        let before = game.board().clone();
        assert_eq!(game.play(p(1, 2), p(0, 2)), Err(RuleError::LineLimitExceeded));
        assert_eq!(game.board(), &before);
        assert_eq!(game.turn(), Player::Black);
    }

    #[test]
    fn test_capture_blocks_turn() {
        let mut game = phase(&["BB....", "..B...", "WWW.W."], Player::Black);
        let outcome = game.play(p(1, 2), p(0, 2)).unwrap();
        assert!(outcome.capture);
        assert!(game.pending_capture());
        assert_eq!(game.turn(), Player::Black);

        // No new slide until the capture is resolved.
        assert_eq!(game.play(p(0, 0), p(1, 0)), Err(RuleError::CapturePending));
        assert!(game.move_list().is_empty());
        assert_eq!(game.capture_list().len(), 4);

        assert_eq!(game.remove(p(1, 0)), Err(RuleError::EmptyCell));
        assert_eq!(game.remove(p(0, 0)), Err(RuleError::NotEnemyPiece));

        let capture = game.remove(p(2, 4)).unwrap();
        assert_eq!(capture.winner, None);
        assert_eq!(game.pieces(Player::White), 3);
        assert_eq!(game.turn(), Player::White);
        assert!(!game.pending_capture());
    }

    #[test]
    fn test_remove_without_capture() {
        let mut game = phase(&["B....W"], Player::Black);
        assert_eq!(game.remove(p(0, 5)), Err(RuleError::NoCapturePending));
    }

    #[test]
    fn test_win_below_three_pieces() {
        let mut game = phase(&["BB....", "..B...", "WWW..."], Player::Black);
        game.play(p(1, 2), p(0, 2)).unwrap();
        let capture = game.remove(p(2, 0)).unwrap();
        assert_eq!(capture.winner, Some(Player::Black));
        assert_eq!(game.winner(), Some(Player::Black));
        assert_eq!(game.pieces(Player::White), 2);
        assert_eq!(game.play(p(2, 1), p(1, 1)), Err(RuleError::GameOver));
        assert!(!game.has_legal_action());
    }

    #[test]
    fn test_move_list_tags_captures() {
        let game = phase(&["BB....", "..B...", "....WW"], Player::Black);
        let moves = game.move_list();
        let capturing: Vec<_> = moves.iter().filter(|s| s.captures).collect();
        assert_eq!(capturing.len(), 1);
        assert_eq!(capturing[0].from, p(1, 2));
        assert_eq!(capturing[0].to, p(0, 2));
        assert_eq!(capturing[0].dir, Direction::Up);
    }

    #[test]
    fn test_move_list_matches_play() {
        use rand::prelude::*;

        let mut rng = rand::rng();
        let size = crate::BoardSize::STANDARD;
        for _ in 0..100 {
            let mut board = Board::new(size);
            for pos in size.positions() {
                if rng.random_bool(0.5) {
                    let piece = if rng.random_bool(0.5) { Player::Black } else { Player::White };
                    board.place(pos, piece);
                }
            }
            let game = MovePhase::from_board(board, Player::Black);
            let moves = game.move_list();
            for from in size.positions() {
                for dir in Direction::ALL {
                    let Some(to) = from.step(dir) else {
                        continue;
                    };
                    let listed = moves.iter().find(|s| s.from == from && s.to == to);
                    let mut probe = game.clone();
                    match probe.play(from, to) {
                        Ok(outcome) => {
                            let slide = listed.expect("legal move missing from list");
                            assert_eq!(slide.captures, outcome.capture);
                        }
                        Err(_) => assert!(listed.is_none()),
                    }
                    assert!(probe.board().cache_is_exact());
                }
            }
        }
    }

    #[test]
    fn test_resign() {
        let mut game = phase(&["B....W"], Player::Black);
        game.resign(Player::Black);
        assert_eq!(game.winner(), Some(Player::White));
        game.resign(Player::White);
        assert_eq!(game.winner(), Some(Player::White));
    }
}
