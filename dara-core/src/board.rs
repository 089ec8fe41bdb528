//! Grid of cells with cached per-direction run lengths.
//!
//! `runs[i][d]` is the number of pieces of the same colour as cell `i` that
//! follow it contiguously in direction `d`. It is kept exact for every
//! occupied cell after every `place`/`remove`; empty cells hold zeros.

use crate::{BoardSize, Direction, Player, Pos};

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Board {
    size: BoardSize,
    cells: Vec<Option<Player>>,
    runs: Vec<[u8; 4]>,
}

impl Board {
    /// Create an empty board.
    pub fn new(size: BoardSize) -> Board {
        Board {
            size,
            cells: vec![None; size.cells()],
            runs: vec![[0; 4]; size.cells()],
        }
    }

    /// Build a board from text rows: `B` black, `W` white, `.` empty.
    /// Returns None on ragged rows or unknown characters.
    pub fn parse(rows: &[&str]) -> Option<Board> {
        let columns = rows.first()?.chars().count();
        if columns == 0 {
            return None;
        }
        let mut board = Board::new(BoardSize::new(rows.len(), columns));
        for (row, line) in rows.iter().enumerate() {
            if line.chars().count() != columns {
                return None;
            }
            for (col, ch) in line.chars().enumerate() {
                let piece = match ch {
                    'B' => Player::Black,
                    'W' => Player::White,
                    '.' => continue,
                    _ => return None,
                };
                board.place(Pos::new(row, col), piece);
            }
        }
        Some(board)
    }

    #[inline]
    pub fn size(&self) -> BoardSize {
        self.size
    }

    /// Cell index, None off the board.
    #[inline]
    fn index(&self, pos: Pos) -> Option<usize> {
        self.size
            .contains(pos)
            .then(|| pos.row * self.size.columns + pos.col)
    }

    /// Neighbour of `pos` in `dir`, if it is on the board.
    #[inline]
    pub fn neighbor(&self, pos: Pos, dir: Direction) -> Option<Pos> {
        pos.step(dir).filter(|&p| self.size.contains(p))
    }

    #[inline]
    fn neighbor_index(&self, pos: Pos, dir: Direction) -> Option<(Pos, usize)> {
        let next = self.neighbor(pos, dir)?;
        Some((next, self.index(next)?))
    }

    /// Piece at a position. Off-board positions read as empty.
    #[inline]
    pub fn get(&self, pos: Pos) -> Option<Player> {
        self.index(pos).and_then(|i| self.cells[i])
    }

    /// Check if a cell is empty.
    #[inline]
    pub fn is_empty(&self, pos: Pos) -> bool {
        self.get(pos).is_none()
    }

    /// Overwrite a cell, keeping the run cache exact.
    pub fn set(&mut self, pos: Pos, piece: Option<Player>) {
        self.remove(pos);
        if let Some(piece) = piece {
            self.place(pos, piece);
        }
    }

    /// Count pieces of `piece` colour contiguous to `pos` in `dir`,
    /// starting from the adjacent cell. O(1) via the neighbour's cache.
    #[inline]
    pub fn count(&self, pos: Pos, dir: Direction, piece: Player) -> u8 {
        match self.neighbor(pos, dir) {
            Some(n) if self.get(n) == Some(piece) => 1 + self.cached_run(n, dir),
            _ => 0,
        }
    }

    #[inline]
    pub fn count_up(&self, pos: Pos, piece: Player) -> u8 {
        self.count(pos, Direction::Up, piece)
    }

    #[inline]
    pub fn count_down(&self, pos: Pos, piece: Player) -> u8 {
        self.count(pos, Direction::Down, piece)
    }

    #[inline]
    pub fn count_left(&self, pos: Pos, piece: Player) -> u8 {
        self.count(pos, Direction::Left, piece)
    }

    #[inline]
    pub fn count_right(&self, pos: Pos, piece: Player) -> u8 {
        self.count(pos, Direction::Right, piece)
    }

    /// Cached run of the piece at `pos` in `dir` (0 for an empty or
    /// off-board cell).
    #[inline]
    pub fn cached_run(&self, pos: Pos, dir: Direction) -> u8 {
        self.index(pos).map_or(0, |i| self.runs[i][dir.index()])
    }

    /// Direct walk, ignoring the cache.
    pub fn recount(&self, pos: Pos, dir: Direction) -> u8 {
        let Some(piece) = self.get(pos) else {
            return 0;
        };
        let mut n = 0;
        let mut cur = pos;
        while let Some(next) = self.neighbor(cur, dir) {
            if self.get(next) != Some(piece) {
                break;
            }
            n += 1;
            cur = next;
        }
        n
    }

    /// Longest run (either axis) that dropping `piece` on empty `pos` creates.
    pub fn drop_run(&self, pos: Pos, piece: Player) -> u8 {
        let vertical = 1 + self.count_up(pos, piece) + self.count_down(pos, piece);
        let horizontal = 1 + self.count_left(pos, piece) + self.count_right(pos, piece);
        vertical.max(horizontal)
    }

    // ========== Mutation ==========

    /// Put a piece on an empty cell. Does NOT validate run limits.
    /// Off-board positions are ignored.
    pub fn place(&mut self, pos: Pos, piece: Player) {
        debug_assert!(self.is_empty(pos), "place on occupied cell {}", pos);
        let Some(idx) = self.index(pos) else {
            return;
        };
        let mut own = [0u8; 4];
        for dir in Direction::ALL {
            own[dir.index()] = self.count(pos, dir, piece);
        }
        self.cells[idx] = Some(piece);
        self.runs[idx] = own;

        // The cell k steps away in `dir` now sees k-1 pieces, the new one,
        // and everything behind the new one.
        for dir in Direction::ALL {
            let back = dir.opposite().index();
            let mut cur = pos;
            for k in 1..=own[dir.index()] {
                let Some((next, i)) = self.neighbor_index(cur, dir) else {
                    break;
                };
                self.runs[i][back] = k + own[back];
                cur = next;
            }
        }
    }

    /// Take the piece off a cell, returning it.
    ///
    /// The run through `pos` is split: each cell k steps away now only sees
    /// the k-1 pieces between it and the vacated cell.
    pub fn remove(&mut self, pos: Pos) -> Option<Player> {
        let idx = self.index(pos)?;
        let piece = self.cells[idx]?;
        let own = self.runs[idx];

        for dir in Direction::ALL {
            let back = dir.opposite().index();
            let mut cur = pos;
            for k in 1..=own[dir.index()] {
                let Some((next, i)) = self.neighbor_index(cur, dir) else {
                    break;
                };
                self.runs[i][back] = k - 1;
                cur = next;
            }
        }

        self.cells[idx] = None;
        self.runs[idx] = [0; 4];
        Some(piece)
    }

    /// Move a piece between cells. Does NOT validate.
    pub fn move_piece(&mut self, from: Pos, to: Pos) {
        if let Some(piece) = self.remove(from) {
            self.place(to, piece);
        }
    }

    // ========== Move Probing ==========

    /// Probe sliding the piece at `pos` one step in `dir`.
    ///
    /// Returns None if there is no piece, the step leaves the board or the
    /// destination is occupied. Otherwise returns the longest run the moved
    /// piece would be part of, so callers can tell "legal" (< 3),
    /// "captures" (== 3) and "too long" (> 3) apart.
    pub fn can_move(&self, pos: Pos, dir: Direction) -> Option<u8> {
        let piece = self.get(pos)?;
        let to = self.neighbor(pos, dir)?;
        if !self.is_empty(to) {
            return None;
        }
        // Behind `to` lies the vacated origin, so the moving axis only
        // extends forward.
        let along = 1 + self.count(to, dir, piece);
        let side = dir.perpendicular();
        let across = 1 + self.count(to, side, piece) + self.count(to, side.opposite(), piece);
        Some(along.max(across))
    }

    #[inline]
    pub fn can_move_up(&self, pos: Pos) -> Option<u8> {
        self.can_move(pos, Direction::Up)
    }

    #[inline]
    pub fn can_move_down(&self, pos: Pos) -> Option<u8> {
        self.can_move(pos, Direction::Down)
    }

    #[inline]
    pub fn can_move_left(&self, pos: Pos) -> Option<u8> {
        self.can_move(pos, Direction::Left)
    }

    #[inline]
    pub fn can_move_right(&self, pos: Pos) -> Option<u8> {
        self.can_move(pos, Direction::Right)
    }

    // ========== Queries ==========

    /// Number of pieces of a colour on the board.
    pub fn pieces(&self, player: Player) -> usize {
        self.cells.iter().filter(|&&c| c == Some(player)).count()
    }

    /// Cells as rows, top to bottom.
    pub fn rows(&self) -> Vec<Vec<Option<Player>>> {
        self.cells
            .chunks(self.size.columns)
            .map(|row| row.to_vec())
            .collect()
    }

    /// Check the cache against a direct recount of every occupied cell.
    pub fn cache_is_exact(&self) -> bool {
        self.size.positions().all(|pos| {
            Direction::ALL
                .into_iter()
                .all(|dir| self.cached_run(pos, dir) == self.recount(pos, dir))
        })
    }
}

impl std::fmt::Display for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for row in self.cells.chunks(self.size.columns) {
            for cell in row {
                let ch = match cell {
                    None => '.',
                    Some(Player::Black) => 'B',
                    Some(Player::White) => 'W',
                };
                write!(f, "{}", ch)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
