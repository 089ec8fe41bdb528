//! A whole game: drop phase, then move phase, driven one clicked cell at a
//! time.
//!
//! Remote clients send single cells. In the move phase a turn takes two or
//! three of them (origin, destination, and the captured piece when a line was
//! formed), so `Game` tracks which of those it expects next.

use serde::{Deserialize, Serialize};

use crate::{
    Board, BoardSize, CaptureOutcome, DropOutcome, DropPhase, MoveOutcome, MovePhase, Player, Pos,
    RuleError,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Drop,
    Move,
}

/// The kind of cell the side to move is expected to send next.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    /// An empty cell to drop on.
    Drop,
    /// One of the mover's pieces.
    From,
    /// An empty cell next to the selected piece.
    To,
    /// An enemy piece to capture.
    Take,
}

/// What a successful `notify` did.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Notified {
    Dropped(DropOutcome),
    Selected(Pos),
    Moved(MoveOutcome),
    Captured(CaptureOutcome),
}

#[derive(Clone, Debug)]
enum Engine {
    Drop(DropPhase),
    Move(MovePhase),
}

#[derive(Clone, Debug)]
pub struct Game {
    engine: Engine,
    step: Step,
    selected: Option<Pos>,
    winner: Option<Player>,
}

impl Game {
    pub fn new(size: BoardSize) -> Game {
        Game {
            engine: Engine::Drop(DropPhase::new(size)),
            step: Step::Drop,
            selected: None,
            winner: None,
        }
    }

    /// Resume in the move phase from an existing board.
    pub fn from_move_phase(movement: MovePhase) -> Game {
        let mut game = Game {
            engine: Engine::Move(movement),
            step: Step::From,
            selected: None,
            winner: None,
        };
        game.settle();
        game
    }

    pub fn board(&self) -> &Board {
        match &self.engine {
            Engine::Drop(drop) => drop.board(),
            Engine::Move(movement) => movement.board(),
        }
    }

    pub fn size(&self) -> BoardSize {
        self.board().size()
    }

    pub fn phase(&self) -> Phase {
        match self.engine {
            Engine::Drop(_) => Phase::Drop,
            Engine::Move(_) => Phase::Move,
        }
    }

    #[inline]
    pub fn step(&self) -> Step {
        self.step
    }

    pub fn turn(&self) -> Player {
        match &self.engine {
            Engine::Drop(drop) => drop.turn(),
            Engine::Move(movement) => movement.turn(),
        }
    }

    #[inline]
    pub fn selected(&self) -> Option<Pos> {
        self.selected
    }

    #[inline]
    pub fn winner(&self) -> Option<Player> {
        self.winner
    }

    #[inline]
    pub fn is_over(&self) -> bool {
        self.winner.is_some()
    }

    pub fn drop_phase(&self) -> Option<&DropPhase> {
        match &self.engine {
            Engine::Drop(drop) => Some(drop),
            Engine::Move(_) => None,
        }
    }

    pub fn move_phase(&self) -> Option<&MovePhase> {
        match &self.engine {
            Engine::Drop(_) => None,
            Engine::Move(movement) => Some(movement),
        }
    }

    /// Apply one cell sent by the side to move.
    pub fn notify(&mut self, pos: Pos) -> Result<Notified, RuleError> {
        if self.winner.is_some() {
            return Err(RuleError::GameOver);
        }
        let notified = match &mut self.engine {
            Engine::Drop(drop) => {
                let outcome = drop.play(pos)?;
                if outcome.phase_over {
                    self.enter_move_phase();
                }
                Notified::Dropped(outcome)
            }
            Engine::Move(movement) => match self.step {
                Step::Drop | Step::From => {
                    if movement.board().get(pos) != Some(movement.turn()) {
                        return Err(RuleError::NotOwned);
                    }
                    self.selected = Some(pos);
                    self.step = Step::To;
                    return Ok(Notified::Selected(pos));
                }
                Step::To => {
                    if movement.board().get(pos) == Some(movement.turn()) {
                        self.selected = Some(pos);
                        return Ok(Notified::Selected(pos));
                    }
                    let Some(from) = self.selected else {
                        return Err(RuleError::NotOwned);
                    };
                    let outcome = movement.play(from, pos)?;
                    self.selected = None;
                    self.step = if outcome.capture { Step::Take } else { Step::From };
                    Notified::Moved(outcome)
                }
                Step::Take => {
                    let outcome = movement.remove(pos)?;
                    self.step = Step::From;
                    Notified::Captured(outcome)
                }
            },
        };
        self.settle();
        Ok(notified)
    }

    /// End the game with `loser` beaten. No effect once decided.
    pub fn forfeit(&mut self, loser: Player) {
        if self.winner.is_some() {
            return;
        }
        if let Engine::Move(movement) = &mut self.engine {
            movement.resign(loser);
        }
        self.winner = Some(loser.opponent());
    }

    /// Cells the side to move may send right now.
    pub fn hints(&self) -> Vec<Pos> {
        if self.winner.is_some() {
            return Vec::new();
        }
        match &self.engine {
            Engine::Drop(drop) => drop.move_list(),
            Engine::Move(movement) => match self.step {
                Step::Drop | Step::From => {
                    let mut origins: Vec<Pos> = movement.move_list().iter().map(|s| s.from).collect();
                    origins.dedup();
                    origins
                }
                Step::To => movement
                    .move_list()
                    .iter()
                    .filter(|s| Some(s.from) == self.selected)
                    .map(|s| s.to)
                    .collect(),
                Step::Take => movement.capture_list(),
            },
        }
    }

    fn enter_move_phase(&mut self) {
        let size = self.size();
        let engine = std::mem::replace(&mut self.engine, Engine::Drop(DropPhase::new(size)));
        self.engine = match engine {
            Engine::Drop(drop) => Engine::Move(drop.into_move_phase()),
            moved => moved,
        };
        self.step = Step::From;
        self.selected = None;
    }

    /// Record the winner after an action. A side with nothing to play loses.
    fn settle(&mut self) {
        match &mut self.engine {
            Engine::Drop(drop) => {
                if drop.move_list().is_empty() {
                    self.winner = Some(drop.turn().opponent());
                }
            }
            Engine::Move(movement) => {
                if let Some(winner) = movement.winner() {
                    self.winner = Some(winner);
                } else if !movement.has_legal_action() {
                    let loser = movement.turn();
                    movement.resign(loser);
                    self.winner = Some(loser.opponent());
                }
            }
        }
    }
}
