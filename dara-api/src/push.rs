//! Events pushed to players over their update stream.

use std::collections::BTreeMap;

use dara_core::{Board, Game, Phase, Player, Pos, Step};
use serde::Serialize;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cell {
    Empty,
    Black,
    White,
}

impl From<Option<Player>> for Cell {
    fn from(cell: Option<Player>) -> Self {
        match cell {
            None => Cell::Empty,
            Some(Player::Black) => Cell::Black,
            Some(Player::White) => Cell::White,
        }
    }
}

/// Full game state after a change.
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct GameUpdate {
    /// The cell that caused this update, absent for the opening state.
    #[serde(rename = "move", skip_serializing_if = "Option::is_none")]
    pub last: Option<Pos>,
    pub board: Vec<Vec<Cell>>,
    pub phase: Phase,
    pub step: Step,
    pub players: BTreeMap<String, Player>,
    /// Nick of the side to move.
    pub turn: String,
    /// Seconds left on each clock.
    pub clocks: BTreeMap<String, u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
}

impl GameUpdate {
    /// `nicks` and `clocks` are indexed by `Player::index`.
    pub fn new(game: &Game, nicks: [&str; 2], clocks: [u32; 2], last: Option<Pos>) -> GameUpdate {
        let nick = |player: Player| nicks[player.index()].to_string();
        let sides = [Player::Black, Player::White];
        GameUpdate {
            last,
            board: board_cells(game.board()),
            phase: game.phase(),
            step: game.step(),
            players: sides.iter().map(|&p| (nick(p), p)).collect(),
            turn: nick(game.turn()),
            clocks: sides.iter().map(|&p| (nick(p), clocks[p.index()])).collect(),
            winner: game.winner().map(nick),
        }
    }
}

fn board_cells(board: &Board) -> Vec<Vec<Cell>> {
    board
        .rows()
        .into_iter()
        .map(|row| row.into_iter().map(Cell::from).collect())
        .collect()
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
#[serde(untagged)]
pub enum Push {
    State(Box<GameUpdate>),
    Disconnected { disconnected: String },
    Reconnected { reconnected: String },
    /// End of a wait without a game: `{"winner": null}`.
    Ended { winner: Option<String> },
    /// Keep-alive, sent as a stream comment rather than data.
    #[serde(skip)]
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;
    use dara_core::BoardSize;
    use serde_json::json;

    #[test]
    fn test_opening_state_json() {
        let game = Game::new(BoardSize::new(5, 5));
        let update = GameUpdate::new(&game, ["ann", "bo"], [300, 300], None);
        let value = serde_json::to_value(Push::State(Box::new(update))).unwrap();

        assert!(value.get("move").is_none());
        assert!(value.get("winner").is_none());
        assert_eq!(value["phase"], "drop");
        assert_eq!(value["step"], "drop");
        assert_eq!(value["turn"], "ann");
        assert_eq!(value["players"], json!({"ann": "black", "bo": "white"}));
        assert_eq!(value["clocks"]["bo"], 300);
        assert_eq!(value["board"].as_array().unwrap().len(), 5);
        assert_eq!(value["board"][0][0], "empty");
    }

    #[test]
    fn test_state_after_drop() {
        let mut game = Game::new(BoardSize::STANDARD);
        let pos = Pos::new(2, 3);
        game.notify(pos).unwrap();
        let update = GameUpdate::new(&game, ["ann", "bo"], [300, 299], Some(pos));
        let value = serde_json::to_value(Push::State(Box::new(update))).unwrap();

        assert_eq!(value["move"], json!({"row": 2, "column": 3}));
        assert_eq!(value["board"][2][3], "black");
        assert_eq!(value["turn"], "bo");
    }

    #[test]
    fn test_lifecycle_events_json() {
        let disconnected = Push::Disconnected {
            disconnected: "ann".to_string(),
        };
        assert_eq!(serde_json::to_value(disconnected).unwrap(), json!({"disconnected": "ann"}));
        let ended = Push::Ended { winner: None };
        assert_eq!(serde_json::to_value(ended).unwrap(), json!({"winner": null}));
        let won = Push::Ended {
            winner: Some("bo".to_string()),
        };
        assert_eq!(serde_json::to_value(won).unwrap(), json!({"winner": "bo"}));
    }
}
