//! WASM bindings for dara-core
//!
//! Lets the browser client highlight legal cells and validate clicks locally
//! before sending them to the server.

use wasm_bindgen::prelude::*;

use crate::{BoardSize, Game, Phase, Player, Pos, Step};

/// WASM-friendly wrapper around Game
#[wasm_bindgen]
pub struct WasmGame {
    inner: Game,
}

#[wasm_bindgen]
impl WasmGame {
    /// Start a new game on a rows x columns board. Throws on an
    /// unsupported size.
    #[wasm_bindgen(constructor)]
    pub fn new(rows: usize, columns: usize) -> Result<WasmGame, JsValue> {
        let size = BoardSize::checked(rows, columns)
            .ok_or_else(|| JsValue::from_str(&format!("unsupported board size {}x{}", rows, columns)))?;
        Ok(WasmGame {
            inner: Game::new(size),
        })
    }

    /// "drop" or "move"
    pub fn phase(&self) -> String {
        match self.inner.phase() {
            Phase::Drop => "drop".to_string(),
            Phase::Move => "move".to_string(),
        }
    }

    /// "drop", "from", "to" or "take"
    pub fn step(&self) -> String {
        match self.inner.step() {
            Step::Drop => "drop".to_string(),
            Step::From => "from".to_string(),
            Step::To => "to".to_string(),
            Step::Take => "take".to_string(),
        }
    }

    /// Side to move: 1 (black) or 2 (white)
    pub fn turn(&self) -> u8 {
        player_code(Some(self.inner.turn()))
    }

    /// Winner: 0 (none), 1 (black) or 2 (white)
    pub fn winner(&self) -> u8 {
        player_code(self.inner.winner())
    }

    /// Cell contents: 0 (empty), 1 (black) or 2 (white)
    pub fn cell(&self, row: usize, column: usize) -> u8 {
        player_code(self.inner.board().get(Pos::new(row, column)))
    }

    /// Whether a drop at this cell is legal (drop phase only)
    #[wasm_bindgen(js_name = validPlay)]
    pub fn valid_play(&self, row: usize, column: usize) -> bool {
        self.inner
            .drop_phase()
            .is_some_and(|drop| drop.valid_play(Pos::new(row, column)))
    }

    /// Cells that may be clicked next, as [row, column] pairs
    pub fn hints(&self) -> JsValue {
        let cells: Vec<[usize; 2]> = self
            .inner
            .hints()
            .into_iter()
            .map(|pos| [pos.row, pos.col])
            .collect();
        serde_wasm_bindgen::to_value(&cells).unwrap_or(JsValue::NULL)
    }

    /// Legal slides as { from: [r, c], to: [r, c], captures: bool } (move phase only)
    #[wasm_bindgen(js_name = getMoveList)]
    pub fn move_list(&self) -> JsValue {
        let moves: Vec<WasmSlide> = self
            .inner
            .move_phase()
            .map(|movement| movement.move_list().into_iter().map(WasmSlide::from).collect())
            .unwrap_or_default();
        serde_wasm_bindgen::to_value(&moves).unwrap_or(JsValue::NULL)
    }

    /// Apply a clicked cell. Throws the rule violation message on failure.
    pub fn notify(&mut self, row: usize, column: usize) -> Result<(), JsValue> {
        self.inner
            .notify(Pos::new(row, column))
            .map(|_| ())
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }
}

fn player_code(player: Option<Player>) -> u8 {
    match player {
        None => 0,
        Some(Player::Black) => 1,
        Some(Player::White) => 2,
    }
}

/// Serializable slide for JavaScript
#[derive(serde::Serialize)]
struct WasmSlide {
    from: [usize; 2],
    to: [usize; 2],
    captures: bool,
}

impl From<crate::Slide> for WasmSlide {
    fn from(slide: crate::Slide) -> Self {
        WasmSlide {
            from: [slide.from.row, slide.from.col],
            to: [slide.to.row, slide.to.col],
            captures: slide.captures,
        }
    }
}
