//! Per-cell generation log.
//!
//! Generations are append-only: entries are never edited, only pushed or
//! removed by index. Removing the most recent entry recomputes the cell's
//! output from whatever is now most recent.

use thiserror::Error;

use super::cell::{Cell, Generation, GenerationPin, Grid};

/// Separator placed between joined generation outputs.
pub const GENERATION_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generation index {index} out of range (cell has {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

impl Cell {
    /// Push a generation onto the log. The output is left to the caller.
    pub fn append_generation(&mut self, generation: Generation) {
        self.generations.push(generation);
    }

    /// Push a generation and make its output the cell's current output.
    pub fn record_generation(&mut self, generation: Generation) {
        self.output = generation.output.clone();
        self.append_generation(generation);
    }

    /// Remove the generation at `index` (0-based) and return it.
    pub fn delete_generation(&mut self, index: usize) -> Result<Generation, GenerationError> {
        let len = self.generations.len();
        if index >= len {
            return Err(GenerationError::IndexOutOfRange { index, len });
        }
        let was_latest = index + 1 == len;
        let removed = self.generations.remove(index);
        if was_latest {
            self.output = self
                .generations
                .last()
                .map(|g| g.output.clone())
                .unwrap_or_default();
        }
        Ok(removed)
    }

    /// Replace the pinned generation selection.
    pub fn pin_generations(&mut self, pins: Vec<GenerationPin>) {
        self.selected_generations = pins;
    }

    /// Render pinned generations as `Generation N from <cell>:` blocks.
    ///
    /// Pins pointing at missing cells or generations are skipped. Returns
    /// `None` when nothing renders.
    pub fn render_pins(&self, grid: &Grid) -> Option<String> {
        let mut blocks = Vec::new();
        for pin in &self.selected_generations {
            let output = grid.get(&pin.cell).and_then(|cell| {
                pin.generation
                    .checked_sub(1)
                    .and_then(|idx| cell.generations.get(idx))
                    .map(|g| g.output.clone())
            });
            match output {
                Some(output) => blocks.push(format!(
                    "Generation {} from {}:\n{}",
                    pin.generation, pin.cell, output
                )),
                None => tracing::warn!(
                    cell = %pin.cell,
                    generation = pin.generation,
                    "pinned generation no longer exists"
                ),
            }
        }
        if blocks.is_empty() {
            None
        } else {
            Some(blocks.join(GENERATION_SEPARATOR))
        }
    }
}
