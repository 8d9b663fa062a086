//! Cell data structures for prompt sheets.
//!
//! - [`Cell`] - A prompt cell with its derived output and generation history
//! - [`Generation`] - One immutable record of a provider invocation
//! - [`ContentKind`] - Shape of a generation's output (text or media URL)
//! - [`GenerationPin`] - A pinned `{cell, generation}` selection
//! - [`Grid`] - Shared sparse storage for one sheet's cells (backed by `DashMap`)

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::cell_ref::CellRef;
use super::format::infer_content_kind;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// What a generation's output holds, inferred from the output string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Text,
    Image,
    Video,
    Audio,
}

/// One past provider invocation for a cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub timestamp: DateTime<Utc>,
    /// The assembled prompt actually sent to the provider.
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub output: String,
    pub kind: ContentKind,
}

impl Generation {
    pub fn new(prompt: &str, model: &str, temperature: f32, output: &str) -> Generation {
        Generation {
            timestamp: Utc::now(),
            prompt: prompt.to_string(),
            model: model.to_string(),
            temperature,
            output: output.to_string(),
            kind: infer_content_kind(output),
        }
    }
}

/// A pinned generation: `generation` is 1-based, as shown to users.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationPin {
    pub cell: CellRef,
    pub generation: usize,
}

/// A cell in a prompt sheet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cell {
    pub prompt: String,
    /// Last rendered value. Derived from generations, formulas, or run errors.
    pub output: String,
    pub model: String,
    pub temperature: f32,
    /// Optional template wrapping the prompt; `{input}` marks where it goes.
    pub cell_prompt: Option<String>,
    pub auto_run: bool,
    /// Seconds between scheduled runs, 0 disables.
    pub interval: u64,
    pub generations: Vec<Generation>,
    pub selected_generations: Vec<GenerationPin>,
}

impl Default for Cell {
    fn default() -> Self {
        Cell {
            prompt: String::new(),
            output: String::new(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            cell_prompt: None,
            auto_run: false,
            interval: 0,
            generations: Vec::new(),
            selected_generations: Vec::new(),
        }
    }
}

impl Cell {
    pub fn new_empty() -> Cell {
        Cell::default()
    }

    pub fn new_prompt(prompt: &str) -> Cell {
        Cell {
            prompt: prompt.to_string(),
            ..Cell::default()
        }
    }

    /// A cell that already carries a rendered output (e.g. imported content).
    pub fn with_output(prompt: &str, output: &str) -> Cell {
        Cell {
            prompt: prompt.to_string(),
            output: output.to_string(),
            ..Cell::default()
        }
    }

    /// Formula prompts start with `=`; returns the expression after it.
    pub fn formula(&self) -> Option<&str> {
        self.prompt.trim_start().strip_prefix('=')
    }

    pub fn has_prompt(&self) -> bool {
        !self.prompt.trim().is_empty()
    }

    pub fn latest_generation(&self) -> Option<&Generation> {
        self.generations.last()
    }
}

/// Shared sparse cell storage for one sheet. Clones share the same map.
pub type Grid = Arc<DashMap<CellRef, Cell>>;
