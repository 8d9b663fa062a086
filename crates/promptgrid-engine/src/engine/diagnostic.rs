//! Resolution diagnostics.
//!
//! A diagnostic's `Display` form is the bracketed text that gets embedded into
//! a consuming prompt (or stored as an output) when a reference can't produce
//! real content.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    #[error("[Sheet \"{sheet}\" not found]")]
    SheetNotFound { sheet: String },

    #[error("[Sheet \"{sheet}\" could not be loaded: {reason}]")]
    SheetLoadFailed { sheet: String, reason: String },

    #[error("[Cell \"{cell}\" not found in sheet \"{sheet}\"]")]
    CellNotFound { cell: String, sheet: String },

    #[error("[Cell \"{cell}\" has no generations]")]
    NoGenerations { cell: String },

    #[error("[Generation {generation} not found for cell \"{cell}\" (has {available})]")]
    GenerationOutOfRange {
        cell: String,
        generation: usize,
        available: usize,
    },

    #[error("[Generations {start}-{end} out of range for cell \"{cell}\" (has {available})]")]
    GenerationRangeOutOfRange {
        cell: String,
        start: usize,
        end: usize,
        available: usize,
    },

    #[error("[Cell \"{cell}\" is completely empty]")]
    EmptyContent { cell: String },

    #[error("[Cell \"{cell}\" has no prompt]")]
    NoPrompt { cell: String },

    /// The referenced cell's last run failed.
    #[error("[Cell \"{cell}\" failed]")]
    UpstreamFailed { cell: String },
}
