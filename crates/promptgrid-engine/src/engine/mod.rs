//! Reference evaluator API.
//!
//! This module provides the synchronous core of prompt evaluation:
//!
//! - [`Cell`], [`Generation`], [`Grid`] - Cell storage and generation history
//! - [`Sheet`], [`Workbook`] - Per-workbook cell cache addressed by sheet name
//! - [`CellRef`] - Cell id parsing (A1 notation ↔ row/col indices)
//! - [`parse_references`], [`classify`] - Reference token extraction and decoding
//! - [`resolve`] - Reference resolution with typed [`Diagnostic`]s
//! - [`substitute_references`] - Prompt assembly helpers
//! - [`detect_cycle`], [`RunPath`] - Circular reference detection
//! - [`FormulaEvaluator`] - Formula short-circuit for `=` prompts

mod assemble;
mod cell;
mod cell_ref;
mod cycle;
mod deps;
mod diagnostic;
mod eval;
mod format;
mod generations;
mod reference;
mod resolve;
mod sheet;

pub use assemble::{
    TEMPLATE_INPUT, apply_template, attach_image_url, is_image_to_video_model, prepend_block,
    substitute_references,
};
pub use cell::{
    Cell, ContentKind, DEFAULT_MODEL, DEFAULT_TEMPERATURE, Generation, GenerationPin, Grid,
};
pub use cell_ref::{CellRef, is_cell_id};
pub use cycle::{RunPath, detect_cycle};
pub use deps::{extract_dependencies, extract_references, parse_references, references_cell};
pub use diagnostic::Diagnostic;
pub use eval::{FORMULA_ERROR, FormulaEvaluator, RhaiFormulaEvaluator, create_engine, eval_formula};
pub use format::{
    GENERATING_MARKER, NO_GENERATIONS_MARKER, contains_image_url, find_image_url, format_dynamic,
    format_number, infer_content_kind, is_placeholder_output, strip_markup,
};
pub use generations::{GENERATION_SEPARATOR, GenerationError};
pub use reference::{GenerationSelector, Reference, ValueKind, classify};
pub use resolve::{resolve, resolve_cell_value, resolve_to_text, resolve_token};
pub use sheet::{CellKey, Sheet, Workbook, WorkbookError};

pub use rhai::Dynamic;
