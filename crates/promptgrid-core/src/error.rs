//! Error types for Promptgrid core.

use thiserror::Error;

use promptgrid_engine::engine::{GenerationError, WorkbookError};

use crate::provider::ProviderError;
use crate::store::StoreError;

/// Errors that can occur in Promptgrid document and storage operations.
///
/// Cell execution never returns these: its failures are recorded on the
/// cell instead (see [`RunState`](crate::evaluator::RunState)).
#[derive(Error, Debug)]
pub enum PromptgridError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Workbook error: {0}")]
    Workbook(#[from] WorkbookError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Sheet not found: {0}")]
    SheetNotFound(String),

    #[error("Invalid cell id: {0}")]
    InvalidCellId(String),

    #[error("No file path set")]
    NoFilePath,
}

pub type Result<T> = std::result::Result<T, PromptgridError>;
