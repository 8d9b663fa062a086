use std::path::PathBuf;

use promptgrid_engine::engine::{Sheet, Workbook};

use crate::error::{PromptgridError, Result};

/// Name of the sheet a new document starts with.
pub const DEFAULT_SHEET_NAME: &str = "Sheet1";

/// An open workbook plus where it lives on disk.
pub struct Document {
    /// Every sheet of the document. Clones share cells, so an evaluator built
    /// from `workbook.clone()` writes straight into the document.
    pub workbook: Workbook,
    /// Current file path
    pub file_path: Option<PathBuf>,
    /// Whether the workbook has unsaved edits
    pub modified: bool,
}

impl Document {
    /// Create a document with a single empty sheet.
    ///
    /// This constructor is side-effect free: it does not touch the filesystem.
    pub fn new() -> Self {
        let workbook = Workbook::with_sheet(Sheet::new("sheet-1", DEFAULT_SHEET_NAME));
        Document {
            workbook,
            file_path: None,
            modified: false,
        }
    }

    /// Create a document and load `path` if it exists.
    pub fn with_file(path: Option<PathBuf>) -> Result<Self> {
        let mut doc = Self::new();
        if let Some(p) = path {
            if p.exists() {
                doc.load_file(&p)?;
            } else {
                doc.file_path = Some(p);
            }
        }
        Ok(doc)
    }

    pub fn sheet(&self, name: &str) -> Result<Sheet> {
        self.workbook
            .sheet_by_name(name)
            .ok_or_else(|| PromptgridError::SheetNotFound(name.to_string()))
    }

    /// The first sheet, used when a cell is addressed without a sheet name.
    pub fn first_sheet(&self) -> Option<Sheet> {
        self.workbook.sheets().into_iter().next()
    }

    pub(crate) fn next_sheet_id(&self) -> String {
        let sheets = self.workbook.sheets();
        let mut n = sheets.len() + 1;
        loop {
            let id = format!("sheet-{}", n);
            if !sheets.iter().any(|s| s.id == id) {
                return id;
            }
            n += 1;
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}
