//! Reader for JSON workbook files

use std::fs;
use std::path::Path;

use promptgrid_engine::engine::{Sheet, Workbook};

use super::{FORMAT_VERSION, WorkbookFile};
use crate::error::{PromptgridError, Result};

pub const MAX_WORKBOOK_BYTES: u64 = 16 * 1_048_576; // 16 MiB

/// Parse a workbook file.
pub fn parse_workbook(path: &Path) -> Result<Workbook> {
    let meta = fs::metadata(path)?;
    if meta.len() > MAX_WORKBOOK_BYTES {
        return Err(PromptgridError::Parse(format!(
            "Refusing to read {}: workbook too large ({} bytes, max {})",
            path.display(),
            meta.len(),
            MAX_WORKBOOK_BYTES
        )));
    }
    let content = fs::read_to_string(path)?;
    parse_workbook_content(&content)
}

/// Parse workbook JSON. Every sheet comes back loaded.
pub fn parse_workbook_content(content: &str) -> Result<Workbook> {
    let file: WorkbookFile = serde_json::from_str(content)?;
    if file.version > FORMAT_VERSION {
        return Err(PromptgridError::Parse(format!(
            "Unsupported workbook version {} (newest supported is {})",
            file.version, FORMAT_VERSION
        )));
    }

    let workbook = Workbook::new();
    for sheet_file in file.sheets {
        let sheet = Sheet::new(&sheet_file.id, &sheet_file.name)
            .with_extents(sheet_file.rows, sheet_file.cols);
        for (cell_ref, cell) in sheet_file.cells {
            sheet.set_cell(cell_ref, cell);
        }
        workbook.add_sheet(sheet)?;
    }
    Ok(workbook)
}
