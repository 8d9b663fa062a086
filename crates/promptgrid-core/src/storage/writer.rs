//! Writer for JSON workbook files

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use promptgrid_engine::engine::{Cell, Workbook};

use super::{FORMAT_VERSION, SheetFile, WorkbookFile};
use crate::error::Result;

/// Write a workbook to a file.
pub fn write_workbook(path: &Path, workbook: &Workbook) -> Result<()> {
    let content = write_workbook_content(workbook)?;
    fs::write(path, content)?;
    Ok(())
}

/// Serialize a workbook. Cells still at their defaults are skipped.
///
/// Only cells in memory are written; load every sheet first.
pub fn write_workbook_content(workbook: &Workbook) -> Result<String> {
    let blank = Cell::default();
    let sheets = workbook
        .sheets()
        .into_iter()
        .map(|sheet| {
            let cells: BTreeMap<_, _> = sheet
                .grid
                .iter()
                .filter(|entry| *entry.value() != blank)
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect();
            SheetFile {
                id: sheet.id.clone(),
                name: sheet.name.clone(),
                rows: sheet.rows,
                cols: sheet.cols,
                cells,
            }
        })
        .collect();

    let file = WorkbookFile {
        version: FORMAT_VERSION,
        sheets,
    };
    Ok(serde_json::to_string_pretty(&file)? + "\n")
}
