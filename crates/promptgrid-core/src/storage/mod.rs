//! Workbook file storage.
//!
//! Workbooks are stored as a single JSON document: a format version and the
//! list of sheets, each with its cells keyed by A1 id.

mod parser;
mod writer;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use promptgrid_engine::engine::{Cell, CellRef};

pub use parser::{MAX_WORKBOOK_BYTES, parse_workbook, parse_workbook_content};
pub use writer::{write_workbook, write_workbook_content};

/// Current workbook file format version.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WorkbookFile {
    pub version: u32,
    #[serde(default)]
    pub sheets: Vec<SheetFile>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SheetFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub rows: usize,
    #[serde(default)]
    pub cols: usize,
    #[serde(default)]
    pub cells: BTreeMap<CellRef, Cell>,
}
