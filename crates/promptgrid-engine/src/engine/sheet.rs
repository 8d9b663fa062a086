//! Sheets and the per-workbook cell cache.
//!
//! A [`Workbook`] is the in-memory view of every sheet the evaluator can
//! address. Sheet names are the cross-sheet addressing key and are unique.
//! A sheet's cells may not be loaded yet; callers that need them go through
//! a store first and then mark the sheet loaded.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use super::cell::{Cell, Grid};
use super::cell_ref::CellRef;

/// Identifies a cell across the whole workbook.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CellKey {
    pub sheet_id: String,
    pub cell: CellRef,
}

impl CellKey {
    pub fn new(sheet_id: &str, cell: CellRef) -> CellKey {
        CellKey {
            sheet_id: sheet_id.to_string(),
            cell,
        }
    }
}

/// Handle to one sheet. Clones share the same cells.
#[derive(Clone, Debug)]
pub struct Sheet {
    pub id: String,
    pub name: String,
    pub rows: usize,
    pub cols: usize,
    pub grid: Grid,
    loaded: Arc<AtomicBool>,
}

impl Sheet {
    /// A sheet whose cells are all in memory already.
    pub fn new(id: &str, name: &str) -> Sheet {
        let sheet = Sheet::unloaded(id, name);
        sheet.mark_loaded();
        sheet
    }

    /// A sheet whose cells still live only in the backing store.
    pub fn unloaded(id: &str, name: &str) -> Sheet {
        Sheet {
            id: id.to_string(),
            name: name.to_string(),
            rows: 0,
            cols: 0,
            grid: Arc::new(dashmap::DashMap::new()),
            loaded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_extents(mut self, rows: usize, cols: usize) -> Sheet {
        self.rows = rows;
        self.cols = cols;
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn mark_loaded(&self) {
        self.loaded.store(true, Ordering::Release);
    }

    /// Merge cells fetched from a store and mark the sheet loaded.
    ///
    /// Cells already in memory win: they may carry edits the store hasn't seen.
    pub fn load_cells(&self, cells: HashMap<CellRef, Cell>) {
        for (cell_ref, cell) in cells {
            self.grid.entry(cell_ref).or_insert(cell);
        }
        self.mark_loaded();
    }

    pub fn cell(&self, cell_ref: &CellRef) -> Option<Cell> {
        self.grid.get(cell_ref).map(|c| c.clone())
    }

    /// Fetch a cell, creating a default one if it doesn't exist yet.
    pub fn cell_or_default(&self, cell_ref: &CellRef) -> Cell {
        self.grid.entry(cell_ref.clone()).or_default().clone()
    }

    pub fn set_cell(&self, cell_ref: CellRef, cell: Cell) {
        self.grid.insert(cell_ref, cell);
    }

    /// Apply `f` to a cell (materializing it first) and return the result.
    pub fn update_cell<R>(&self, cell_ref: &CellRef, f: impl FnOnce(&mut Cell) -> R) -> R {
        let mut entry = self.grid.entry(cell_ref.clone()).or_default();
        f(entry.value_mut())
    }

    /// All cell refs in row-major order.
    pub fn sorted_refs(&self) -> Vec<CellRef> {
        let mut refs: Vec<CellRef> = self.grid.iter().map(|e| e.key().clone()).collect();
        refs.sort();
        refs
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum WorkbookError {
    #[error("a sheet named \"{0}\" already exists")]
    DuplicateSheetName(String),
    #[error("a sheet with id \"{0}\" already exists")]
    DuplicateSheetId(String),
}

/// Ordered set of sheets. Clones share the same sheet list.
#[derive(Clone, Debug, Default)]
pub struct Workbook {
    sheets: Arc<RwLock<Vec<Sheet>>>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// A workbook holding just `sheet`.
    pub fn with_sheet(sheet: Sheet) -> Self {
        Workbook {
            sheets: Arc::new(RwLock::new(vec![sheet])),
        }
    }

    pub fn add_sheet(&self, sheet: Sheet) -> Result<(), WorkbookError> {
        let mut sheets = self.sheets.write().unwrap_or_else(|e| e.into_inner());
        if sheets.iter().any(|s| s.name == sheet.name) {
            return Err(WorkbookError::DuplicateSheetName(sheet.name));
        }
        if sheets.iter().any(|s| s.id == sheet.id) {
            return Err(WorkbookError::DuplicateSheetId(sheet.id));
        }
        sheets.push(sheet);
        Ok(())
    }

    pub fn rename_sheet(&self, sheet_id: &str, new_name: &str) -> Result<bool, WorkbookError> {
        let mut sheets = self.sheets.write().unwrap_or_else(|e| e.into_inner());
        if sheets.iter().any(|s| s.name == new_name && s.id != sheet_id) {
            return Err(WorkbookError::DuplicateSheetName(new_name.to_string()));
        }
        match sheets.iter_mut().find(|s| s.id == sheet_id) {
            Some(sheet) => {
                sheet.name = new_name.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn sheet_by_name(&self, name: &str) -> Option<Sheet> {
        let sheets = self.sheets.read().unwrap_or_else(|e| e.into_inner());
        sheets.iter().find(|s| s.name == name).cloned()
    }

    pub fn sheet_by_id(&self, id: &str) -> Option<Sheet> {
        let sheets = self.sheets.read().unwrap_or_else(|e| e.into_inner());
        sheets.iter().find(|s| s.id == id).cloned()
    }

    /// Every sheet in workbook order.
    pub fn sheets(&self) -> Vec<Sheet> {
        self.sheets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.sheets.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
