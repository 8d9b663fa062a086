//! Cell persistence collaborator.
//!
//! The evaluator reads whole sheets through [`CellStore::load_all_cells`] the
//! first time a sheet is addressed and writes each changed cell back through
//! [`CellStore::save_cell`]. Persistence failures are logged, never surfaced
//! as run failures.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use promptgrid_engine::engine::{Cell, CellRef, Workbook};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Backing store for sheet cells.
#[async_trait]
pub trait CellStore: Send + Sync {
    async fn get_cell(&self, sheet_id: &str, cell: &CellRef) -> Result<Option<Cell>, StoreError>;

    async fn load_all_cells(&self, sheet_id: &str) -> Result<HashMap<CellRef, Cell>, StoreError>;

    async fn save_cell(&self, sheet_id: &str, cell_ref: &CellRef, cell: &Cell)
    -> Result<(), StoreError>;
}

#[async_trait]
impl CellStore for Arc<dyn CellStore> {
    async fn get_cell(&self, sheet_id: &str, cell: &CellRef) -> Result<Option<Cell>, StoreError> {
        (**self).get_cell(sheet_id, cell).await
    }

    async fn load_all_cells(&self, sheet_id: &str) -> Result<HashMap<CellRef, Cell>, StoreError> {
        (**self).load_all_cells(sheet_id).await
    }

    async fn save_cell(
        &self,
        sheet_id: &str,
        cell_ref: &CellRef,
        cell: &Cell,
    ) -> Result<(), StoreError> {
        (**self).save_cell(sheet_id, cell_ref, cell).await
    }
}

/// In-memory store for the CLI, development and testing.
#[derive(Clone, Default)]
pub struct InMemoryCellStore {
    cells: Arc<DashMap<(String, CellRef), Cell>>,
}

impl InMemoryCellStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding every in-memory cell of `workbook`.
    pub fn from_workbook(workbook: &Workbook) -> Self {
        let store = Self::new();
        for sheet in workbook.sheets() {
            for entry in sheet.grid.iter() {
                store.insert(&sheet.id, entry.key().clone(), entry.value().clone());
            }
        }
        store
    }

    /// Seed a cell without going through the async API.
    pub fn insert(&self, sheet_id: &str, cell_ref: CellRef, cell: Cell) {
        self.cells.insert((sheet_id.to_string(), cell_ref), cell);
    }

    pub fn get(&self, sheet_id: &str, cell_ref: &CellRef) -> Option<Cell> {
        self.cells
            .get(&(sheet_id.to_string(), cell_ref.clone()))
            .map(|c| c.clone())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[async_trait]
impl CellStore for InMemoryCellStore {
    async fn get_cell(&self, sheet_id: &str, cell: &CellRef) -> Result<Option<Cell>, StoreError> {
        Ok(self.get(sheet_id, cell))
    }

    async fn load_all_cells(&self, sheet_id: &str) -> Result<HashMap<CellRef, Cell>, StoreError> {
        Ok(self
            .cells
            .iter()
            .filter(|entry| entry.key().0 == sheet_id)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect())
    }

    async fn save_cell(
        &self,
        sheet_id: &str,
        cell_ref: &CellRef,
        cell: &Cell,
    ) -> Result<(), StoreError> {
        self.insert(sheet_id, cell_ref.clone(), cell.clone());
        Ok(())
    }
}
