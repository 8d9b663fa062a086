use promptgrid_engine::engine::{Cell, CellKey, CellRef, Sheet, references_cell};

use super::Evaluator;
use super::run::RunContext;
use crate::notify::RunEvent;

impl Evaluator {
    /// Cells whose prompt references `cell` on `sheet_name`, as
    /// `(sheet name, cell)` pairs in cascade order.
    pub async fn dependents_of(&self, sheet_name: &str, cell: &CellRef) -> Vec<(String, CellRef)> {
        let Some(source) = self.workbook.sheet_by_name(sheet_name) else {
            return Vec::new();
        };
        self.collect_dependents(&source, cell)
            .await
            .into_iter()
            .map(|(sheet, cell_ref, _)| (sheet.name, cell_ref))
            .collect()
    }

    /// Scan the source sheet first, then every other sheet in workbook order;
    /// cells within a sheet are visited row-major.
    async fn collect_dependents(&self, source: &Sheet, cell: &CellRef) -> Vec<(Sheet, CellRef, Cell)> {
        let mut sheets = vec![source.clone()];
        sheets.extend(
            self.workbook
                .sheets()
                .into_iter()
                .filter(|s| s.id != source.id),
        );

        let mut found = Vec::new();
        for sheet in sheets {
            if !sheet.is_loaded() {
                if !self.config.cascade_loads_sheets {
                    continue;
                }
                if self.ensure_loaded(&sheet).await.is_err() {
                    continue;
                }
            }
            for cell_ref in sheet.sorted_refs() {
                if sheet.id == source.id && &cell_ref == cell {
                    continue;
                }
                let Some(candidate) = sheet.cell(&cell_ref) else {
                    continue;
                };
                if references_cell(&candidate.prompt, &sheet.name, &source.name, cell) {
                    found.push((sheet.clone(), cell_ref, candidate));
                }
            }
        }
        found
    }

    /// Re-run auto-run dependents of a cell that just finished.
    pub(super) async fn cascade(&self, sheet: &Sheet, key: &CellKey, ctx: &mut RunContext) {
        let targets: Vec<(Sheet, CellRef)> = self
            .collect_dependents(sheet, &key.cell)
            .await
            .into_iter()
            .filter(|(_, _, candidate)| candidate.auto_run)
            .map(|(dep_sheet, cell_ref, _)| (dep_sheet, cell_ref))
            .collect();
        if targets.is_empty() {
            return;
        }

        self.notifier.notify(RunEvent::CascadeStarted {
            sheet: sheet.name.clone(),
            cell: key.cell.clone(),
            dependents: targets
                .iter()
                .map(|(dep_sheet, cell_ref)| (dep_sheet.name.clone(), cell_ref.clone()))
                .collect(),
        });
        for (dep_sheet, cell_ref) in targets {
            self.run_node(CellKey::new(&dep_sheet.id, cell_ref), ctx).await;
        }
    }
}
