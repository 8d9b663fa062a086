use promptgrid_engine::engine::{
    Cell, CellRef, Generation, GenerationPin, Sheet, detect_cycle,
};

use super::Document;
use crate::error::{PromptgridError, Result};

/// Parse an A1 cell id, accepting lowercase input.
pub fn parse_cell_ref(id: &str) -> Result<CellRef> {
    CellRef::from_str(&id.trim().to_ascii_uppercase())
        .ok_or_else(|| PromptgridError::InvalidCellId(id.to_string()))
}

impl Document {
    /// Add an empty sheet. Returns its id.
    pub fn add_sheet(&mut self, name: &str) -> Result<String> {
        let id = self.next_sheet_id();
        self.workbook.add_sheet(Sheet::new(&id, name))?;
        self.modified = true;
        Ok(id)
    }

    /// Rename a sheet. References to the old name are left as written.
    pub fn rename_sheet(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        let sheet = self.sheet(old_name)?;
        if self.workbook.rename_sheet(&sheet.id, new_name)? {
            self.modified = true;
        }
        Ok(())
    }

    pub fn cell(&self, sheet_name: &str, cell_ref: &CellRef) -> Result<Option<Cell>> {
        Ok(self.sheet(sheet_name)?.cell(cell_ref))
    }

    fn edit_cell<R>(
        &mut self,
        sheet_name: &str,
        cell_ref: &CellRef,
        f: impl FnOnce(&mut Cell) -> R,
    ) -> Result<R> {
        let sheet = self.sheet(sheet_name)?;
        let result = sheet.update_cell(cell_ref, f);
        self.modified = true;
        Ok(result)
    }

    /// Set a cell's prompt.
    ///
    /// Returns the reference cycle the new prompt closes on its sheet, if
    /// any. The edit is kept either way: cycles are cut when the cell runs.
    pub fn set_prompt(
        &mut self,
        sheet_name: &str,
        cell_ref: &CellRef,
        prompt: &str,
    ) -> Result<Option<Vec<CellRef>>> {
        self.edit_cell(sheet_name, cell_ref, |c| c.prompt = prompt.to_string())?;

        let sheet = self.sheet(sheet_name)?;
        let cycle = detect_cycle(cell_ref, &sheet);
        if let Some(path) = &cycle {
            let path: Vec<String> = path.iter().map(|c| c.to_string()).collect();
            tracing::warn!(
                sheet = %sheet_name,
                cell = %cell_ref,
                path = %path.join(" -> "),
                "prompt creates a circular reference"
            );
        }
        Ok(cycle)
    }

    pub fn set_model(&mut self, sheet_name: &str, cell_ref: &CellRef, model: &str) -> Result<()> {
        self.edit_cell(sheet_name, cell_ref, |c| c.model = model.to_string())
    }

    pub fn set_temperature(
        &mut self,
        sheet_name: &str,
        cell_ref: &CellRef,
        temperature: f32,
    ) -> Result<()> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(PromptgridError::Parse(format!(
                "temperature {} out of range (0.0 - 2.0)",
                temperature
            )));
        }
        self.edit_cell(sheet_name, cell_ref, |c| c.temperature = temperature)
    }

    /// Set or clear the template wrapping a cell's prompt.
    pub fn set_cell_prompt(
        &mut self,
        sheet_name: &str,
        cell_ref: &CellRef,
        template: Option<&str>,
    ) -> Result<()> {
        let template = template
            .filter(|t| !t.trim().is_empty())
            .map(str::to_string);
        self.edit_cell(sheet_name, cell_ref, |c| c.cell_prompt = template)
    }

    pub fn set_auto_run(&mut self, sheet_name: &str, cell_ref: &CellRef, auto_run: bool) -> Result<()> {
        self.edit_cell(sheet_name, cell_ref, |c| c.auto_run = auto_run)
    }

    /// Seconds between scheduled runs; 0 turns scheduling off.
    pub fn set_interval(&mut self, sheet_name: &str, cell_ref: &CellRef, seconds: u64) -> Result<()> {
        self.edit_cell(sheet_name, cell_ref, |c| c.interval = seconds)
    }

    /// Remove a cell entirely. Returns true if it existed.
    pub fn clear_cell(&mut self, sheet_name: &str, cell_ref: &CellRef) -> Result<bool> {
        let sheet = self.sheet(sheet_name)?;
        let existed = sheet.grid.remove(cell_ref).is_some();
        if existed {
            self.modified = true;
        }
        Ok(existed)
    }

    /// Push a generation onto a cell's log without touching its output.
    pub fn append_generation(
        &mut self,
        sheet_name: &str,
        cell_ref: &CellRef,
        generation: Generation,
    ) -> Result<()> {
        self.edit_cell(sheet_name, cell_ref, |c| c.append_generation(generation))
    }

    /// Remove the generation at `index` (0-based).
    pub fn delete_generation(
        &mut self,
        sheet_name: &str,
        cell_ref: &CellRef,
        index: usize,
    ) -> Result<Generation> {
        let removed = self.edit_cell(sheet_name, cell_ref, |c| c.delete_generation(index))??;
        Ok(removed)
    }

    pub fn pin_generations(
        &mut self,
        sheet_name: &str,
        cell_ref: &CellRef,
        pins: Vec<GenerationPin>,
    ) -> Result<()> {
        self.edit_cell(sheet_name, cell_ref, |c| c.pin_generations(pins))
    }

    /// Same-sheet reference cycles, one per cell that sits on one.
    pub fn find_cycles(&self, sheet_name: &str) -> Result<Vec<Vec<CellRef>>> {
        let sheet = self.sheet(sheet_name)?;
        let mut cycles: Vec<Vec<CellRef>> = Vec::new();
        for cell_ref in sheet.sorted_refs() {
            if cycles.iter().any(|c| c.contains(&cell_ref)) {
                continue;
            }
            if let Some(cycle) = detect_cycle(&cell_ref, &sheet)
                && cycle.first() == Some(&cell_ref)
            {
                cycles.push(cycle);
            }
        }
        Ok(cycles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DEFAULT_SHEET_NAME;
    use promptgrid_engine::engine::GenerationError;

    fn a1() -> CellRef {
        CellRef::new(0, 0)
    }

    #[test]
    fn test_parse_cell_ref() {
        assert_eq!(parse_cell_ref("b2").unwrap(), CellRef::new(1, 1));
        assert!(matches!(
            parse_cell_ref("2B"),
            Err(PromptgridError::InvalidCellId(_))
        ));
    }

    #[test]
    fn test_set_prompt_materializes_cell() {
        let mut doc = Document::new();
        assert!(doc.cell(DEFAULT_SHEET_NAME, &a1()).unwrap().is_none());

        let cycle = doc.set_prompt(DEFAULT_SHEET_NAME, &a1(), "hello").unwrap();
        assert!(cycle.is_none());
        assert!(doc.modified);
        assert_eq!(doc.cell(DEFAULT_SHEET_NAME, &a1()).unwrap().unwrap().prompt, "hello");
    }

    #[test]
    fn test_set_prompt_reports_cycle() {
        let mut doc = Document::new();
        let b1 = CellRef::new(1, 0);
        doc.set_prompt(DEFAULT_SHEET_NAME, &b1, "{{A1}}").unwrap();
        let cycle = doc.set_prompt(DEFAULT_SHEET_NAME, &a1(), "{{B1}}").unwrap();
        assert_eq!(cycle, Some(vec![a1(), b1.clone(), a1()]));

        // the edit is kept
        assert_eq!(doc.cell(DEFAULT_SHEET_NAME, &a1()).unwrap().unwrap().prompt, "{{B1}}");
        assert_eq!(doc.find_cycles(DEFAULT_SHEET_NAME).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_sheet() {
        let mut doc = Document::new();
        assert!(matches!(
            doc.set_model("Nope", &a1(), "m"),
            Err(PromptgridError::SheetNotFound(name)) if name == "Nope"
        ));
    }

    #[test]
    fn test_add_and_rename_sheet() {
        let mut doc = Document::new();
        let id = doc.add_sheet("Research").unwrap();
        assert_ne!(id, doc.sheet(DEFAULT_SHEET_NAME).unwrap().id);
        assert!(matches!(doc.add_sheet("Research"), Err(PromptgridError::Workbook(_))));

        doc.rename_sheet("Research", "Notes").unwrap();
        assert!(doc.sheet("Research").is_err());
        assert_eq!(doc.sheet("Notes").unwrap().id, id);
    }

    #[test]
    fn test_cell_settings() {
        let mut doc = Document::new();
        doc.set_model(DEFAULT_SHEET_NAME, &a1(), "gpt-4o").unwrap();
        doc.set_temperature(DEFAULT_SHEET_NAME, &a1(), 0.1).unwrap();
        doc.set_cell_prompt(DEFAULT_SHEET_NAME, &a1(), Some("Be brief: {input}"))
            .unwrap();
        doc.set_auto_run(DEFAULT_SHEET_NAME, &a1(), true).unwrap();
        doc.set_interval(DEFAULT_SHEET_NAME, &a1(), 60).unwrap();
        assert!(doc.set_temperature(DEFAULT_SHEET_NAME, &a1(), 7.0).is_err());

        let cell = doc.cell(DEFAULT_SHEET_NAME, &a1()).unwrap().unwrap();
        assert_eq!(cell.model, "gpt-4o");
        assert_eq!(cell.temperature, 0.1);
        assert_eq!(cell.cell_prompt.as_deref(), Some("Be brief: {input}"));
        assert!(cell.auto_run);
        assert_eq!(cell.interval, 60);

        doc.set_cell_prompt(DEFAULT_SHEET_NAME, &a1(), Some("  ")).unwrap();
        let cell = doc.cell(DEFAULT_SHEET_NAME, &a1()).unwrap().unwrap();
        assert_eq!(cell.cell_prompt, None);

        assert!(doc.clear_cell(DEFAULT_SHEET_NAME, &a1()).unwrap());
        assert!(!doc.clear_cell(DEFAULT_SHEET_NAME, &a1()).unwrap());
    }

    #[test]
    fn test_generation_log_ops() {
        let mut doc = Document::new();
        for output in ["g1", "g2"] {
            doc.append_generation(
                DEFAULT_SHEET_NAME,
                &a1(),
                Generation::new("p", "m", 0.5, output),
            )
            .unwrap();
        }
        let cell = doc.cell(DEFAULT_SHEET_NAME, &a1()).unwrap().unwrap();
        assert_eq!(cell.generations.len(), 2);
        assert_eq!(cell.output, "");

        doc.pin_generations(
            DEFAULT_SHEET_NAME,
            &CellRef::new(1, 0),
            vec![GenerationPin {
                cell: a1(),
                generation: 2,
            }],
        )
        .unwrap();

        let removed = doc.delete_generation(DEFAULT_SHEET_NAME, &a1(), 1).unwrap();
        assert_eq!(removed.output, "g2");
        assert_eq!(doc.cell(DEFAULT_SHEET_NAME, &a1()).unwrap().unwrap().output, "g1");

        assert!(matches!(
            doc.delete_generation(DEFAULT_SHEET_NAME, &a1(), 5),
            Err(PromptgridError::Generation(GenerationError::IndexOutOfRange {
                index: 5,
                len: 1
            }))
        ));
    }
}
