use std::path::{Path, PathBuf};

use super::Document;
use crate::error::{PromptgridError, Result};
use crate::storage::{parse_workbook, write_workbook};

impl Document {
    /// Save to current file path.
    /// Returns the path saved to.
    pub fn save_file(&mut self) -> Result<PathBuf> {
        let Some(path) = self.file_path.clone() else {
            return Err(PromptgridError::NoFilePath);
        };
        write_workbook(&path, &self.workbook)?;
        self.modified = false;
        Ok(path)
    }

    /// Save to `path` and make it the current file path.
    pub fn save_as(&mut self, path: &Path) -> Result<()> {
        write_workbook(path, &self.workbook)?;
        self.file_path = Some(path.to_path_buf());
        self.modified = false;
        Ok(())
    }

    /// Load from file, replacing every sheet.
    ///
    /// The current workbook is only replaced once the file parsed, so a bad
    /// file leaves the document untouched.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let workbook = parse_workbook(path)?;
        tracing::debug!(path = %path.display(), sheets = workbook.len(), "loaded workbook");
        self.workbook = workbook;
        self.file_path = Some(path.to_path_buf());
        self.modified = false;
        Ok(())
    }
}
