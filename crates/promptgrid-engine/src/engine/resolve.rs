//! Reference resolution against the in-memory workbook.
//!
//! Resolution is a pure function of current workbook state. It never panics
//! and never fails in the `?` sense: a reference that can't produce content
//! yields a [`Diagnostic`], which callers either embed verbatim or act on.
//!
//! Sheets must be loaded before resolving against them; the async evaluator
//! takes care of that before calling in here.

use super::cell::Cell;
use super::cell_ref::CellRef;
use super::diagnostic::Diagnostic;
use super::format::{is_placeholder_output, strip_markup};
use super::generations::GENERATION_SEPARATOR;
use super::reference::{GenerationSelector, Reference, ValueKind, classify};
use super::sheet::Workbook;

/// Resolve `reference` as seen from the sheet named `current_sheet`.
pub fn resolve(
    reference: &Reference,
    workbook: &Workbook,
    current_sheet: &str,
) -> Result<String, Diagnostic> {
    let sheet_name = reference.sheet.as_deref().unwrap_or(current_sheet);
    let Some(sheet) = workbook.sheet_by_name(sheet_name) else {
        return Err(Diagnostic::SheetNotFound {
            sheet: sheet_name.to_string(),
        });
    };

    let cell = CellRef::from_str(&reference.cell_id).and_then(|cell_ref| sheet.cell(&cell_ref));
    let Some(cell) = cell else {
        return Err(Diagnostic::CellNotFound {
            cell: reference.cell_id.clone(),
            sheet: sheet.name.clone(),
        });
    };

    resolve_cell_value(reference, &cell)
}

/// Resolve against an already-located cell.
pub fn resolve_cell_value(reference: &Reference, cell: &Cell) -> Result<String, Diagnostic> {
    let cell_id = &reference.cell_id;

    if let Some(selected) = resolve_generations(cell_id, cell, reference.selector) {
        return selected;
    }

    if reference.kind == ValueKind::Prompt {
        return Ok(cell.prompt.clone());
    }

    let value = if cell.output.trim().is_empty() || is_placeholder_output(&cell.output) {
        if cell.prompt.trim().is_empty() {
            return Err(Diagnostic::EmptyContent {
                cell: cell_id.clone(),
            });
        }
        &cell.prompt
    } else {
        &cell.output
    };
    Ok(strip_markup(value))
}

fn resolve_generations(
    cell_id: &str,
    cell: &Cell,
    selector: GenerationSelector,
) -> Option<Result<String, Diagnostic>> {
    let available = cell.generations.len();
    let result = match selector {
        GenerationSelector::None => return None,
        _ if available == 0 => Err(Diagnostic::NoGenerations {
            cell: cell_id.to_string(),
        }),
        GenerationSelector::Single(idx) => cell
            .generations
            .get(idx)
            .map(|g| g.output.clone())
            .ok_or_else(|| Diagnostic::GenerationOutOfRange {
                cell: cell_id.to_string(),
                generation: idx + 1,
                available,
            }),
        GenerationSelector::Range { start, end } if start > end || end >= available => {
            Err(Diagnostic::GenerationRangeOutOfRange {
                cell: cell_id.to_string(),
                start: start + 1,
                end: end + 1,
                available,
            })
        }
        GenerationSelector::Range { start, end } => Ok(cell.generations[start..=end]
            .iter()
            .map(|g| g.output.as_str())
            .collect::<Vec<_>>()
            .join(GENERATION_SEPARATOR)),
    };
    Some(result)
}

/// Resolve and render diagnostics inline: the string a prompt receives.
pub fn resolve_to_text(reference: &Reference, workbook: &Workbook, current_sheet: &str) -> String {
    match resolve(reference, workbook, current_sheet) {
        Ok(value) => value,
        Err(diagnostic) => diagnostic.to_string(),
    }
}

/// Classify and resolve a raw token in one step.
pub fn resolve_token(token: &str, workbook: &Workbook, current_sheet: &str) -> String {
    resolve_to_text(&classify(token), workbook, current_sheet)
}
