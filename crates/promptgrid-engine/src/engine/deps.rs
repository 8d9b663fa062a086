//! Reference token extraction.
//!
//! Prompts reference other cells with `{{...}}` tokens. Nested braces are not
//! supported and an unterminated `{{` is left alone as literal text.

use regex::Regex;
use std::sync::OnceLock;

use super::cell_ref::CellRef;
use super::reference::{Reference, classify};

pub(crate) fn token_re() -> &'static Regex {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    TOKEN_RE.get_or_init(|| {
        Regex::new(r"\{\{([^{}]*)\}\}").expect("reference token regex must compile")
    })
}

/// Extract the inner text of every `{{...}}` token, left to right.
///
/// Duplicates are kept: each occurrence is substituted on its own later.
pub fn parse_references(text: &str) -> Vec<String> {
    token_re()
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Parse and classify every reference in `text`.
pub fn extract_references(text: &str) -> Vec<Reference> {
    parse_references(text)
        .iter()
        .map(|token| classify(token))
        .collect()
}

/// Same-sheet cells a prompt depends on, in first-seen order without repeats.
///
/// `sheet_name` is the sheet the prompt lives on; references qualified with
/// that same name count as local.
pub fn extract_dependencies(text: &str, sheet_name: &str) -> Vec<CellRef> {
    let mut deps: Vec<CellRef> = Vec::new();
    for reference in extract_references(text) {
        if reference.is_cross_sheet(sheet_name) {
            continue;
        }
        if let Some(cell) = CellRef::from_str(&reference.cell_id)
            && !deps.contains(&cell)
        {
            deps.push(cell);
        }
    }
    deps
}

/// Whether `text` (living on `from_sheet`) references `cell` on `target_sheet`,
/// in any value-kind or generation-selector form.
pub fn references_cell(text: &str, from_sheet: &str, target_sheet: &str, cell: &CellRef) -> bool {
    let cell_id = cell.to_string();
    extract_references(text)
        .iter()
        .any(|r| r.cell_id == cell_id && r.targets_sheet(from_sheet, target_sheet))
}
