//! Reference classification.
//!
//! A reference token is the text between `{{` and `}}`:
//!
//! ```text
//! [prompt:|output:]? [SHEET!]? CELLID [ -N | :N | :N-M ]?
//! ```
//!
//! Generation numbers are 1-based in the token and 0-based once classified.
//! Classification is permissive: a suffix that doesn't parse as a generation
//! selector stays attached to the cell id, which then fails lookup at
//! resolution time instead of here.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Which value of the target cell a reference reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Prompt,
    #[default]
    Output,
}

/// Which generation(s) of the target cell a reference reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum GenerationSelector {
    #[default]
    None,
    /// 0-based index.
    Single(usize),
    /// 0-based inclusive bounds.
    Range { start: usize, end: usize },
}

/// A classified reference token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Target sheet name; `None` means the evaluating sheet.
    pub sheet: Option<String>,
    pub cell_id: String,
    pub kind: ValueKind,
    pub selector: GenerationSelector,
}

impl Reference {
    /// Whether this reference targets `sheet_name` when evaluated from `from_sheet`.
    pub fn targets_sheet(&self, from_sheet: &str, sheet_name: &str) -> bool {
        self.sheet.as_deref().unwrap_or(from_sheet) == sheet_name
    }

    pub fn is_cross_sheet(&self, from_sheet: &str) -> bool {
        !self.targets_sheet(from_sheet, from_sheet)
    }
}

fn selector_re() -> &'static Regex {
    static SELECTOR_RE: OnceLock<Regex> = OnceLock::new();
    SELECTOR_RE.get_or_init(|| {
        Regex::new(r"^(?<id>[^:-]+)(?:-(?<legacy>[0-9]+)|:(?<start>[0-9]+)(?:-(?<end>[0-9]+))?)$")
            .expect("generation selector regex must compile")
    })
}

/// Classify one reference token.
///
/// Precedence is fixed: value-kind prefix, then sheet qualifier (split on the
/// first `!`), then generation selector on what remains.
pub fn classify(token: &str) -> Reference {
    let mut rest = token.trim();

    let mut kind = ValueKind::Output;
    if let Some(stripped) = rest.strip_prefix("prompt:") {
        kind = ValueKind::Prompt;
        rest = stripped;
    } else if let Some(stripped) = rest.strip_prefix("output:") {
        rest = stripped;
    }

    let (sheet, cell_expr) = match rest.split_once('!') {
        Some((sheet, cell)) => (Some(sheet.trim().to_string()), cell.trim()),
        None => (None, rest),
    };

    let (cell_id, selector) = split_selector(cell_expr);
    Reference {
        sheet,
        cell_id,
        kind,
        selector,
    }
}

fn split_selector(expr: &str) -> (String, GenerationSelector) {
    let unparsed = || (expr.to_string(), GenerationSelector::None);
    let Some(caps) = selector_re().captures(expr) else {
        return unparsed();
    };
    let one_based = |name: &str| -> Option<usize> {
        caps.name(name)?.as_str().parse::<usize>().ok()?.checked_sub(1)
    };

    let selector = if caps.name("legacy").is_some() {
        one_based("legacy").map(GenerationSelector::Single)
    } else if caps.name("end").is_some() {
        match (one_based("start"), one_based("end")) {
            (Some(start), Some(end)) => Some(GenerationSelector::Range { start, end }),
            _ => None,
        }
    } else {
        one_based("start").map(GenerationSelector::Single)
    };

    match selector {
        Some(selector) => (caps["id"].to_string(), selector),
        None => unparsed(),
    }
}

/// Renders the reference back to its current wire form (`:N` for singles).
impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == ValueKind::Prompt {
            write!(f, "prompt:")?;
        }
        if let Some(sheet) = &self.sheet {
            write!(f, "{}!", sheet)?;
        }
        write!(f, "{}", self.cell_id)?;
        match self.selector {
            GenerationSelector::None => Ok(()),
            GenerationSelector::Single(idx) => write!(f, ":{}", idx + 1),
            GenerationSelector::Range { start, end } => write!(f, ":{}-{}", start + 1, end + 1),
        }
    }
}
