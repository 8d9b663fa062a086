//! Circular reference detection for prompt cells.
//!
//! Two tools live here:
//!
//! - [`detect_cycle`] walks same-sheet references statically (depth-first,
//!   with an on-stack set) to report a cycle when a prompt is edited.
//! - [`RunPath`] is the on-stack discipline used while executing: a cell is
//!   pushed when its run starts and popped when it ends, so only cells that
//!   are genuinely upstream on the current branch count as a cycle.

use std::collections::HashSet;

use super::CellRef;
use super::deps::extract_dependencies;
use super::sheet::{CellKey, Sheet};

/// Detect a reference cycle reachable from `start` within one sheet.
/// Returns Some(cycle_path) if a cycle is found, None otherwise.
pub fn detect_cycle(start: &CellRef, sheet: &Sheet) -> Option<Vec<CellRef>> {
    let mut visiting = HashSet::new();
    let mut done = HashSet::new();
    let mut path = Vec::new();

    if detect_cycle_dfs(start, sheet, &mut visiting, &mut done, &mut path) {
        Some(path)
    } else {
        None
    }
}

fn detect_cycle_dfs(
    current: &CellRef,
    sheet: &Sheet,
    visiting: &mut HashSet<CellRef>,
    done: &mut HashSet<CellRef>,
    path: &mut Vec<CellRef>,
) -> bool {
    if visiting.contains(current) {
        path.push(current.clone());
        return true;
    }
    if done.contains(current) {
        return false;
    }

    let deps = match sheet.grid.get(current) {
        Some(entry) => extract_dependencies(&entry.prompt, &sheet.name),
        None => return false,
    };

    visiting.insert(current.clone());
    path.push(current.clone());

    for dep in &deps {
        if detect_cycle_dfs(dep, sheet, visiting, done, path) {
            return true;
        }
    }

    path.pop();
    visiting.remove(current);
    done.insert(current.clone());
    false
}

/// Cells currently executing on one branch of a run, outermost first.
#[derive(Clone, Debug, Default)]
pub struct RunPath {
    stack: Vec<CellKey>,
    on_stack: HashSet<CellKey>,
}

impl RunPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &CellKey) -> bool {
        self.on_stack.contains(key)
    }

    /// Push `key`. Returns false (and leaves the path untouched) if it is
    /// already on the path.
    pub fn enter(&mut self, key: CellKey) -> bool {
        if !self.on_stack.insert(key.clone()) {
            return false;
        }
        self.stack.push(key);
        true
    }

    /// Pop `key`, which must be the innermost entry.
    pub fn leave(&mut self, key: &CellKey) {
        debug_assert_eq!(self.stack.last(), Some(key), "run path popped out of order");
        if self.stack.last() == Some(key) {
            self.stack.pop();
            self.on_stack.remove(key);
        }
    }

    /// The portion of the path from `key` to the innermost cell, i.e. the
    /// cycle that re-entering `key` would close.
    pub fn cycle_through(&self, key: &CellKey) -> Vec<CellKey> {
        match self.stack.iter().position(|k| k == key) {
            Some(pos) => self.stack[pos..].to_vec(),
            None => Vec::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}
