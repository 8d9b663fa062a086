//! Run progress notifications.
//!
//! The evaluator reports what it is doing through a [`Notifier`]. Calls are
//! fire-and-forget: a notifier must not block and can't influence the run.

use std::sync::Mutex;

use promptgrid_engine::engine::CellRef;

use crate::evaluator::RunState;

/// Steps reported while a cell runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStep {
    Dependencies,
    Assembling,
    Generating,
    Persisting,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Started {
        sheet: String,
        cell: CellRef,
    },
    Progress {
        sheet: String,
        cell: CellRef,
        step: RunStep,
    },
    CascadeStarted {
        sheet: String,
        cell: CellRef,
        dependents: Vec<(String, CellRef)>,
    },
    /// A run was refused because the cell is already upstream on this branch.
    CycleDetected {
        sheet: String,
        cell: CellRef,
        path: Vec<String>,
    },
    Error {
        sheet: String,
        cell: CellRef,
        message: String,
    },
    Completed {
        sheet: String,
        cell: CellRef,
        state: RunState,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: RunEvent);
}

/// Drops every event.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _event: RunEvent) {}
}

/// Forwards events to `tracing`.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: RunEvent) {
        match event {
            RunEvent::Started { sheet, cell } => {
                tracing::debug!(sheet = %sheet, cell = %cell, "run started")
            }
            RunEvent::Progress { sheet, cell, step } => {
                tracing::trace!(sheet = %sheet, cell = %cell, ?step, "run progress")
            }
            RunEvent::CascadeStarted {
                sheet,
                cell,
                dependents,
            } => tracing::info!(
                sheet = %sheet,
                cell = %cell,
                dependents = dependents.len(),
                "cascade started"
            ),
            RunEvent::CycleDetected { sheet, cell, path } => tracing::warn!(
                sheet = %sheet,
                cell = %cell,
                path = %path.join(" -> "),
                "circular reference, run skipped"
            ),
            RunEvent::Error {
                sheet,
                cell,
                message,
            } => tracing::warn!(sheet = %sheet, cell = %cell, message = %message, "run error"),
            RunEvent::Completed { sheet, cell, state } => {
                tracing::info!(sheet = %sheet, cell = %cell, ?state, "run completed")
            }
        }
    }
}

/// Keeps every event in memory, in order.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<RunEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Cells that reached `state`, as `Sheet!A1` strings in completion order.
    pub fn completed_with(&self, state: RunState) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                RunEvent::Completed {
                    sheet,
                    cell,
                    state: s,
                } if s == state => Some(format!("{}!{}", sheet, cell)),
                _ => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: RunEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
