//! Cell execution.
//!
//! An [`Evaluator`] runs prompt cells: it executes same-sheet dependencies
//! first, assembles the final prompt from resolved references, calls the
//! generation provider, records the generation, persists the cell, and then
//! cascades into auto-run cells that reference it.
//!
//! Runs never fail with an error. Every problem ends up as data: a
//! diagnostic substituted into a prompt, an `Error: ...` output, or a
//! terminal [`RunState`].

mod cascade;
mod run;
mod schedule;

#[cfg(test)]
mod tests;

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use promptgrid_engine::engine::{
    Cell, CellKey, CellRef, DEFAULT_MODEL, DEFAULT_TEMPERATURE, Diagnostic, FormulaEvaluator,
    Reference, RhaiFormulaEvaluator, Sheet, Workbook, classify, resolve,
};

use crate::gate::{AdmissionGate, CellRunGuard};
use crate::notify::{Notifier, RunEvent, TracingNotifier};
use crate::provider::GenerationProvider;
use crate::store::CellStore;

pub use schedule::IntervalScheduler;

/// Where a cell is in its run lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Succeeded,
    Failed,
    /// The cell was already upstream on the current branch.
    CycleAborted,
    /// The provider admission gate was full; nothing changed, retry later.
    Busy,
    /// The cell was already running for another trigger, which will run it
    /// once more when it finishes.
    Coalesced,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Idle | RunState::Running)
    }
}

/// What to do when a reference resolves to a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagnosticPolicy {
    /// Substitute the diagnostic text into the prompt and carry on.
    #[default]
    Propagate,
    /// Fail the dependent cell without calling the provider.
    FailDependent,
}

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Model used for cells whose model is blank.
    pub default_model: String,
    /// Temperature used for cells whose temperature isn't a usable number.
    pub default_temperature: f32,
    /// Upper bound on a single provider call.
    pub provider_timeout: Duration,
    pub diagnostic_policy: DiagnosticPolicy,
    /// Substrings identifying image-to-video model ids.
    pub image_to_video_models: Vec<String>,
    /// Load sheets that aren't in memory yet when looking for dependents.
    pub cascade_loads_sheets: bool,
}

impl EvaluatorConfig {
    /// The model and temperature a run of `cell` should use.
    pub fn model_settings(&self, cell: &Cell) -> (String, f32) {
        let model = match cell.model.trim() {
            "" => self.default_model.clone(),
            model => model.to_string(),
        };
        let temperature = if cell.temperature.is_finite() && cell.temperature >= 0.0 {
            cell.temperature
        } else {
            self.default_temperature
        };
        (model, temperature)
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            default_temperature: DEFAULT_TEMPERATURE,
            provider_timeout: Duration::from_secs(30),
            diagnostic_policy: DiagnosticPolicy::Propagate,
            image_to_video_models: vec![
                "image-to-video".to_string(),
                "img2vid".to_string(),
                "i2v".to_string(),
            ],
            cascade_loads_sheets: true,
        }
    }
}

/// Runs cells of one workbook.
///
/// The evaluator owns its admission gate and run guard, so independent
/// evaluators never interfere with each other. Share one behind an `Arc`
/// to share the gate.
pub struct Evaluator {
    workbook: Workbook,
    store: Arc<dyn CellStore>,
    provider: Arc<dyn GenerationProvider>,
    formulas: Arc<dyn FormulaEvaluator>,
    notifier: Arc<dyn Notifier>,
    gate: AdmissionGate,
    run_guard: CellRunGuard,
    states: DashMap<CellKey, RunState>,
    config: EvaluatorConfig,
}

impl Evaluator {
    pub fn new(
        workbook: Workbook,
        store: Arc<dyn CellStore>,
        provider: Arc<dyn GenerationProvider>,
    ) -> Self {
        Self {
            workbook,
            store,
            provider,
            formulas: Arc::new(RhaiFormulaEvaluator::new()),
            notifier: Arc::new(TracingNotifier),
            gate: AdmissionGate::new(),
            run_guard: CellRunGuard::new(),
            states: DashMap::new(),
            config: EvaluatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EvaluatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_formulas(mut self, formulas: Arc<dyn FormulaEvaluator>) -> Self {
        self.formulas = formulas;
        self
    }

    /// Use a gate shared with other evaluators.
    pub fn with_gate(mut self, gate: AdmissionGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn workbook(&self) -> &Workbook {
        &self.workbook
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Last known run state of a cell; `Idle` if it never ran.
    pub fn state_of(&self, key: &CellKey) -> RunState {
        self.states
            .get(key)
            .map(|s| *s.value())
            .unwrap_or(RunState::Idle)
    }

    /// Run state of a cell addressed by sheet name.
    pub fn state_of_cell(&self, sheet_name: &str, cell: &CellRef) -> RunState {
        match self.workbook.sheet_by_name(sheet_name) {
            Some(sheet) => self.state_of(&CellKey::new(&sheet.id, cell.clone())),
            None => RunState::Idle,
        }
    }

    /// Load a sheet's cells from the store if they aren't in memory yet.
    pub async fn ensure_loaded(&self, sheet: &Sheet) -> Result<(), Diagnostic> {
        if sheet.is_loaded() {
            return Ok(());
        }
        tracing::debug!(sheet = %sheet.name, "loading sheet cells");
        match self.store.load_all_cells(&sheet.id).await {
            Ok(cells) => {
                sheet.load_cells(cells);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(sheet = %sheet.name, error = %err, "failed to load sheet");
                Err(Diagnostic::SheetLoadFailed {
                    sheet: sheet.name.clone(),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Resolve a reference as seen from `sheet_name`, loading the target
    /// sheet first if needed.
    pub async fn resolve_reference(
        &self,
        reference: &Reference,
        sheet_name: &str,
    ) -> Result<String, Diagnostic> {
        let target = reference.sheet.as_deref().unwrap_or(sheet_name);
        if let Some(sheet) = self.workbook.sheet_by_name(target) {
            self.ensure_loaded(&sheet).await?;
        }
        resolve(reference, &self.workbook, sheet_name)
    }

    /// Resolve a raw token, rendering any diagnostic inline.
    pub async fn resolve_token(&self, token: &str, sheet_name: &str) -> String {
        match self.resolve_reference(&classify(token), sheet_name).await {
            Ok(value) => value,
            Err(diagnostic) => diagnostic.to_string(),
        }
    }

    fn set_state(&self, sheet: &Sheet, key: &CellKey, state: RunState) {
        self.states.insert(key.clone(), state);
        if state.is_terminal() {
            self.notifier.notify(RunEvent::Completed {
                sheet: sheet.name.clone(),
                cell: key.cell.clone(),
                state,
            });
        }
    }
}
