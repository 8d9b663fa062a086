use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

use promptgrid_engine::engine::{
    Cell, CellKey, CellRef, Diagnostic, FORMULA_ERROR, Generation, Reference, RunPath, Sheet,
    ValueKind, apply_template, attach_image_url, contains_image_url, extract_dependencies,
    extract_references, find_image_url, is_image_to_video_model, is_placeholder_output,
    prepend_block, substitute_references,
};

use super::{DiagnosticPolicy, Evaluator, RunState};
use crate::notify::{RunEvent, RunStep};
use crate::provider::{GenerationRequest, ProviderError};

pub(super) type RunFuture<'a> = Pin<Box<dyn Future<Output = RunState> + Send + 'a>>;

/// State shared by every run started from one trigger.
#[derive(Default)]
pub(super) struct RunContext {
    /// Cells executing on the current branch.
    path: RunPath,
    /// Cells that already finished during this trigger. Only the dependency
    /// pre-pass consults it; cascades may run a cell again.
    completed: HashSet<CellKey>,
}

/// Same-sheet dependencies that failed during this run, by cell.
type FailedDependencies = HashMap<CellRef, Diagnostic>;

impl Evaluator {
    /// Run a cell and everything it needs, then cascade into auto-run
    /// dependents. Returns the cell's terminal state.
    pub async fn run_cell(&self, sheet_name: &str, cell: &CellRef) -> RunState {
        let Some(sheet) = self.workbook.sheet_by_name(sheet_name) else {
            tracing::warn!(sheet = %sheet_name, cell = %cell, "run requested on unknown sheet");
            return RunState::Failed;
        };
        self.run_key(CellKey::new(&sheet.id, cell.clone())).await
    }

    pub async fn run_key(&self, key: CellKey) -> RunState {
        let mut ctx = RunContext::default();
        self.run_node(key, &mut ctx).await
    }

    pub(super) fn run_node<'a>(&'a self, key: CellKey, ctx: &'a mut RunContext) -> RunFuture<'a> {
        Box::pin(async move {
            let Some(sheet) = self.workbook.sheet_by_id(&key.sheet_id) else {
                tracing::warn!(sheet_id = %key.sheet_id, cell = %key.cell, "sheet no longer exists");
                return RunState::Failed;
            };

            if ctx.path.contains(&key) {
                let path = ctx
                    .path
                    .cycle_through(&key)
                    .iter()
                    .chain(std::iter::once(&key))
                    .map(|k| self.display_key(k))
                    .collect();
                self.notifier.notify(RunEvent::CycleDetected {
                    sheet: sheet.name.clone(),
                    cell: key.cell.clone(),
                    path,
                });
                self.set_state(&sheet, &key, RunState::CycleAborted);
                return RunState::CycleAborted;
            }

            if !self.run_guard.try_claim(&key) {
                tracing::debug!(sheet = %sheet.name, cell = %key.cell, "already running, trigger coalesced");
                return RunState::Coalesced;
            }

            let state = loop {
                ctx.path.enter(key.clone());
                let state = self.execute(&sheet, &key, ctx).await;
                ctx.path.leave(&key);
                if !self.run_guard.finish(&key) {
                    break state;
                }
                tracing::debug!(sheet = %sheet.name, cell = %key.cell, "running coalesced follow-up");
            };
            ctx.completed.insert(key);
            state
        })
    }

    async fn execute(&self, sheet: &Sheet, key: &CellKey, ctx: &mut RunContext) -> RunState {
        let cell_ref = &key.cell;
        self.set_state(sheet, key, RunState::Running);
        self.notifier.notify(RunEvent::Started {
            sheet: sheet.name.clone(),
            cell: cell_ref.clone(),
        });

        // Nothing is written into a sheet that couldn't be loaded: the
        // stored cells would lose to it on the next load.
        if let Err(diagnostic) = self.ensure_loaded(sheet).await {
            self.notify_error(sheet, cell_ref, diagnostic.to_string());
            self.set_state(sheet, key, RunState::Failed);
            return RunState::Failed;
        }

        let cell = sheet.cell_or_default(cell_ref);
        if let Some(expression) = cell.formula() {
            let value = self.formulas.evaluate(expression);
            let state = if value == FORMULA_ERROR {
                RunState::Failed
            } else {
                RunState::Succeeded
            };
            let updated = sheet.update_cell(cell_ref, |c| {
                c.output = value;
                c.clone()
            });
            self.persist(sheet, cell_ref, &updated).await;
            self.set_state(sheet, key, state);
            return state;
        }

        self.progress(sheet, cell_ref, RunStep::Dependencies);
        let failed = self.run_dependencies(sheet, &cell, ctx).await;

        self.progress(sheet, cell_ref, RunStep::Assembling);
        let cell = sheet.cell_or_default(cell_ref);
        let prompt = match self.assemble(sheet, &cell, &failed).await {
            Ok(prompt) => prompt,
            Err(diagnostic) => {
                let state = self
                    .record_failure(sheet, key, &diagnostic.to_string())
                    .await;
                self.cascade(sheet, key, ctx).await;
                return state;
            }
        };

        self.progress(sheet, cell_ref, RunStep::Generating);
        let permit = match self.gate.try_admit() {
            Ok(permit) => permit,
            Err(err) => {
                self.notify_error(sheet, cell_ref, err.to_string());
                self.set_state(sheet, key, RunState::Busy);
                return RunState::Busy;
            }
        };
        let (model, temperature) = self.config.model_settings(&cell);
        let request = GenerationRequest {
            prompt: prompt.clone(),
            model: model.clone(),
            temperature,
        };
        let timeout = self.config.provider_timeout;
        let result = match tokio::time::timeout(timeout, self.provider.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout.as_secs())),
        };
        drop(permit);

        let state = match result {
            Ok(content) => {
                self.progress(sheet, cell_ref, RunStep::Persisting);
                let generation = Generation::new(&prompt, &model, temperature, &content);
                let updated = sheet.update_cell(cell_ref, |c| {
                    c.record_generation(generation);
                    c.clone()
                });
                self.persist(sheet, cell_ref, &updated).await;
                self.set_state(sheet, key, RunState::Succeeded);
                RunState::Succeeded
            }
            Err(err) => self.record_failure(sheet, key, &err.to_string()).await,
        };

        self.cascade(sheet, key, ctx).await;
        state
    }

    /// Whether `cell` has an output a dependent can use without running it.
    fn has_materialized_output(&self, key: &CellKey, cell: &Cell) -> bool {
        !is_placeholder_output(&cell.output) && self.state_of(key) != RunState::Failed
    }

    /// Run same-sheet dependencies that have nothing to offer yet.
    ///
    /// Returns the dependencies that failed or had to be given a diagnostic.
    async fn run_dependencies(
        &self,
        sheet: &Sheet,
        cell: &Cell,
        ctx: &mut RunContext,
    ) -> FailedDependencies {
        let mut failed = FailedDependencies::new();
        for dep_ref in extract_dependencies(&cell.prompt, &sheet.name) {
            let dep_key = CellKey::new(&sheet.id, dep_ref.clone());
            if ctx.completed.contains(&dep_key) {
                if self.state_of(&dep_key) == RunState::Failed {
                    failed.insert(dep_ref.clone(), upstream_failed(&dep_ref));
                }
                continue;
            }
            let diagnostic = match sheet.cell(&dep_ref) {
                Some(dep) if self.has_materialized_output(&dep_key, &dep) => continue,
                Some(dep) if dep.has_prompt() => {
                    if self.run_node(dep_key, ctx).await == RunState::Failed {
                        failed.insert(dep_ref.clone(), upstream_failed(&dep_ref));
                    }
                    continue;
                }
                Some(_) => Diagnostic::NoPrompt {
                    cell: dep_ref.to_string(),
                },
                None => Diagnostic::CellNotFound {
                    cell: dep_ref.to_string(),
                    sheet: sheet.name.clone(),
                },
            };
            tracing::debug!(sheet = %sheet.name, cell = %dep_ref, %diagnostic, "dependency has no prompt");
            let updated = sheet.update_cell(&dep_ref, |c| {
                c.output = diagnostic.to_string();
                c.clone()
            });
            self.persist(sheet, &dep_ref, &updated).await;
            self.states.insert(dep_key, RunState::Failed);
            failed.insert(dep_ref, diagnostic);
        }
        failed
    }

    /// Build the text sent to the provider.
    ///
    /// Under [`DiagnosticPolicy::FailDependent`] the first unresolvable or
    /// failed reference is returned as the error instead.
    async fn assemble(
        &self,
        sheet: &Sheet,
        cell: &Cell,
        failed: &FailedDependencies,
    ) -> Result<String, Diagnostic> {
        let fail_fast = self.config.diagnostic_policy == DiagnosticPolicy::FailDependent;
        let references = extract_references(&cell.prompt);
        let mut values = Vec::with_capacity(references.len());
        for reference in &references {
            let value = match self.resolve_reference(reference, &sheet.name).await {
                Ok(value) => value,
                Err(diagnostic) if fail_fast => return Err(diagnostic),
                Err(diagnostic) => diagnostic.to_string(),
            };
            if fail_fast && let Some(diagnostic) = self.failed_reference(sheet, reference, failed) {
                return Err(diagnostic);
            }
            values.push(value);
        }

        let body = substitute_references(&cell.prompt, &values);
        let mut prompt = match cell.render_pins(&sheet.grid) {
            Some(pins) => prepend_block(&pins, &body),
            None => match cell.cell_prompt.as_deref() {
                Some(template) if !template.trim().is_empty() => apply_template(template, &body),
                _ => body,
            },
        };

        let (model, _) = self.config.model_settings(cell);
        if is_image_to_video_model(&model, &self.config.image_to_video_models)
            && !contains_image_url(&prompt)
        {
            match self.find_source_image(sheet, cell, &references) {
                Some(url) => prompt = attach_image_url(&url, &prompt),
                None => tracing::debug!(model = %model, "no source image for image-to-video run"),
            }
        }
        Ok(prompt)
    }

    /// The failure behind an output reference, if its target failed.
    fn failed_reference(
        &self,
        sheet: &Sheet,
        reference: &Reference,
        failed: &FailedDependencies,
    ) -> Option<Diagnostic> {
        if reference.kind == ValueKind::Prompt {
            return None;
        }
        let cell_ref = CellRef::from_str(&reference.cell_id)?;
        let cross_sheet = reference.is_cross_sheet(&sheet.name);
        if !cross_sheet && let Some(diagnostic) = failed.get(&cell_ref) {
            return Some(diagnostic.clone());
        }
        let target = self
            .workbook
            .sheet_by_name(reference.sheet.as_deref().unwrap_or(&sheet.name))?;
        let key = CellKey::new(&target.id, cell_ref);
        if self.state_of(&key) != RunState::Failed {
            return None;
        }
        let cell = if cross_sheet {
            self.display_key(&key)
        } else {
            key.cell.to_string()
        };
        Some(Diagnostic::UpstreamFailed { cell })
    }

    /// Most recent image among referenced cells' generations, then the cell's own.
    fn find_source_image(
        &self,
        sheet: &Sheet,
        cell: &Cell,
        references: &[Reference],
    ) -> Option<String> {
        let newest_image =
            |c: &Cell| c.generations.iter().rev().find_map(|g| find_image_url(&g.output));

        for reference in references {
            let target = reference.sheet.as_deref().unwrap_or(&sheet.name);
            let referenced = self
                .workbook
                .sheet_by_name(target)
                .zip(CellRef::from_str(&reference.cell_id))
                .and_then(|(target_sheet, cell_ref)| target_sheet.cell(&cell_ref));
            if let Some(url) = referenced.as_ref().and_then(newest_image) {
                return Some(url);
            }
        }
        newest_image(cell).or_else(|| find_image_url(&cell.output))
    }

    async fn record_failure(&self, sheet: &Sheet, key: &CellKey, message: &str) -> RunState {
        let output = format!("Error: {}", message);
        let updated = sheet.update_cell(&key.cell, |c| {
            c.output = output;
            c.clone()
        });
        self.persist(sheet, &key.cell, &updated).await;
        self.notify_error(sheet, &key.cell, message.to_string());
        self.set_state(sheet, key, RunState::Failed);
        RunState::Failed
    }

    /// Write a cell back. Store failures are logged and otherwise ignored.
    pub(super) async fn persist(&self, sheet: &Sheet, cell_ref: &CellRef, cell: &Cell) {
        if let Err(err) = self.store.save_cell(&sheet.id, cell_ref, cell).await {
            tracing::warn!(sheet = %sheet.name, cell = %cell_ref, error = %err, "failed to persist cell");
        }
    }

    fn progress(&self, sheet: &Sheet, cell: &CellRef, step: RunStep) {
        self.notifier.notify(RunEvent::Progress {
            sheet: sheet.name.clone(),
            cell: cell.clone(),
            step,
        });
    }

    fn notify_error(&self, sheet: &Sheet, cell: &CellRef, message: String) {
        self.notifier.notify(RunEvent::Error {
            sheet: sheet.name.clone(),
            cell: cell.clone(),
            message,
        });
    }

    fn display_key(&self, key: &CellKey) -> String {
        match self.workbook.sheet_by_id(&key.sheet_id) {
            Some(sheet) => format!("{}!{}", sheet.name, key.cell),
            None => format!("{}!{}", key.sheet_id, key.cell),
        }
    }
}

fn upstream_failed(cell: &CellRef) -> Diagnostic {
    Diagnostic::UpstreamFailed {
        cell: cell.to_string(),
    }
}
