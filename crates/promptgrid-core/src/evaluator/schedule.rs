//! Interval-driven runs.
//!
//! Cells with a non-zero `interval` are re-run every `interval` seconds.
//! Scheduled runs go through [`Evaluator::run_key`] like any other trigger,
//! so they coalesce with in-flight runs and respect the admission gate.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use promptgrid_engine::engine::{CellKey, CellRef, Sheet};

use super::Evaluator;

pub struct IntervalScheduler {
    evaluator: Arc<Evaluator>,
    tasks: DashMap<CellKey, JoinHandle<()>>,
}

impl IntervalScheduler {
    pub fn new(evaluator: Arc<Evaluator>) -> Self {
        Self {
            evaluator,
            tasks: DashMap::new(),
        }
    }

    /// Run `cell` every `every`, replacing any existing schedule for it.
    /// The first run happens one period from now. Must be called from
    /// inside a tokio runtime.
    pub fn schedule(&self, sheet: &Sheet, cell: CellRef, every: Duration) {
        let key = CellKey::new(&sheet.id, cell);
        let evaluator = Arc::clone(&self.evaluator);
        let task_key = key.clone();
        let sheet_name = sheet.name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let state = evaluator.run_key(task_key.clone()).await;
                tracing::debug!(sheet = %sheet_name, cell = %task_key.cell, ?state, "interval run finished");
            }
        });

        if let Some(previous) = self.tasks.insert(key, handle) {
            previous.abort();
        }
    }

    pub fn cancel(&self, key: &CellKey) -> bool {
        match self.tasks.remove(key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Bring schedules in line with the cells' `interval` settings across
    /// every loaded sheet. Returns the number of scheduled cells.
    pub fn sync(&self) -> usize {
        let mut wanted = Vec::new();
        for sheet in self.evaluator.workbook().sheets() {
            if !sheet.is_loaded() {
                continue;
            }
            for cell_ref in sheet.sorted_refs() {
                if let Some(cell) = sheet.cell(&cell_ref)
                    && cell.interval > 0
                    && cell.has_prompt()
                {
                    wanted.push((sheet.clone(), cell_ref, cell.interval));
                }
            }
        }

        let keep: Vec<CellKey> = wanted
            .iter()
            .map(|(sheet, cell_ref, _)| CellKey::new(&sheet.id, cell_ref.clone()))
            .collect();
        let stale: Vec<CellKey> = self
            .tasks
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| !keep.contains(key))
            .collect();
        for key in stale {
            self.cancel(&key);
        }

        for (sheet, cell_ref, seconds) in wanted {
            tracing::debug!(sheet = %sheet.name, cell = %cell_ref, seconds, "scheduling interval run");
            self.schedule(&sheet, cell_ref, Duration::from_secs(seconds));
        }
        self.tasks.len()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn shutdown(&self) {
        let keys: Vec<CellKey> = self.tasks.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.cancel(&key);
        }
    }
}

impl Drop for IntervalScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
