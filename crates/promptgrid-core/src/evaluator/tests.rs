use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use promptgrid_engine::engine::{Cell, CellRef, Generation, GenerationPin, Sheet, Workbook};

use super::*;
use crate::notify::{RecordingNotifier, RunEvent};
use crate::provider::{GenerationProvider, GenerationRequest, ProviderError};
use crate::store::{CellStore, InMemoryCellStore, StoreError};

type Reply = Box<dyn Fn(&GenerationRequest) -> Result<String, ProviderError> + Send + Sync>;

/// Provider that answers from a closure and records every request.
struct ScriptedProvider {
    reply: Reply,
    delay: Duration,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedProvider {
    fn new(
        reply: impl Fn(&GenerationRequest) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            reply: Box::new(reply),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Exact-prompt answers; anything else gets "ok".
    fn answering(pairs: &[(&str, &str)]) -> Self {
        let answers: HashMap<String, String> = pairs
            .iter()
            .map(|(p, a)| (p.to_string(), a.to_string()))
            .collect();
        Self::new(move |req| {
            Ok(answers
                .get(&req.prompt)
                .cloned()
                .unwrap_or_else(|| "ok".to_string()))
        })
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.prompt.clone())
            .collect()
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.reply)(&request)
    }
}

/// In-memory store that counts sheet loads and can be told to fail them.
#[derive(Default)]
struct CountingStore {
    inner: InMemoryCellStore,
    loads: Mutex<Vec<String>>,
    failing_sheet: Mutex<Option<String>>,
}

impl CountingStore {
    fn loads_of(&self, sheet_id: &str) -> usize {
        self.loads
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == sheet_id)
            .count()
    }

    fn fail_loads_of(&self, sheet_id: &str) {
        *self.failing_sheet.lock().unwrap() = Some(sheet_id.to_string());
    }
}

#[async_trait]
impl CellStore for CountingStore {
    async fn get_cell(&self, sheet_id: &str, cell: &CellRef) -> Result<Option<Cell>, StoreError> {
        self.inner.get_cell(sheet_id, cell).await
    }

    async fn load_all_cells(&self, sheet_id: &str) -> Result<HashMap<CellRef, Cell>, StoreError> {
        self.loads.lock().unwrap().push(sheet_id.to_string());
        if self.failing_sheet.lock().unwrap().as_deref() == Some(sheet_id) {
            return Err(StoreError::Io("disk gone".to_string()));
        }
        self.inner.load_all_cells(sheet_id).await
    }

    async fn save_cell(
        &self,
        sheet_id: &str,
        cell_ref: &CellRef,
        cell: &Cell,
    ) -> Result<(), StoreError> {
        self.inner.save_cell(sheet_id, cell_ref, cell).await
    }
}

struct Harness {
    evaluator: Evaluator,
    provider: Arc<ScriptedProvider>,
    store: Arc<CountingStore>,
    notifier: Arc<RecordingNotifier>,
}

impl Harness {
    fn new(workbook: Workbook, provider: ScriptedProvider) -> Self {
        Self::with_config(workbook, provider, EvaluatorConfig::default())
    }

    fn with_config(workbook: Workbook, provider: ScriptedProvider, config: EvaluatorConfig) -> Self {
        let provider = Arc::new(provider);
        let store = Arc::new(CountingStore::default());
        let notifier = Arc::new(RecordingNotifier::new());
        let evaluator = Evaluator::new(
            workbook,
            store.clone() as Arc<dyn CellStore>,
            provider.clone() as Arc<dyn GenerationProvider>,
        )
        .with_config(config)
        .with_notifier(notifier.clone());
        Self {
            evaluator,
            provider,
            store,
            notifier,
        }
    }

    fn cell(&self, sheet: &str, id: &str) -> Cell {
        self.evaluator
            .workbook()
            .sheet_by_name(sheet)
            .unwrap()
            .cell(&cell(id))
            .unwrap()
    }

    fn started(&self) -> Vec<String> {
        self.notifier
            .events()
            .into_iter()
            .filter_map(|event| match event {
                RunEvent::Started { sheet, cell } => Some(format!("{}!{}", sheet, cell)),
                _ => None,
            })
            .collect()
    }
}

fn cell(id: &str) -> CellRef {
    CellRef::from_str(id).unwrap()
}

fn auto(prompt: &str) -> Cell {
    Cell {
        auto_run: true,
        ..Cell::new_prompt(prompt)
    }
}

fn with_generations(prompt: &str, outputs: &[&str]) -> Cell {
    let mut c = Cell::new_prompt(prompt);
    for output in outputs {
        c.record_generation(Generation::new(prompt, "m", 0.5, output));
    }
    c
}

fn sheet(id: &str, name: &str, cells: Vec<(&str, Cell)>) -> Sheet {
    let sheet = Sheet::new(id, name);
    for (id, c) in cells {
        sheet.set_cell(cell(id), c);
    }
    sheet
}

fn workbook(sheets: Vec<Sheet>) -> Workbook {
    let workbook = Workbook::new();
    for s in sheets {
        workbook.add_sheet(s).unwrap();
    }
    workbook
}

#[tokio::test]
async fn test_simple_substitution() {
    let wb = workbook(vec![sheet(
        "s1",
        "Sheet1",
        vec![
            ("A1", Cell::with_output("What is the capital of France?", "Paris")),
            ("B1", Cell::new_prompt("Capital: {{A1}}")),
        ],
    )]);
    let h = Harness::new(wb, ScriptedProvider::answering(&[]));

    let state = h.evaluator.run_cell("Sheet1", &cell("B1")).await;

    assert_eq!(state, RunState::Succeeded);
    assert_eq!(h.provider.prompts(), vec!["Capital: Paris"]);
    let b1 = h.cell("Sheet1", "B1");
    assert_eq!(b1.output, "ok");
    assert_eq!(b1.generations.len(), 1);
    assert_eq!(b1.generations[0].prompt, "Capital: Paris");
    assert_eq!(h.store.inner.get("s1", &cell("B1")).unwrap().output, "ok");
}

#[tokio::test]
async fn test_dependency_without_output_runs_first() {
    let wb = workbook(vec![sheet(
        "s1",
        "Sheet1",
        vec![
            ("A1", Cell::new_prompt("What is the capital of France?")),
            ("B1", Cell::new_prompt("Capital: {{A1}}")),
        ],
    )]);
    let h = Harness::new(
        wb,
        ScriptedProvider::answering(&[("What is the capital of France?", "Paris")]),
    );

    let state = h.evaluator.run_cell("Sheet1", &cell("B1")).await;

    assert_eq!(state, RunState::Succeeded);
    assert_eq!(
        h.provider.prompts(),
        vec!["What is the capital of France?", "Capital: Paris"]
    );
    assert_eq!(h.cell("Sheet1", "A1").output, "Paris");
    assert_eq!(h.evaluator.state_of_cell("Sheet1", &cell("A1")), RunState::Succeeded);
}

#[tokio::test]
async fn test_shared_upstream_is_not_a_cycle() {
    let wb = workbook(vec![sheet(
        "s1",
        "Sheet1",
        vec![
            ("A1", Cell::new_prompt("base")),
            ("B1", Cell::new_prompt("left {{A1}}")),
            ("C1", Cell::new_prompt("right {{A1}}")),
            ("D1", Cell::new_prompt("{{B1}} and {{C1}}")),
        ],
    )]);
    let h = Harness::new(wb, ScriptedProvider::new(|req| Ok(format!("({})", req.prompt))));

    let state = h.evaluator.run_cell("Sheet1", &cell("D1")).await;

    assert_eq!(state, RunState::Succeeded);
    assert!(h.notifier.completed_with(RunState::CycleAborted).is_empty());
    assert_eq!(
        h.provider.prompts(),
        vec![
            "base",
            "left (base)",
            "right (base)",
            "(left (base)) and (right (base))",
        ]
    );
}

#[tokio::test]
async fn test_cycle_aborts_exactly_once() {
    let wb = workbook(vec![sheet(
        "s1",
        "Sheet1",
        vec![
            ("A1", Cell::new_prompt("{{B1}}")),
            ("B1", Cell::new_prompt("{{A1}}")),
        ],
    )]);
    let h = Harness::new(wb, ScriptedProvider::answering(&[]));

    let state = h.evaluator.run_cell("Sheet1", &cell("A1")).await;

    assert_eq!(state, RunState::Succeeded);
    assert_eq!(
        h.notifier.completed_with(RunState::CycleAborted),
        vec!["Sheet1!A1"]
    );
    let paths: Vec<Vec<String>> = h
        .notifier
        .events()
        .into_iter()
        .filter_map(|event| match event {
            RunEvent::CycleDetected { path, .. } => Some(path),
            _ => None,
        })
        .collect();
    assert_eq!(paths, vec![vec!["Sheet1!A1", "Sheet1!B1", "Sheet1!A1"]]);
    // B1 saw A1 unresolved and fell back to its prompt text, verbatim.
    assert_eq!(h.provider.prompts(), vec!["{{B1}}", "ok"]);
}

#[tokio::test]
async fn test_auto_run_cycle_terminates() {
    let wb = workbook(vec![sheet(
        "s1",
        "Sheet1",
        vec![("A1", auto("{{B1}}")), ("B1", auto("{{A1}}"))],
    )]);
    let h = Harness::new(wb, ScriptedProvider::answering(&[]));

    let state = h.evaluator.run_cell("Sheet1", &cell("A1")).await;

    assert_eq!(state, RunState::Succeeded);
    assert!(!h.notifier.completed_with(RunState::CycleAborted).is_empty());
    assert!(h.provider.calls() < 10);
}

#[tokio::test]
async fn test_cross_sheet_reference_is_read_only() {
    let sheet2 = Sheet::unloaded("s2", "Sheet2");
    let wb = workbook(vec![
        sheet("s1", "Sheet1", vec![("B1", Cell::new_prompt("{{Sheet2!A1}}"))]),
        sheet2,
    ]);
    let h = Harness::new(wb, ScriptedProvider::answering(&[]));
    h.store
        .inner
        .insert("s2", cell("A1"), Cell::with_output("make an X", "X"));

    let state = h.evaluator.run_cell("Sheet1", &cell("B1")).await;

    assert_eq!(state, RunState::Succeeded);
    assert_eq!(h.provider.prompts(), vec!["X"]);
    assert!(!h.started().contains(&"Sheet2!A1".to_string()));
    assert_eq!(h.evaluator.state_of_cell("Sheet2", &cell("A1")), RunState::Idle);
    assert_eq!(h.store.loads_of("s2"), 1);
}

#[tokio::test]
async fn test_cross_sheet_dependency_without_output_is_not_executed() {
    let wb = workbook(vec![
        sheet("s1", "Sheet1", vec![("B1", Cell::new_prompt("see {{Sheet2!A1}}"))]),
        sheet("s2", "Sheet2", vec![("A1", Cell::new_prompt("upstream prompt"))]),
    ]);
    let h = Harness::new(wb, ScriptedProvider::answering(&[]));

    h.evaluator.run_cell("Sheet1", &cell("B1")).await;

    assert_eq!(h.provider.prompts(), vec!["see upstream prompt"]);
    assert!(h.cell("Sheet2", "A1").generations.is_empty());
}

#[tokio::test]
async fn test_cascade_runs_only_auto_run_dependents() {
    let wb = workbook(vec![sheet(
        "s1",
        "Sheet1",
        vec![
            ("A1", Cell::new_prompt("seed")),
            ("B1", auto("{{A1}}")),
            ("C1", Cell::new_prompt("{{A1}}")),
        ],
    )]);
    let h = Harness::new(wb, ScriptedProvider::answering(&[("seed", "grown")]));

    let state = h.evaluator.run_cell("Sheet1", &cell("A1")).await;

    assert_eq!(state, RunState::Succeeded);
    assert_eq!(h.evaluator.state_of_cell("Sheet1", &cell("B1")), RunState::Succeeded);
    assert_eq!(h.evaluator.state_of_cell("Sheet1", &cell("C1")), RunState::Idle);
    assert_eq!(h.cell("Sheet1", "C1").output, "");
    assert_eq!(h.provider.prompts(), vec!["seed", "grown"]);

    let cascades: Vec<Vec<(String, CellRef)>> = h
        .notifier
        .events()
        .into_iter()
        .filter_map(|event| match event {
            RunEvent::CascadeStarted { dependents, .. } => Some(dependents),
            _ => None,
        })
        .collect();
    assert_eq!(cascades, vec![vec![("Sheet1".to_string(), cell("B1"))]]);
}

#[tokio::test]
async fn test_cascade_visits_current_sheet_first() {
    let wb = workbook(vec![
        sheet("s2", "Sheet2", vec![("A1", auto("{{Sheet1!A1}}"))]),
        sheet(
            "s1",
            "Sheet1",
            vec![
                ("A1", Cell::new_prompt("seed")),
                ("C3", auto("{{output:A1:1}}")),
                ("B2", Cell::new_prompt("{{prompt:A1}}")),
            ],
        ),
    ]);
    let h = Harness::new(wb, ScriptedProvider::answering(&[]));

    assert_eq!(
        h.evaluator.dependents_of("Sheet1", &cell("A1")).await,
        vec![
            ("Sheet1".to_string(), cell("B2")),
            ("Sheet1".to_string(), cell("C3")),
            ("Sheet2".to_string(), cell("A1")),
        ]
    );

    h.evaluator.run_cell("Sheet1", &cell("A1")).await;

    assert_eq!(
        h.notifier.completed_with(RunState::Succeeded),
        vec!["Sheet1!A1", "Sheet1!C3", "Sheet2!A1"]
    );
}

#[tokio::test]
async fn test_missing_dependency_gets_diagnostic_output() {
    let wb = workbook(vec![sheet(
        "s1",
        "Sheet1",
        vec![
            ("B1", Cell::new_prompt("Use {{Z9}} and {{C1}}")),
            ("C1", Cell::new_empty()),
        ],
    )]);
    let h = Harness::new(wb, ScriptedProvider::answering(&[]));

    let state = h.evaluator.run_cell("Sheet1", &cell("B1")).await;

    assert_eq!(state, RunState::Succeeded);
    assert_eq!(
        h.provider.prompts(),
        vec![r#"Use [Cell "Z9" not found in sheet "Sheet1"] and [Cell "C1" has no prompt]"#]
    );
    assert_eq!(
        h.cell("Sheet1", "Z9").output,
        r#"[Cell "Z9" not found in sheet "Sheet1"]"#
    );
}

#[tokio::test]
async fn test_fail_dependent_policy_skips_provider() {
    let wb = workbook(vec![sheet(
        "s1",
        "Sheet1",
        vec![("B1", Cell::new_prompt("{{Sheet9!A1}}"))],
    )]);
    let config = EvaluatorConfig {
        diagnostic_policy: DiagnosticPolicy::FailDependent,
        ..EvaluatorConfig::default()
    };
    let h = Harness::with_config(wb, ScriptedProvider::answering(&[]), config);

    let state = h.evaluator.run_cell("Sheet1", &cell("B1")).await;

    assert_eq!(state, RunState::Failed);
    assert_eq!(h.provider.calls(), 0);
    assert_eq!(h.cell("Sheet1", "B1").output, r#"Error: [Sheet "Sheet9" not found]"#);
}

#[tokio::test]
async fn test_fail_dependent_policy_stops_at_failed_upstream() {
    let wb = workbook(vec![sheet(
        "s1",
        "Sheet1",
        vec![("A1", Cell::new_prompt("hello")), ("B1", Cell::new_prompt("Use {{A1}}"))],
    )]);
    let config = EvaluatorConfig {
        diagnostic_policy: DiagnosticPolicy::FailDependent,
        ..EvaluatorConfig::default()
    };
    let h = Harness::with_config(
        wb,
        ScriptedProvider::new(|req| match req.prompt.as_str() {
            "hello" => Err(ProviderError::Status {
                status: 401,
                body: "bad key".to_string(),
            }),
            _ => Ok("ok".to_string()),
        }),
        config,
    );

    let state = h.evaluator.run_cell("Sheet1", &cell("B1")).await;

    assert_eq!(state, RunState::Failed);
    assert_eq!(h.provider.prompts(), vec!["hello"]);
    assert_eq!(h.cell("Sheet1", "A1").output, "Error: HTTP 401: bad key");
    assert_eq!(h.cell("Sheet1", "B1").output, r#"Error: [Cell "A1" failed]"#);

    // A1 failed in an earlier run: it is retried, and B1 still fails.
    let state = h.evaluator.run_cell("Sheet1", &cell("B1")).await;
    assert_eq!(state, RunState::Failed);
    assert_eq!(h.provider.prompts(), vec!["hello", "hello"]);
}

#[tokio::test]
async fn test_fail_dependent_policy_trusts_bracketed_output() {
    let wb = workbook(vec![sheet(
        "s1",
        "Sheet1",
        vec![
            ("A1", Cell::with_output("quote something", r#"[Cell "X" says hi]"#)),
            ("B1", Cell::new_prompt("Echo {{A1}}")),
        ],
    )]);
    let config = EvaluatorConfig {
        diagnostic_policy: DiagnosticPolicy::FailDependent,
        ..EvaluatorConfig::default()
    };
    let h = Harness::with_config(wb, ScriptedProvider::answering(&[]), config);

    let state = h.evaluator.run_cell("Sheet1", &cell("B1")).await;

    assert_eq!(state, RunState::Succeeded);
    assert_eq!(h.provider.prompts(), vec![r#"Echo [Cell "X" says hi]"#]);
}

#[tokio::test]
async fn test_fail_dependent_policy_fails_on_missing_dependency() {
    let wb = workbook(vec![sheet(
        "s1",
        "Sheet1",
        vec![("B1", Cell::new_prompt("Use {{Z9}}"))],
    )]);
    let config = EvaluatorConfig {
        diagnostic_policy: DiagnosticPolicy::FailDependent,
        ..EvaluatorConfig::default()
    };
    let h = Harness::with_config(wb, ScriptedProvider::answering(&[]), config);

    let state = h.evaluator.run_cell("Sheet1", &cell("B1")).await;

    assert_eq!(state, RunState::Failed);
    assert_eq!(h.provider.calls(), 0);
    assert_eq!(
        h.cell("Sheet1", "B1").output,
        r#"Error: [Cell "Z9" not found in sheet "Sheet1"]"#
    );
}

#[tokio::test]
async fn test_provider_failure_is_stored_and_cascades() {
    let wb = workbook(vec![sheet(
        "s1",
        "Sheet1",
        vec![("A1", Cell::new_prompt("hello")), ("B1", auto("{{A1}}"))],
    )]);
    let h = Harness::new(
        wb,
        ScriptedProvider::new(|_| {
            Err(ProviderError::Status {
                status: 401,
                body: "bad key".to_string(),
            })
        }),
    );

    let state = h.evaluator.run_cell("Sheet1", &cell("A1")).await;

    assert_eq!(state, RunState::Failed);
    let a1 = h.cell("Sheet1", "A1");
    assert_eq!(a1.output, "Error: HTTP 401: bad key");
    assert!(a1.generations.is_empty());
    assert_eq!(h.evaluator.state_of_cell("Sheet1", &cell("B1")), RunState::Failed);
    assert_eq!(h.provider.prompts(), vec!["hello", "Error: HTTP 401: bad key"]);
    assert!(h.notifier.events().iter().any(|event| matches!(
        event,
        RunEvent::Error { message, .. } if message == "HTTP 401: bad key"
    )));
}

#[tokio::test(start_paused = true)]
async fn test_provider_call_times_out() {
    let wb = workbook(vec![sheet("s1", "Sheet1", vec![("A1", Cell::new_prompt("slow"))])]);
    let config = EvaluatorConfig {
        provider_timeout: Duration::from_secs(1),
        ..EvaluatorConfig::default()
    };
    let h = Harness::with_config(
        wb,
        ScriptedProvider::answering(&[]).delayed(Duration::from_secs(60)),
        config,
    );

    let state = h.evaluator.run_cell("Sheet1", &cell("A1")).await;

    assert_eq!(state, RunState::Failed);
    assert_eq!(h.cell("Sheet1", "A1").output, "Error: request timed out after 1s");
}

#[tokio::test(start_paused = true)]
async fn test_second_top_level_run_is_busy() {
    let wb = workbook(vec![sheet(
        "s1",
        "Sheet1",
        vec![("A1", Cell::new_prompt("one")), ("B1", Cell::new_prompt("two"))],
    )]);
    let h = Harness::new(
        wb,
        ScriptedProvider::answering(&[]).delayed(Duration::from_millis(100)),
    );

    let (a1, b1) = (cell("A1"), cell("B1"));
    let (first, second) = tokio::join!(
        h.evaluator.run_cell("Sheet1", &a1),
        h.evaluator.run_cell("Sheet1", &b1),
    );

    assert_eq!(first, RunState::Succeeded);
    assert_eq!(second, RunState::Busy);
    assert_eq!(h.provider.calls(), 1);
    let b1 = h.cell("Sheet1", "B1");
    assert_eq!(b1.output, "");
    assert!(b1.generations.is_empty());

    // the gate is free again
    assert_eq!(
        h.evaluator.run_cell("Sheet1", &cell("B1")).await,
        RunState::Succeeded
    );
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_triggers_coalesce() {
    let wb = workbook(vec![sheet("s1", "Sheet1", vec![("A1", Cell::new_prompt("tick"))])]);
    let h = Harness::new(
        wb,
        ScriptedProvider::answering(&[]).delayed(Duration::from_millis(100)),
    );

    let a1 = cell("A1");
    let (first, second, third) = tokio::join!(
        h.evaluator.run_cell("Sheet1", &a1),
        h.evaluator.run_cell("Sheet1", &a1),
        h.evaluator.run_cell("Sheet1", &a1),
    );

    assert_eq!(first, RunState::Succeeded);
    assert_eq!(second, RunState::Coalesced);
    assert_eq!(third, RunState::Coalesced);
    assert_eq!(h.provider.calls(), 2);
    assert_eq!(h.cell("Sheet1", "A1").generations.len(), 2);
}

#[tokio::test]
async fn test_formula_short_circuits_provider() {
    let wb = workbook(vec![sheet(
        "s1",
        "Sheet1",
        vec![
            ("A1", Cell::new_prompt("=1 + 2")),
            ("A2", Cell::new_prompt("=1 +")),
            ("B1", auto("{{A1}}")),
        ],
    )]);
    let h = Harness::new(wb, ScriptedProvider::answering(&[]));

    assert_eq!(
        h.evaluator.run_cell("Sheet1", &cell("A1")).await,
        RunState::Succeeded
    );
    assert_eq!(
        h.evaluator.run_cell("Sheet1", &cell("A2")).await,
        RunState::Failed
    );

    assert_eq!(h.cell("Sheet1", "A1").output, "3");
    assert!(h.cell("Sheet1", "A1").generations.is_empty());
    assert_eq!(h.cell("Sheet1", "A2").output, "#ERROR");
    assert_eq!(h.provider.calls(), 0);
    assert_eq!(h.evaluator.state_of_cell("Sheet1", &cell("B1")), RunState::Idle);
}

#[tokio::test]
async fn test_pins_take_priority_over_template() {
    let pinned = Cell {
        cell_prompt: Some("ignored {input}".to_string()),
        selected_generations: vec![GenerationPin {
            cell: cell("A1"),
            generation: 2,
        }],
        ..Cell::new_prompt("Summarize")
    };
    let templated = Cell {
        cell_prompt: Some("Answer briefly: {input}".to_string()),
        ..Cell::new_prompt("Why {{A1:1}}?")
    };
    let wb = workbook(vec![sheet(
        "s1",
        "Sheet1",
        vec![
            ("A1", with_generations("draft", &["g1", "g2"])),
            ("B1", pinned),
            ("C1", templated),
        ],
    )]);
    let h = Harness::new(wb, ScriptedProvider::answering(&[]));

    h.evaluator.run_cell("Sheet1", &cell("B1")).await;
    h.evaluator.run_cell("Sheet1", &cell("C1")).await;

    assert_eq!(
        h.provider.prompts(),
        vec!["Generation 2 from A1:\ng2\n\nSummarize", "Answer briefly: Why g1?"]
    );
}

#[tokio::test]
async fn test_image_to_video_attaches_source_image() {
    let wb = workbook(vec![sheet(
        "s1",
        "Sheet1",
        vec![
            (
                "A1",
                with_generations(
                    "draw a cat",
                    &["https://cdn.example.com/old.png", "https://cdn.example.com/cat.png"],
                ),
            ),
            (
                "B1",
                Cell {
                    model: "acme-image-to-video".to_string(),
                    ..Cell::new_prompt("Animate {{prompt:A1}}")
                },
            ),
        ],
    )]);
    let h = Harness::new(wb, ScriptedProvider::answering(&[]));

    h.evaluator.run_cell("Sheet1", &cell("B1")).await;

    assert_eq!(
        h.provider.prompts(),
        vec!["image_url: https://cdn.example.com/cat.png\nprompt: Animate draw a cat"]
    );
}

#[tokio::test]
async fn test_resolve_generation_selectors() {
    let wb = workbook(vec![sheet(
        "s1",
        "Sheet1",
        vec![("A1", with_generations("p", &["g1", "g2", "g3"]))],
    )]);
    let h = Harness::new(wb, ScriptedProvider::answering(&[]));

    assert_eq!(h.evaluator.resolve_token("A1-2", "Sheet1").await, "g2");
    assert_eq!(h.evaluator.resolve_token("A1:2", "Sheet1").await, "g2");
    assert_eq!(
        h.evaluator.resolve_token("A1:1-3", "Sheet1").await,
        "g1\n\n---\n\ng2\n\n---\n\ng3"
    );
    assert_eq!(
        h.evaluator.resolve_token("A1:4", "Sheet1").await,
        r#"[Generation 4 not found for cell "A1" (has 3)]"#
    );

    let first = h.evaluator.resolve_token("Z9", "Sheet1").await;
    let second = h.evaluator.resolve_token("Z9", "Sheet1").await;
    assert_eq!(first, r#"[Cell "Z9" not found in sheet "Sheet1"]"#);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_sheet_load_failure_becomes_diagnostic() {
    let wb = workbook(vec![
        sheet("s1", "Sheet1", vec![("B1", Cell::new_prompt("{{Sheet2!A1}}"))]),
        Sheet::unloaded("s2", "Sheet2"),
    ]);
    let h = Harness::new(wb, ScriptedProvider::answering(&[]));
    h.store.fail_loads_of("s2");

    assert_eq!(
        h.evaluator.resolve_token("Sheet2!A1", "Sheet1").await,
        r#"[Sheet "Sheet2" could not be loaded: io error: disk gone]"#
    );

    h.evaluator.run_cell("Sheet1", &cell("B1")).await;
    assert_eq!(
        h.provider.prompts(),
        vec![r#"[Sheet "Sheet2" could not be loaded: io error: disk gone]"#]
    );
}

#[tokio::test(start_paused = true)]
async fn test_interval_scheduler_reruns_cell() {
    let wb = workbook(vec![sheet(
        "s1",
        "Sheet1",
        vec![
            (
                "A1",
                Cell {
                    interval: 10,
                    ..Cell::new_prompt("weather now")
                },
            ),
            ("B1", Cell::new_prompt("not scheduled")),
        ],
    )]);
    let h = Harness::new(wb, ScriptedProvider::answering(&[]));
    let provider = h.provider.clone();
    let evaluator = Arc::new(h.evaluator);
    let scheduler = IntervalScheduler::new(evaluator.clone());

    assert_eq!(scheduler.sync(), 1);
    tokio::time::sleep(Duration::from_secs(25)).await;

    assert_eq!(provider.calls(), 2);
    let a1 = evaluator
        .workbook()
        .sheet_by_name("Sheet1")
        .unwrap()
        .cell(&cell("A1"))
        .unwrap();
    assert_eq!(a1.generations.len(), 2);

    scheduler.shutdown();
    assert!(scheduler.is_empty());
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(provider.calls(), 2);
}
