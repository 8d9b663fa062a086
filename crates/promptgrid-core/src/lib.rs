//! promptgrid-core - document model, storage, and async cell execution.

pub mod document;
pub mod error;
pub mod evaluator;
pub mod gate;
pub mod notify;
pub mod provider;
pub mod storage;
pub mod store;

pub use document::{DEFAULT_SHEET_NAME, Document, parse_cell_ref};
pub use error::{PromptgridError, Result};
pub use evaluator::{DiagnosticPolicy, Evaluator, EvaluatorConfig, IntervalScheduler, RunState};
pub use gate::{AdmissionGate, CellRunGuard};
pub use notify::{NoopNotifier, Notifier, RecordingNotifier, RunEvent, RunStep, TracingNotifier};
pub use provider::{
    EchoProvider, GenerationProvider, GenerationRequest, HttpProvider, HttpProviderConfig,
    ProviderError,
};
pub use store::{CellStore, InMemoryCellStore, StoreError};

pub use promptgrid_engine::engine::CellRef;
