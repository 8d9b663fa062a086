//! Formula evaluation.
//!
//! Prompts that start with `=` are formulas and never reach a generation
//! provider. They are evaluated by a [`FormulaEvaluator`]; the default one
//! runs the expression as a Rhai script.

use rhai::{Engine, EvalAltResult};

use super::Dynamic;
use super::format::format_dynamic;

/// Output stored for a formula that fails to evaluate.
pub const FORMULA_ERROR: &str = "#ERROR";

/// Evaluates the text after a formula's leading `=`.
pub trait FormulaEvaluator: Send + Sync {
    /// The formatted value, or [`FORMULA_ERROR`].
    fn evaluate(&self, formula: &str) -> String;
}

/// Create a Rhai engine with limits suited to one-line formulas.
pub fn create_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(100_000);
    engine.set_max_expr_depths(64, 32);
    engine.set_max_string_size(1 << 20);
    engine
}

/// Evaluate a formula expression.
pub fn eval_formula(engine: &Engine, formula: &str) -> Result<Dynamic, Box<EvalAltResult>> {
    engine.eval::<Dynamic>(formula)
}

/// [`FormulaEvaluator`] backed by a Rhai engine.
pub struct RhaiFormulaEvaluator {
    engine: Engine,
}

impl RhaiFormulaEvaluator {
    pub fn new() -> Self {
        Self {
            engine: create_engine(),
        }
    }
}

impl Default for RhaiFormulaEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl FormulaEvaluator for RhaiFormulaEvaluator {
    fn evaluate(&self, formula: &str) -> String {
        match eval_formula(&self.engine, formula) {
            Ok(value) => format_dynamic(&value),
            Err(err) => {
                tracing::debug!(formula, error = %err, "formula evaluation failed");
                FORMULA_ERROR.to_string()
            }
        }
    }
}
