//! In-process formula evaluation with Rhai.
//!
//! Formulas are plain Rhai expressions over their named parameters, for
//! example `r0 + r1 * 2` or `max(qty, 1.0) * price`. Each parameter is a
//! float variable in scope.

use async_trait::async_trait;
use rhai::{Dynamic, Engine, Scope};

use crate::error::FormulaError;
use crate::propagate::{FormulaEvaluator, FormulaParams};

const MAX_OPERATIONS: u64 = 100_000;

/// Evaluates formulas locally instead of calling a remote service.
pub struct RhaiEvaluator {
    engine: Engine,
}

impl Default for RhaiEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl RhaiEvaluator {
    pub fn new() -> RhaiEvaluator {
        let mut engine = Engine::new();
        engine.set_max_operations(MAX_OPERATIONS);
        RhaiEvaluator { engine }
    }

    /// Evaluate synchronously.
    pub fn eval(&self, formula: &str, params: &FormulaParams) -> Result<f64, FormulaError> {
        let ast = self
            .engine
            .compile_expression(formula)
            .map_err(|e| FormulaError::Compile(e.to_string()))?;

        let mut scope = Scope::new();
        for (name, value) in params {
            scope.push(name.clone(), *value);
        }

        let result: Dynamic = self
            .engine
            .eval_ast_with_scope(&mut scope, &ast)
            .map_err(|e| FormulaError::Eval(e.to_string()))?;

        if let Ok(f) = result.as_float() {
            Ok(f)
        } else if let Ok(i) = result.as_int() {
            Ok(i as f64)
        } else {
            Err(FormulaError::NotNumeric(result.type_name().to_string()))
        }
    }
}

#[async_trait]
impl FormulaEvaluator for RhaiEvaluator {
    async fn evaluate(&self, formula: &str, params: &FormulaParams) -> Result<f64, FormulaError> {
        self.eval(formula, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, f64)]) -> FormulaParams {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_eval_arithmetic_over_params() {
        let ev = RhaiEvaluator::new();
        assert_eq!(ev.eval("r0 + r1", &params(&[("r0", 2.0), ("r1", 3.5)])), Ok(5.5));
        assert_eq!(ev.eval("qty * 2", &params(&[("qty", 4.0)])), Ok(8.0));
        assert_eq!(ev.eval("1 + 2", &params(&[])), Ok(3.0));
    }

    #[test]
    fn test_eval_errors() {
        let ev = RhaiEvaluator::new();
        assert!(matches!(ev.eval("r0 +", &params(&[])), Err(FormulaError::Compile(_))));
        assert!(matches!(ev.eval("missing * 2", &params(&[])), Err(FormulaError::Eval(_))));
        assert!(matches!(ev.eval("\"text\"", &params(&[])), Err(FormulaError::NotNumeric(_))));
    }

    #[tokio::test]
    async fn test_evaluator_trait() {
        let ev = RhaiEvaluator::new();
        let out = ev.evaluate("a - b", &params(&[("a", 10.0), ("b", 4.0)])).await;
        assert_eq!(out, Ok(6.0));
    }
}
