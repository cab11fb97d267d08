//! Error types for the gridsync engine.

use thiserror::Error;

/// Why a formula produced no value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("Formula compile error: {0}")]
    Compile(String),

    #[error("Formula evaluation error: {0}")]
    Eval(String),

    #[error("Formula result is not a number: {0}")]
    NotNumeric(String),

    #[error("Formula evaluator unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur while resolving an edit
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Trigger cascade did not settle after {rounds} rounds")]
    CascadeLimit { rounds: usize },

    #[error(transparent)]
    Formula(#[from] FormulaError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
