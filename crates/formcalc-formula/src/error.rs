//! Formula error types

use formcalc_core::{CIRCULAR_SENTINEL, ERROR_SENTINEL};
use thiserror::Error;

/// Result type for formula operations
pub type FormulaResult<T> = std::result::Result<T, FormulaError>;

/// Errors that can occur during formula parsing or evaluation
///
/// These never leave the evaluator as failures of a field: at the formula boundary they
/// collapse into the [`sentinel`](FormulaError::sentinel) text shown in place of a result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    /// Formula parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Formula evaluation error
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// Unknown function
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// Bare identifier that is neither a cell reference nor a known constant
    #[error("Unknown name: {0}")]
    UnknownName(String),

    /// Wrong number of arguments
    #[error("Wrong number of arguments for {function}: expected {expected}, got {actual}")]
    ArgumentCount {
        function: String,
        expected: String,
        actual: usize,
    },

    /// Circular reference
    #[error("Circular reference detected")]
    CircularReference,

    /// Expression or reference chain deeper than the evaluator follows
    #[error("Formula nested too deeply")]
    NestingTooDeep,

    /// Reference to invalid cell
    #[error("Invalid reference: {0}")]
    InvalidReference(String),
}

impl FormulaError {
    /// The text rendered in place of a result: `"CIRC"` for cycles, `"ERR"` otherwise
    pub fn sentinel(&self) -> &'static str {
        match self {
            FormulaError::CircularReference => CIRCULAR_SENTINEL,
            _ => ERROR_SENTINEL,
        }
    }

    /// Whether this is a circular reference
    pub fn is_circular(&self) -> bool {
        matches!(self, FormulaError::CircularReference)
    }
}
