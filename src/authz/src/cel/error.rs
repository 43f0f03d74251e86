//! Error types for CEL rule evaluation

use thiserror::Error;

/// CEL operation errors
#[derive(Error, Debug)]
pub enum CelError {
    #[error("CEL compilation failed: {0}")]
    CompilationError(String),

    #[error("CEL evaluation failed: {0}")]
    EvaluationError(String),

    #[error("CEL interpreter panicked while evaluating expression")]
    InterpreterPanic,

    #[error("Expression did not return a boolean result")]
    NonBooleanResult,
}

/// Result type for CEL operations
pub type Result<T> = std::result::Result<T, CelError>;
