//! Error taxonomy for the combination recognizer and macro engine.
//!
//! The host (CLI, daemon glue) deals in `anyhow::Result`; the library seams
//! use these closed enums so callers can match on the error kinds spec'd out
//! in the macro/combination design (parse-time vs. runtime-type vs.
//! sub-task-failure).

use thiserror::Error;

/// Errors raised while tokenizing or parsing macro source into a task tree.
///
/// These are always surfaced before a macro starts running; the macro is
/// never started if parsing fails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unbalanced brackets in {0:?}")]
    UnbalancedBrackets(String),

    #[error("expected a bracketed call, found {0:?}")]
    ExpectedBracket(String),

    #[error("unknown task {0:?}")]
    UnknownTask(String),

    #[error("{task} expects between {min} and {max} argument(s), got {got}")]
    WrongArity {
        task: String,
        min: usize,
        max: usize,
        got: usize,
    },

    #[error("unknown keyword argument {name:?} for task {task}")]
    UnknownKeyword { task: String, name: String },

    #[error("keyword argument {name:?} collides with a positional argument for task {task}")]
    KeywordCollision { task: String, name: String },

    #[error("argument {index} of {task} has type {found:?}, expected one of {expected:?}")]
    TypeMismatch {
        task: String,
        index: usize,
        found: &'static str,
        expected: &'static str,
    },

    #[error("unknown key symbol {0:?}")]
    UnknownSymbol(String),

    #[error("symbol {symbol:?} is not available on target device {target:?}")]
    SymbolNotAvailableInTarget { symbol: String, target: String },

    #[error("invalid variable name {0:?}")]
    InvalidVariableName(String),

    #[error("{0}")]
    Other(String),
}

/// Errors raised while a macro is already running.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// A dynamic variable resolved to a value that violates a task's type
    /// constraints, e.g. `repeat($name, ...)` where `$name` holds a string.
    #[error("{task} received a value of the wrong type from variable {variable:?}: {detail}")]
    TypeViolation {
        task: String,
        variable: String,
        detail: String,
    },

    /// A child task raised and the enclosing task (`hold`, `repeat`, ...)
    /// does not retry; this variant carries the wrapped failure upward.
    #[error("sub-task failed: {0}")]
    SubTaskFailed(Box<RuntimeError>),

    #[error("{0}")]
    Other(String),
}

/// Structural errors from the Combination Recognizer.
///
/// Per spec.md §7 these are invariant violations and should not occur in
/// production; they exist so tests can assert the invariants hold.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CombinationError {
    #[error("event with hash {0:?} does not belong to this combination")]
    NotMember(u64),

    #[error("combination must contain at least one key")]
    EmptyCombination,

    #[error("analog input configs cannot appear in a combination")]
    AnalogInCombination,
}
