use std::io;

use opensilicon_core::{KernelError, LayoutError};
use thiserror::Error;

use crate::rule::RuleType;

/// Errors reading rule text, layer expressions or fail predicates.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("unknown rule type '{0}'")]
    UnknownRuleType(String),

    #[error("{rule}: expected {expected}")]
    Missing { rule: String, expected: &'static str },

    #[error("invalid number '{0}'")]
    BadNumber(String),

    #[error("invalid expression '{text}': {message}")]
    Expression { text: String, message: String },
}

impl ParseError {
    /// Attach a deck line number to an error raised while parsing a single line.
    pub fn at_line(self, line: usize) -> ParseError {
        match self {
            ParseError::Syntax { message, .. } => ParseError::Syntax { line, message },
            other => ParseError::Syntax {
                line,
                message: other.to_string(),
            },
        }
    }
}

/// A rule that cannot be evaluated. Recovered at rule granularity: the rule is
/// skipped for the current object and the run continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SetupError {
    #[error("layer '{0}' is not defined")]
    UnresolvedLayer(String),

    #[error("{0} rule needs a target layer")]
    MissingTarget(RuleType),

    #[error("bad spacing table: {0}")]
    BadSpacingTable(String),

    #[error("user rule '{0}' is not defined")]
    UnknownUserRule(String),

    #[error("user rule '{name}' takes {expected} arguments, got {got}")]
    UserRuleArity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("user rule '{name}': {message}")]
    UserRule { name: String, message: String },
}

/// Failure while evaluating one rule on one object.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// Errors that end a run; no partial results are returned.
#[derive(Error, Debug)]
pub enum DrcError {
    #[error("geometry kernel failure: {0}")]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("cell '{0}' not found")]
    CellNotFound(String),

    #[error("no cell to check: the layout has no top cell")]
    NoTopCell,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown setting '{0}'")]
    UnknownSetting(String),

    #[error("invalid value '{value}' for {name}")]
    InvalidValue { name: String, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
