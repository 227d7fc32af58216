use std::path::PathBuf;

use thiserror::Error;

/// Problems found while compiling a JPad document.
#[derive(Debug, Error)]
pub enum CompileError {
    // The text is not JSON, or not shaped like a JPad document
    #[error("malformed document: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error("invalid matcher for `{property}`: {reason}")]
    Matcher { property: String, reason: String },

    #[error("unknown operator `{0}`")]
    UnknownOperator(String),

    #[error("unknown comparer `{0}`")]
    UnknownComparer(String),

    #[error("invalid rule: {0}")]
    Rule(String),

    #[error("invalid value distribution: {0}")]
    Distribution(String),

    #[error("value {value} does not match value type `{expected}`")]
    ValueType { value: String, expected: String },

    // A comparer literal that the comparer itself rejects
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Failures raised while a compiled rule is being evaluated.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("comparer `{comparer}` cannot parse `{operand}`: {reason}")]
    Comparison {
        comparer: String,
        operand: String,
        reason: String,
    },
}

/// Rejected `key=value` context tokens.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("malformed context `{0}`, expected key=value")]
    Malformed(String),
}

/// Everything a command can fail with.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // The compile cause is logged, never shown
    #[error("jpad is not valid")]
    InvalidRule,

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("evaluation failed: {0}")]
    Eval(#[from] EvalError),
}

pub type Result<T> = std::result::Result<T, Error>;
