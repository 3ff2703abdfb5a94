//! Error kinds surfaced by the engine
//!
//! Mirrors the propagation policy table of the core design: every variant here
//! is caught at the boundary of [`crate::Engine::analyze_module`] and
//! [`crate::Engine::analyze_document`] and converted into either a logged
//! anomaly or an `Internal` outcome — no error is ever allowed to unwind past
//! those entry points.

use thiserror::Error;

/// A single parse failure, attached to the stream it was raised for
#[derive(Debug, Clone)]
pub struct ParseFailure {
    /// The module / stream this failure belongs to
    pub stream: String,
    /// 1-based source line the parser stopped at
    pub line: usize,
    /// 1-based column the parser stopped at
    pub column: usize,
    /// The pest-rendered diagnostic, including the caret-annotated source line
    pub message: String,
}

/// Errors raised while analyzing a single VBA module
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// Grammar/parser failure - aborts the current stream only
    #[error("parse error in {stream}:{line}:{column}: {message}")]
    Parse {
        stream: String,
        line: usize,
        column: usize,
        message: String,
    },

    /// Document-variable / custom-property harvesting failed upstream
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Reference to an identifier that resolves to nothing — not fatal, the
    /// interpreter converts this into `Value::Unresolved` instead of
    /// propagating it; the variant exists for diagnostics/logging only.
    #[error("undefined name: {0}")]
    Name(String),

    /// A coercion was attempted that has no defined VBA semantics
    #[error("type error in {context}: {message}")]
    Type { context: String, message: String },

    /// Recursion or loop-iteration bound exceeded
    #[error("runtime limit exceeded: {0}")]
    RuntimeLimit(String),

    /// A builtin or `CreateObject` ProgID has no model
    #[error("unmodeled builtin: {0}")]
    BuiltinUnmodeled(String),

    /// Anything else — caught, logged with a stack trace via `tracing`, and
    /// turned into a `null` per-document result; analysis of the next
    /// document proceeds unaffected.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// True for errors that `On Error Resume Next` is defined to swallow
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::Type { .. } | EngineError::Name(_) | EngineError::BuiltinUnmodeled(_)
        )
    }
}

impl From<pest::error::Error<crate::parser::Rule>> for EngineError {
    fn from(e: pest::error::Error<crate::parser::Rule>) -> Self {
        let (line, column) = match e.line_col {
            pest::error::LineColLocation::Pos((l, c)) => (l, c),
            pest::error::LineColLocation::Span((l, c), _) => (l, c),
        };
        EngineError::Parse {
            stream: String::new(),
            line,
            column,
            message: e.to_string(),
        }
    }
}
