use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::position::Span;

/// Main error type for squall operations
///
/// Recoverable lexical and syntactic problems never surface here; they are
/// collected as [`ParseError`](crate::parser::ParseError) records on the
/// parse result. This enum covers failures that abort an operation: resolver
/// failures inside visitor passes and genuine internal bugs.
#[derive(Error, Debug)]
pub enum SquallError {
    #[error("Include resolution failed for '{name}': {message}")]
    IncludeResolution { name: String, message: String },

    #[error("Field resolution failed for '{field}': {message}")]
    FieldResolution { field: String, message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for squall operations
pub type Result<T> = std::result::Result<T, SquallError>;

/// A recoverable lexical or syntactic problem, positioned in the source
///
/// Parsing never fails on these; they accumulate on the parse result next
/// to the best-effort AST. `line` and `column` are 1-based.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
    pub length: usize,
    pub line: u32,
    pub column: u32,
}

impl ParseError {
    pub fn at(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            offset: span.start,
            length: span.len(),
            line: span.line,
            column: span.column,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}:{}", self.message, self.line, self.column)
    }
}

impl SquallError {
    /// Check if this error came from a caller-supplied resolver rather than
    /// the engine itself
    pub fn is_resolver_error(&self) -> bool {
        matches!(
            self,
            SquallError::IncludeResolution { .. } | SquallError::FieldResolution { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SquallError::IncludeResolution {
            name: "saved".to_string(),
            message: "backend offline".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Include resolution failed for 'saved': backend offline"
        );
    }

    #[test]
    fn test_resolver_errors() {
        assert!(SquallError::FieldResolution {
            field: "f".to_string(),
            message: "boom".to_string()
        }
        .is_resolver_error());
        assert!(!SquallError::Internal("bug".to_string()).is_resolver_error());
    }
}
