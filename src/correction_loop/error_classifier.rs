//! Error Classifier
//!
//! Classifies engine errors into a taxonomy for fallback and correction.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    // single-quoted literals (with '' escapes), double-quoted and backtick identifiers
    static ref QUOTED: Regex = Regex::new(r#"'(?:[^']|'')*'|"[^"]*"|`[^`]*`"#).unwrap();
}

/// Error taxonomy shared by validation outcomes and session diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    SyntaxError,
    SchemaReferenceError,
    /// Engine rejected the statement for a reason no rule recognizes
    ExecutionError,
    Timeout,
    InfrastructureError,
    RepairFailed,
    Exhausted,
}

impl ErrorKind {
    /// The SQL itself is wrong and a correction round may fix it
    pub fn is_correctable(&self) -> bool {
        matches!(
            self,
            ErrorKind::SyntaxError
                | ErrorKind::SchemaReferenceError
                | ErrorKind::ExecutionError
                | ErrorKind::Timeout
                | ErrorKind::InfrastructureError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::SyntaxError => write!(f, "SyntaxError"),
            ErrorKind::SchemaReferenceError => write!(f, "SchemaReferenceError"),
            ErrorKind::ExecutionError => write!(f, "ExecutionError"),
            ErrorKind::Timeout => write!(f, "Timeout"),
            ErrorKind::InfrastructureError => write!(f, "InfrastructureError"),
            ErrorKind::RepairFailed => write!(f, "RepairFailed"),
            ErrorKind::Exhausted => write!(f, "Exhausted"),
        }
    }
}

const TIMEOUT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "deadline exceeded",
    "query exceeded maximum execution time",
];

const INFRASTRUCTURE_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection closed",
    "broken pipe",
    "service unavailable",
    "temporarily unavailable",
    "internal server error",
    "internal error",
    "bad gateway",
    "too many requests",
    "rate limit",
    "quota exceeded",
    "network error",
    "network is unreachable",
    "dry run is not supported",
    "dry run not supported",
    "dry run is disabled",
    "permission denied",
    "access denied",
];

const SCHEMA_PATTERNS: &[&str] = &[
    "does not exist",
    "not found",
    "unknown column",
    "unknown table",
    "no such table",
    "no such column",
    "unrecognized name",
    "invalid identifier",
    "cannot be resolved",
    "could not be resolved",
    "ambiguous",
    "not in group by",
    "must appear in the group by",
];

const SYNTAX_PATTERNS: &[&str] = &[
    "syntax",
    "parse error",
    "parser error",
    "expected",
    "unexpected",
    "unterminated",
    "mismatched input",
    "empty sql",
];

/// Error classifier
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify an engine-reported error message into the taxonomy.
    ///
    /// Quoted identifiers and literals are blanked first so a column named
    /// `timeout_ms` cannot steer the result. Statement errors win over
    /// timeout and infrastructure wording.
    pub fn classify(&self, message: &str) -> ErrorKind {
        let lowered = message.to_lowercase();
        let msg = QUOTED.replace_all(&lowered, "''");

        if contains_any(&msg, SCHEMA_PATTERNS) {
            return ErrorKind::SchemaReferenceError;
        }

        if contains_any(&msg, SYNTAX_PATTERNS) {
            return ErrorKind::SyntaxError;
        }

        if contains_any(&msg, TIMEOUT_PATTERNS) {
            return ErrorKind::Timeout;
        }

        if contains_any(&msg, INFRASTRUCTURE_PATTERNS) {
            return ErrorKind::InfrastructureError;
        }

        ErrorKind::ExecutionError
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_syntax_error() {
        let classifier = ErrorClassifier::new();
        assert_eq!(
            classifier.classify("sql parser error: Expected an expression:, found: EOF"),
            ErrorKind::SyntaxError
        );
        assert_eq!(
            classifier.classify("Syntax error at or near \"WHERE\""),
            ErrorKind::SyntaxError
        );
    }

    #[test]
    fn test_classify_schema_reference_error() {
        let classifier = ErrorClassifier::new();
        assert_eq!(
            classifier.classify("Column 'user_id' does not exist"),
            ErrorKind::SchemaReferenceError
        );
        assert_eq!(
            classifier.classify("Unrecognized name: revenue at [1:8]"),
            ErrorKind::SchemaReferenceError
        );
    }

    #[test]
    fn test_classify_infrastructure_error() {
        let classifier = ErrorClassifier::new();
        assert_eq!(
            classifier.classify("dry run is not supported for data source 'mysql'"),
            ErrorKind::InfrastructureError
        );
        assert_eq!(
            classifier.classify("503 Service Unavailable"),
            ErrorKind::InfrastructureError
        );
    }

    #[test]
    fn test_classify_timeout() {
        let classifier = ErrorClassifier::new();
        assert_eq!(classifier.classify("timeout"), ErrorKind::Timeout);
        assert_eq!(
            classifier.classify("Query timed out after 30s"),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn test_unrecognized_defaults_to_execution_error() {
        let classifier = ErrorClassifier::new();
        assert_eq!(
            classifier.classify("division by zero"),
            ErrorKind::ExecutionError
        );
        assert!(ErrorKind::ExecutionError.is_correctable());
        assert!(!ErrorKind::RepairFailed.is_correctable());
    }

    #[test]
    fn test_quoted_identifiers_do_not_drive_classification() {
        let classifier = ErrorClassifier::new();
        assert_eq!(
            classifier.classify("column 'timeout_ms' does not exist"),
            ErrorKind::SchemaReferenceError
        );
        assert_eq!(
            classifier.classify("Unknown column `internal_error_count` in 'field list'"),
            ErrorKind::SchemaReferenceError
        );
        assert_eq!(
            classifier.classify(r#"Syntax error at or near "connection_refused_at""#),
            ErrorKind::SyntaxError
        );
        assert_eq!(
            classifier.classify("division by zero in 'rate limit' calculation"),
            ErrorKind::ExecutionError
        );
    }

    #[test]
    fn test_unsupported_sql_feature_is_not_infrastructure() {
        let classifier = ErrorClassifier::new();
        let kind =
            classifier.classify("window function ROW_NUMBER is not supported in this context");
        assert_ne!(kind, ErrorKind::InfrastructureError);
        assert_eq!(kind, ErrorKind::ExecutionError);
    }

    #[test]
    fn test_statement_error_wins_over_timeout_wording() {
        let classifier = ErrorClassifier::new();
        assert_eq!(
            classifier.classify("Unrecognized name: timeout_ms at [1:8]"),
            ErrorKind::SchemaReferenceError
        );
    }
}
