//! Repair
//!
//! The contract for the external step that rewrites a failing statement, and
//! the correction prompt handed to LLM-backed implementations.

use crate::correction_loop::error_classifier::ErrorKind;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Repair reported as `last_error` when the generator fails or returns no SQL
pub const REPAIR_FAILED: &str = "repair_failed";

/// Schema text shared by every correction of a session. Its content is up
/// to the caller (DDL, retrieved table descriptions, ...).
pub type SchemaContext = Arc<str>;

/// Everything needed to ask for a fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionContext {
    pub sql: String,
    pub error: String,
    pub error_kind: ErrorKind,
    /// Attempt number of the failing candidate
    pub attempt: u32,
    pub schema_context: SchemaContext,
}

/// Repair generator trait
///
/// Returns text containing the repaired statement. It may be wrapped in a
/// markdown fence; the orchestrator extracts the SQL itself.
#[async_trait]
pub trait RepairGenerator: Send + Sync {
    async fn repair(&self, context: &CorrectionContext) -> Result<String>;
}

/// Build a correction prompt from a failing candidate
pub fn build_correction_prompt(context: &CorrectionContext) -> String {
    let mut parts = Vec::new();

    parts.push(format!(
        "CORRECTION ATTEMPT {}: the SQL below failed validation.",
        context.attempt + 1
    ));
    parts.push(format!("\nSQL:\n{}", context.sql));
    parts.push(format!("\nERROR ({}):\n{}", context.error_kind, context.error));

    parts.push("\nHINT:".to_string());
    match context.error_kind {
        ErrorKind::SyntaxError => {
            parts.push(
                "The statement does not parse. Complete or fix the clause the error points at."
                    .to_string(),
            );
        }
        ErrorKind::SchemaReferenceError => {
            parts.push("A table or column does not exist or is ambiguous.".to_string());
            parts.push(
                "Use only tables and columns listed in the schema, qualified by table if needed."
                    .to_string(),
            );
        }
        ErrorKind::Timeout => {
            parts.push(
                "The query did not finish in time. Add selective filters or drop unnecessary joins."
                    .to_string(),
            );
        }
        ErrorKind::InfrastructureError => {
            parts.push(
                "The engine could not check the query. Prefer standard ANSI SQL constructs."
                    .to_string(),
            );
        }
        ErrorKind::ExecutionError | ErrorKind::RepairFailed | ErrorKind::Exhausted => {
            parts.push("Review the error and fix the statement.".to_string());
        }
    }

    if !context.schema_context.trim().is_empty() {
        parts.push(format!("\nSCHEMA:\n{}", context.schema_context));
    }

    parts.push(
        "\nReturn only the corrected SQL statement in a ```sql block, with no explanation."
            .to_string(),
    );

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(kind: ErrorKind, schema: &str) -> CorrectionContext {
        CorrectionContext {
            sql: "SELECT revenue FROM orders".to_string(),
            error: "column 'revenue' does not exist".to_string(),
            error_kind: kind,
            attempt: 0,
            schema_context: Arc::from(schema),
        }
    }

    #[test]
    fn test_prompt_carries_sql_error_and_schema() {
        let prompt = build_correction_prompt(&context(
            ErrorKind::SchemaReferenceError,
            "orders(id, amount, created_at)",
        ));
        assert!(prompt.starts_with("CORRECTION ATTEMPT 1"));
        assert!(prompt.contains("SELECT revenue FROM orders"));
        assert!(prompt.contains("column 'revenue' does not exist"));
        assert!(prompt.contains("orders(id, amount, created_at)"));
        assert!(prompt.contains("Use only tables and columns"));
    }

    #[test]
    fn test_prompt_omits_empty_schema() {
        let prompt = build_correction_prompt(&context(ErrorKind::SyntaxError, ""));
        assert!(!prompt.contains("SCHEMA:"));
        assert!(prompt.contains("does not parse"));
    }
}
