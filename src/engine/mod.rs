//! Query Engine Boundary
//!
//! The contract every query engine client implements, plus two clients: a
//! JSON/HTTP adapter for a remote engine and an in-process simulated engine.

pub mod http;
pub mod simulated;

use crate::error::EngineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpQueryEngine;
pub use simulated::SimulatedEngine;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Result of `execute`. `error` holds the engine's own complaint about the
/// statement; a failed call is an `Err(EngineError)` instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of `validate_plan`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanResponse {
    #[serde(default)]
    pub error: Option<String>,
}

/// Query engine client trait
///
/// Shared by every validation worker of a session, so calls must be safe to
/// issue concurrently. Callers enforce deadlines by dropping the returned
/// future; implementations must abandon the remote call when that happens.
#[async_trait]
pub trait QueryEngineClient: Send + Sync {
    /// Client name, used in logs
    fn name(&self) -> &str;

    /// Run a statement. With `dry_run` the engine simulates execution and
    /// reports the errors a real run would hit.
    async fn execute(
        &self,
        sql: &str,
        project_id: Option<&str>,
        dry_run: bool,
    ) -> EngineResult<ExecuteResponse>;

    /// Check a statement against the schema without executing it
    async fn validate_plan(
        &self,
        sql: &str,
        project_id: Option<&str>,
        data_source: &str,
    ) -> EngineResult<PlanResponse>;
}
