//! SQL candidate validation and correction.
//!
//! Takes the SQL candidates an LLM proposed for one question, validates them
//! concurrently against a query engine, repairs the invalid ones in bounded
//! rounds, and selects one accepted statement.

pub mod candidate;
pub mod config;
pub mod correction_loop;
pub mod engine;
pub mod error;
pub mod llm;
pub mod selector;
pub mod session;
pub mod telemetry;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use candidate::{
    extract_all_sql, extract_sql, CandidateOrigin, CandidateSet, Lineage, LineageState,
    SqlCandidate,
};
pub use config::SessionConfig;
pub use correction_loop::{
    build_correction_prompt, CorrectionContext, CorrectionOrchestrator, ErrorClassifier, ErrorKind,
    RepairGenerator,
};
pub use engine::{HttpQueryEngine, QueryEngineClient, SimulatedEngine};
pub use error::{EngineError, Result, SqlCorrectionError};
pub use llm::{LlmClient, LlmRepairGenerator};
pub use selector::{Diagnostic, ResultSelector, Selection};
pub use session::{run_validation_session, SessionReport, ValidationEngine, ValidationSession};
pub use validation::{
    FallbackPolicy, ValidationMode, ValidationOutcome, ValidationScheduler, Validator,
};
