//! Validation Outcome - the immutable record of one validation attempt

use crate::candidate::SqlCandidate;
use crate::correction_loop::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How a candidate is checked against the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationMode {
    /// Dry-run execution through `execute(dry_run = true)`
    FullExecution,
    /// Schema-only check through `validate_plan`
    DryPlan,
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationMode::FullExecution => write!(f, "full_execution"),
            ValidationMode::DryPlan => write!(f, "dry_plan"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    candidate: SqlCandidate,
    valid: bool,
    error: Option<String>,
    error_kind: Option<ErrorKind>,
    mode_used: ValidationMode,
    fell_back: bool,
    columns: Vec<String>,
    #[serde(rename = "duration_ms", with = "crate::config::millis")]
    duration: Duration,
    validated_at: DateTime<Utc>,
}

impl ValidationOutcome {
    pub fn valid(
        candidate: SqlCandidate,
        mode_used: ValidationMode,
        columns: Vec<String>,
        duration: Duration,
    ) -> Self {
        Self {
            candidate,
            valid: true,
            error: None,
            error_kind: None,
            mode_used,
            fell_back: false,
            columns,
            duration,
            validated_at: Utc::now(),
        }
    }

    pub fn invalid(
        candidate: SqlCandidate,
        mode_used: ValidationMode,
        kind: ErrorKind,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            candidate,
            valid: false,
            error: Some(error.into()),
            error_kind: Some(kind),
            mode_used,
            fell_back: false,
            columns: Vec::new(),
            duration,
            validated_at: Utc::now(),
        }
    }

    /// Mark the outcome as produced by the automatic dry-plan fallback
    pub(crate) fn with_fallback(mut self) -> Self {
        self.fell_back = true;
        self
    }

    pub fn candidate(&self) -> &SqlCandidate {
        &self.candidate
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    pub fn mode_used(&self) -> ValidationMode {
        self.mode_used
    }

    pub fn fell_back(&self) -> bool {
        self.fell_back
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn validated_at(&self) -> DateTime<Utc> {
        self.validated_at
    }
}
