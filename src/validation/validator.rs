//! Validator
//!
//! Checks one candidate against the query engine under a deadline. Every
//! failure, including the engine being unreachable, comes back as an invalid
//! `ValidationOutcome`; nothing is returned as an error.

use crate::candidate::SqlCandidate;
use crate::config::SessionConfig;
use crate::correction_loop::{ErrorClassifier, ErrorKind};
use crate::engine::QueryEngineClient;
use crate::validation::outcome::{ValidationMode, ValidationOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Error text reported when a call exceeds its deadline
pub const TIMEOUT_ERROR: &str = "timeout";

/// Error kinds that send a failed full execution to the dry-plan endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackPolicy {
    triggers: Vec<ErrorKind>,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            triggers: vec![ErrorKind::InfrastructureError],
        }
    }
}

impl FallbackPolicy {
    pub fn new(triggers: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self {
            triggers: triggers.into_iter().collect(),
        }
    }

    /// Also fall back when full execution times out
    pub fn infrastructure_and_timeout() -> Self {
        Self::new([ErrorKind::InfrastructureError, ErrorKind::Timeout])
    }

    pub fn triggers_on(&self, kind: ErrorKind) -> bool {
        self.triggers.contains(&kind)
    }
}

/// Verdict of a single engine call
type CallResult = std::result::Result<Vec<String>, (ErrorKind, String)>;

/// Candidate validator
pub struct Validator {
    engine: Arc<dyn QueryEngineClient>,
    classifier: ErrorClassifier,
    fallback_policy: FallbackPolicy,
    timeout: Duration,
    allow_dry_plan_fallback: bool,
    data_source: String,
    project_id: Option<String>,
}

impl Validator {
    pub fn new(engine: Arc<dyn QueryEngineClient>, config: &SessionConfig) -> Self {
        Self {
            engine,
            classifier: ErrorClassifier::new(),
            fallback_policy: FallbackPolicy::default(),
            timeout: config.timeout_per_call,
            allow_dry_plan_fallback: config.allow_dry_plan_fallback,
            data_source: config.data_source.clone(),
            project_id: config.project_id.clone(),
        }
    }

    pub fn with_fallback_policy(mut self, policy: FallbackPolicy) -> Self {
        self.fallback_policy = policy;
        self
    }

    /// Validate one candidate in `mode`.
    ///
    /// Makes one engine call, plus one dry-plan call when full execution
    /// fails with a kind the fallback policy covers and the session allows it.
    /// The fallback leaves the candidate, and so its attempt count, untouched.
    pub async fn validate(
        &self,
        candidate: SqlCandidate,
        mode: ValidationMode,
    ) -> ValidationOutcome {
        let started = Instant::now();

        if candidate.sql().trim().is_empty() {
            return ValidationOutcome::invalid(
                candidate,
                mode,
                ErrorKind::SyntaxError,
                "empty sql statement",
                started.elapsed(),
            );
        }

        let first = self.call(candidate.sql(), mode).await;
        let (kind, error) = match first {
            Ok(columns) => {
                debug!(candidate = %candidate, %mode, "candidate valid");
                return ValidationOutcome::valid(candidate, mode, columns, started.elapsed());
            }
            Err(failure) => failure,
        };

        let fallback = mode == ValidationMode::FullExecution
            && self.allow_dry_plan_fallback
            && self.fallback_policy.triggers_on(kind);

        if !fallback {
            debug!(candidate = %candidate, %mode, %kind, %error, "candidate invalid");
            return ValidationOutcome::invalid(candidate, mode, kind, error, started.elapsed());
        }

        warn!(
            candidate = %candidate,
            %kind,
            %error,
            "full execution failed, falling back to dry plan"
        );

        let second = self.call(candidate.sql(), ValidationMode::DryPlan).await;
        let outcome = match second {
            Ok(columns) => ValidationOutcome::valid(
                candidate,
                ValidationMode::DryPlan,
                columns,
                started.elapsed(),
            ),
            Err((kind, error)) => ValidationOutcome::invalid(
                candidate,
                ValidationMode::DryPlan,
                kind,
                error,
                started.elapsed(),
            ),
        };
        outcome.with_fallback()
    }

    async fn call(&self, sql: &str, mode: ValidationMode) -> CallResult {
        let project_id = self.project_id.as_deref();

        let response = match mode {
            ValidationMode::FullExecution => {
                tokio::time::timeout(self.timeout, self.engine.execute(sql, project_id, true))
                    .await
                    .map(|r| r.map(|resp| (resp.error, resp.columns)))
            }
            ValidationMode::DryPlan => tokio::time::timeout(
                self.timeout,
                self.engine.validate_plan(sql, project_id, &self.data_source),
            )
            .await
            .map(|r| r.map(|resp| (resp.error, Vec::new()))),
        };

        match response {
            // the engine future is dropped here, cancelling the call
            Err(_elapsed) => Err((ErrorKind::Timeout, TIMEOUT_ERROR.to_string())),
            Ok(Err(engine_error)) => {
                Err((ErrorKind::InfrastructureError, engine_error.to_string()))
            }
            Ok(Ok((Some(error), _))) => Err((self.classifier.classify(&error), error)),
            Ok(Ok((None, columns))) => Ok(columns),
        }
    }
}
