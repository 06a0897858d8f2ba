//! Validation Session
//!
//! The aggregate root of one request, and the `ValidationEngine` that runs
//! it end to end: validate every candidate, correct the invalid ones, pick
//! a winner.

use crate::candidate::{CandidateSet, LineageState, SqlCandidate};
use crate::config::SessionConfig;
use crate::correction_loop::{CorrectionOrchestrator, RepairGenerator, SchemaContext};
use crate::engine::QueryEngineClient;
use crate::error::Result;
use crate::selector::{Diagnostic, ResultSelector, Selection};
use crate::validation::{
    FallbackPolicy, ValidationMode, ValidationOutcome, ValidationScheduler, Validator,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Reason recorded on lineages still running when the session deadline hits
pub const CANCELLED: &str = "cancelled";

/// State of one validation request. Candidates and outcomes are only ever
/// appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSession {
    id: Uuid,
    created_at: DateTime<Utc>,
    config: SessionConfig,
    candidate_set: CandidateSet,
    candidates: Vec<SqlCandidate>,
    outcomes: Vec<ValidationOutcome>,
    rounds: u32,
}

impl ValidationSession {
    /// Start a session from raw LLM output. Fails only on a malformed config.
    pub fn new<I, S>(raw_candidates: I, config: SessionConfig) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        config.validate()?;

        let candidate_set = CandidateSet::from_raw(raw_candidates);
        let candidates = candidate_set
            .lineages()
            .iter()
            .map(|l| l.current().clone())
            .collect();

        Ok(Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            config,
            candidate_set,
            candidates,
            outcomes: Vec::new(),
            rounds: 0,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn candidate_set(&self) -> &CandidateSet {
        &self.candidate_set
    }

    /// Every candidate ever created, drafts first, then corrections in the
    /// order they were applied
    pub fn candidates(&self) -> &[SqlCandidate] {
        &self.candidates
    }

    /// Every outcome, in the order batches completed
    pub fn outcomes(&self) -> &[ValidationOutcome] {
        &self.outcomes
    }

    /// Correction rounds started so far
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Newest outcome of a lineage
    pub fn latest_outcome(&self, index: usize) -> Option<&ValidationOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.candidate().index() == index)
            .max_by_key(|o| o.candidate().attempt())
    }

    pub(crate) fn start_round(&mut self) -> u32 {
        self.rounds += 1;
        self.rounds
    }

    pub(crate) fn begin_validation(&mut self, index: usize) {
        self.candidate_set.begin_validation(index);
    }

    pub(crate) fn record_outcomes(&mut self, outcomes: Vec<ValidationOutcome>) {
        for outcome in outcomes {
            self.candidate_set.record_verdict(
                outcome.candidate().index(),
                outcome.is_valid(),
                self.config.max_attempts,
            );
            self.outcomes.push(outcome);
        }
    }

    pub(crate) fn begin_correction(&mut self, index: usize) {
        self.candidate_set.begin_correction(index);
    }

    pub(crate) fn apply_correction(&mut self, candidate: SqlCandidate) {
        self.candidate_set.apply_correction(candidate.clone());
        self.candidates.push(candidate);
    }

    pub(crate) fn exhaust(&mut self, index: usize, reason: &str) {
        self.candidate_set.exhaust(index, reason);
    }

    /// Exhaust every lineage that has not reached a terminal state
    pub(crate) fn cancel_pending(&mut self) -> usize {
        let pending: Vec<usize> = self
            .candidate_set
            .lineages()
            .iter()
            .filter(|l| !l.state().is_terminal())
            .map(|l| l.index())
            .collect();
        for &index in &pending {
            self.candidate_set.exhaust(index, CANCELLED);
        }
        pending.len()
    }
}

/// What a caller gets back from one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub accepted_sql: Option<String>,
    pub accepted_index: Option<usize>,
    pub accepted_attempt: Option<u32>,
    /// One entry per lineage that never validated
    pub diagnostics: Vec<Diagnostic>,
    pub correction_rounds: u32,
    pub validations: usize,
    /// The session deadline expired before the loop finished
    pub cancelled: bool,
}

impl SessionReport {
    pub fn new(session: &ValidationSession, selection: Selection, cancelled: bool) -> Self {
        let accepted = selection.accepted.as_ref().map(|o| o.candidate());
        Self {
            session_id: session.id(),
            accepted_sql: accepted.map(|c| c.sql().to_string()),
            accepted_index: accepted.map(|c| c.index()),
            accepted_attempt: accepted.map(|c| c.attempt()),
            diagnostics: selection.diagnostics,
            correction_rounds: session.rounds(),
            validations: session.outcomes().len(),
            cancelled,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted_sql.is_some()
    }
}

/// Runs validation sessions against one engine and one repair generator.
/// Cheap to share; every `run` call is independent.
pub struct ValidationEngine {
    engine: Arc<dyn QueryEngineClient>,
    repairer: Arc<dyn RepairGenerator>,
    fallback_policy: FallbackPolicy,
    initial_mode: ValidationMode,
    session_deadline: Option<Duration>,
    schema_context: SchemaContext,
}

impl ValidationEngine {
    pub fn new(engine: Arc<dyn QueryEngineClient>, repairer: Arc<dyn RepairGenerator>) -> Self {
        Self {
            engine,
            repairer,
            fallback_policy: FallbackPolicy::default(),
            initial_mode: ValidationMode::FullExecution,
            session_deadline: None,
            schema_context: Arc::from(""),
        }
    }

    pub fn with_fallback_policy(mut self, policy: FallbackPolicy) -> Self {
        self.fallback_policy = policy;
        self
    }

    /// Validate with `mode` from the first round on. `DryPlan` suits data
    /// sources that reject dry-run execution outright.
    pub fn with_initial_mode(mut self, mode: ValidationMode) -> Self {
        self.initial_mode = mode;
        self
    }

    pub fn with_session_deadline(mut self, deadline: Duration) -> Self {
        self.session_deadline = Some(deadline);
        self
    }

    pub fn with_schema_context(mut self, schema_context: impl Into<SchemaContext>) -> Self {
        self.schema_context = schema_context.into();
        self
    }

    /// Validate and correct `candidates`, then select the accepted SQL
    pub async fn run<I, S>(&self, candidates: I, config: SessionConfig) -> Result<SessionReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut session = ValidationSession::new(candidates, config)?;
        let cancelled = self.run_session(&mut session).await;
        let selection = ResultSelector::select(&session);
        Ok(SessionReport::new(&session, selection, cancelled))
    }

    /// Drive an existing session to completion. Returns `true` when the
    /// session deadline cut it short.
    pub async fn run_session(&self, session: &mut ValidationSession) -> bool {
        let span = info_span!(
            "validation_session",
            session_id = %session.id(),
            candidates = session.candidate_set().len(),
            data_source = %session.config().data_source,
            mode = %self.initial_mode
        );

        async {
            info!("validation session started");

            let orchestrator = self.orchestrator(session.config());
            let cancelled = match self.session_deadline {
                Some(deadline) => {
                    let finished = tokio::time::timeout(deadline, orchestrator.run(session)).await;
                    if finished.is_err() {
                        let pending = session.cancel_pending();
                        warn!(
                            ?deadline,
                            pending,
                            "session deadline expired, pending lineages cancelled"
                        );
                        true
                    } else {
                        false
                    }
                }
                None => {
                    orchestrator.run(session).await;
                    false
                }
            };

            let valid = session.candidate_set().in_state(LineageState::Valid).len();
            info!(
                valid,
                rounds = session.rounds(),
                validations = session.outcomes().len(),
                cancelled,
                "validation session finished"
            );
            cancelled
        }
        .instrument(span)
        .await
    }

    fn orchestrator(&self, config: &SessionConfig) -> CorrectionOrchestrator {
        let validator = Validator::new(Arc::clone(&self.engine), config)
            .with_fallback_policy(self.fallback_policy.clone());
        let scheduler = ValidationScheduler::new(Arc::new(validator), config.concurrency_limit);
        CorrectionOrchestrator::new(
            scheduler,
            Arc::clone(&self.repairer),
            self.initial_mode,
            Arc::clone(&self.schema_context),
        )
    }
}

/// Run one session with default engine options
pub async fn run_validation_session(
    candidates: Vec<String>,
    config: SessionConfig,
    engine: Arc<dyn QueryEngineClient>,
    repairer: Arc<dyn RepairGenerator>,
) -> Result<SessionReport> {
    ValidationEngine::new(engine, repairer)
        .run(candidates, config)
        .await
}
