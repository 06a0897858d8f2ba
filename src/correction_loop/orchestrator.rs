//! Correction Orchestrator
//!
//! Drives the validate → correct → re-validate rounds of a session until
//! every lineage is either valid or exhausted.

use crate::candidate::{extract_sql, LineageState, SqlCandidate};
use crate::correction_loop::error_classifier::ErrorKind;
use crate::correction_loop::repair::{
    CorrectionContext, RepairGenerator, SchemaContext, REPAIR_FAILED,
};
use crate::error::Result;
use crate::session::ValidationSession;
use crate::validation::{ValidationMode, ValidationScheduler};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

pub struct CorrectionOrchestrator {
    scheduler: ValidationScheduler,
    repairer: Arc<dyn RepairGenerator>,
    mode: ValidationMode,
    schema_context: SchemaContext,
}

impl CorrectionOrchestrator {
    pub fn new(
        scheduler: ValidationScheduler,
        repairer: Arc<dyn RepairGenerator>,
        mode: ValidationMode,
        schema_context: SchemaContext,
    ) -> Self {
        Self {
            scheduler,
            repairer,
            mode,
            schema_context,
        }
    }

    /// Run the session to completion.
    ///
    /// Round 0 validates the generated drafts. Every following round repairs
    /// all invalid lineages at once and validates the repaired batch. A
    /// lineage gets at most `max_attempts` corrections, so the loop ends
    /// after at most `max_attempts` correction rounds.
    pub async fn run(&self, session: &mut ValidationSession) {
        let drafts = session.candidate_set().in_state(LineageState::Generated);
        self.validate_batch(session, drafts).await;

        loop {
            let invalid = session.candidate_set().in_state(LineageState::Invalid);
            if invalid.is_empty() {
                break;
            }

            let round = session.start_round();
            info!(round, lineages = invalid.len(), "starting correction round");

            let corrected = self
                .correct_batch(session, invalid)
                .instrument(info_span!("correction_round", round))
                .await;
            self.validate_batch(session, corrected).await;
        }

        debug!(
            rounds = session.rounds(),
            validations = session.outcomes().len(),
            "correction loop finished"
        );
    }

    async fn validate_batch(&self, session: &mut ValidationSession, batch: Vec<SqlCandidate>) {
        if batch.is_empty() {
            return;
        }

        for candidate in &batch {
            session.begin_validation(candidate.index());
        }
        let outcomes = self.scheduler.validate_all(&batch, self.mode).await;
        session.record_outcomes(outcomes);
    }

    /// Repair every candidate in `invalid`, returning the successors that
    /// should be validated next, in index order.
    async fn correct_batch(
        &self,
        session: &mut ValidationSession,
        invalid: Vec<SqlCandidate>,
    ) -> Vec<SqlCandidate> {
        let mut pending = BTreeSet::new();
        let mut jobs = Vec::with_capacity(invalid.len());

        for candidate in invalid {
            let (error, error_kind) = session
                .latest_outcome(candidate.index())
                .and_then(|o| o.error().map(|e| (e.to_string(), o.error_kind())))
                .unwrap_or_else(|| ("unknown error".to_string(), None));

            let error_kind = error_kind.unwrap_or(ErrorKind::ExecutionError);
            if !error_kind.is_correctable() {
                debug!(candidate = %candidate, kind = %error_kind, "error not correctable");
                session.exhaust(candidate.index(), &error);
                continue;
            }

            let context = CorrectionContext {
                sql: candidate.sql().to_string(),
                error,
                error_kind,
                attempt: candidate.attempt(),
                schema_context: Arc::clone(&self.schema_context),
            };

            session.begin_correction(candidate.index());
            pending.insert(candidate.index());
            jobs.push((candidate, context));
        }

        let semaphore = Arc::new(Semaphore::new(self.scheduler.concurrency_limit()));
        let mut repairs = JoinSet::new();

        for (candidate, context) in jobs {
            let repairer = Arc::clone(&self.repairer);
            let semaphore = Arc::clone(&semaphore);
            let span = info_span!(
                "repair_candidate",
                index = candidate.index(),
                attempt = candidate.attempt(),
                kind = %context.error_kind
            );

            repairs.spawn(
                async move {
                    let result: Result<String> = match semaphore.acquire_owned().await {
                        Ok(_permit) => repairer.repair(&context).await,
                        Err(_) => Ok(String::new()),
                    };
                    (candidate, result)
                }
                .instrument(span),
            );
        }

        let mut repaired = Vec::new();
        while let Some(joined) = repairs.join_next().await {
            match joined {
                Ok((candidate, result)) => {
                    pending.remove(&candidate.index());
                    repaired.push((candidate, result));
                }
                Err(e) => warn!(error = %e, "repair worker did not complete"),
            }
        }
        repaired.sort_by_key(|(candidate, _)| candidate.index());

        let mut successors = Vec::with_capacity(repaired.len());
        for (candidate, result) in repaired {
            let sql = match result {
                Ok(text) => extract_sql(&text),
                Err(e) => {
                    warn!(candidate = %candidate, error = %e, "repair generator failed");
                    None
                }
            };

            match sql {
                Some(sql) => {
                    let next = candidate.corrected(sql);
                    debug!(candidate = %next, "correction applied");
                    session.apply_correction(next.clone());
                    successors.push(next);
                }
                None => {
                    warn!(candidate = %candidate, "no usable repair, lineage exhausted");
                    session.exhaust(candidate.index(), REPAIR_FAILED);
                }
            }
        }

        // workers that panicked never reported back
        for index in pending {
            session.exhaust(index, REPAIR_FAILED);
        }

        successors
    }
}
