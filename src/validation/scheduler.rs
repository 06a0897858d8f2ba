//! Validation Scheduler
//!
//! Validates a batch of candidates on a bounded pool of tasks. Every
//! candidate gets exactly one outcome, returned in submission order no matter
//! which worker finishes first.

use crate::candidate::{CandidateKey, SqlCandidate};
use crate::correction_loop::ErrorKind;
use crate::validation::outcome::{ValidationMode, ValidationOutcome};
use crate::validation::validator::Validator;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info_span, warn, Instrument};

pub struct ValidationScheduler {
    validator: Arc<Validator>,
    concurrency_limit: usize,
}

impl ValidationScheduler {
    pub fn new(validator: Arc<Validator>, concurrency_limit: usize) -> Self {
        Self {
            validator,
            concurrency_limit: concurrency_limit.clamp(1, Semaphore::MAX_PERMITS),
        }
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Validate every candidate, at most `concurrency_limit` at a time.
    ///
    /// Candidates must have distinct `(index, attempt)` keys. A slow or
    /// failing candidate never holds back or cancels its siblings.
    pub async fn validate_all(
        &self,
        candidates: &[SqlCandidate],
        mode: ValidationMode,
    ) -> Vec<ValidationOutcome> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let outcomes: Arc<DashMap<CandidateKey, ValidationOutcome>> = Arc::new(DashMap::new());
        let mut workers = JoinSet::new();

        for candidate in candidates.iter().cloned() {
            let validator = Arc::clone(&self.validator);
            let semaphore = Arc::clone(&semaphore);
            let outcomes = Arc::clone(&outcomes);
            let span = info_span!(
                "validate_candidate",
                index = candidate.index(),
                attempt = candidate.attempt(),
                %mode
            );

            workers.spawn(
                async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return;
                    };
                    let key = candidate.key();
                    let outcome = validator.validate(candidate, mode).await;
                    outcomes.insert(key, outcome);
                }
                .instrument(span),
            );
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "validation worker did not complete");
            }
        }

        candidates
            .iter()
            .map(|candidate| {
                outcomes
                    .remove(&candidate.key())
                    .map(|(_, outcome)| outcome)
                    .unwrap_or_else(|| {
                        ValidationOutcome::invalid(
                            candidate.clone(),
                            mode,
                            ErrorKind::InfrastructureError,
                            "validation worker failed",
                            Duration::ZERO,
                        )
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::engine::{
        EngineResult, ExecuteResponse, PlanResponse, QueryEngineClient, SimulatedEngine,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records the highest number of calls in flight at once
    struct GaugeEngine {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl QueryEngineClient for GaugeEngine {
        fn name(&self) -> &str {
            "gauge"
        }

        async fn execute(
            &self,
            _sql: &str,
            _project_id: Option<&str>,
            _dry_run: bool,
        ) -> EngineResult<ExecuteResponse> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ExecuteResponse::default())
        }

        async fn validate_plan(
            &self,
            _sql: &str,
            _project_id: Option<&str>,
            _data_source: &str,
        ) -> EngineResult<PlanResponse> {
            Ok(PlanResponse::default())
        }
    }

    /// Panics on any statement mentioning `boom`
    struct PanickyEngine;

    #[async_trait]
    impl QueryEngineClient for PanickyEngine {
        fn name(&self) -> &str {
            "panicky"
        }

        async fn execute(
            &self,
            sql: &str,
            _project_id: Option<&str>,
            _dry_run: bool,
        ) -> EngineResult<ExecuteResponse> {
            if sql.contains("boom") {
                panic!("engine client bug");
            }
            Ok(ExecuteResponse::default())
        }

        async fn validate_plan(
            &self,
            _sql: &str,
            _project_id: Option<&str>,
            _data_source: &str,
        ) -> EngineResult<PlanResponse> {
            Ok(PlanResponse::default())
        }
    }

    fn scheduler(
        engine: Arc<dyn QueryEngineClient>,
        config: &SessionConfig,
    ) -> ValidationScheduler {
        let validator = Arc::new(Validator::new(engine, config));
        ValidationScheduler::new(validator, config.concurrency_limit)
    }

    #[tokio::test]
    async fn test_respects_concurrency_limit() {
        let engine = Arc::new(GaugeEngine {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let config = SessionConfig {
            concurrency_limit: 2,
            ..SessionConfig::default()
        };
        let candidates: Vec<SqlCandidate> = (0..6)
            .map(|i| SqlCandidate::generated(i, format!("SELECT {}", i)))
            .collect();

        let outcomes = scheduler(engine.clone(), &config)
            .validate_all(&candidates, ValidationMode::FullExecution)
            .await;

        assert_eq!(outcomes.len(), 6);
        assert!(engine.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_outcomes_follow_submission_order() {
        // the first candidate is the slowest, so it finishes last
        let engine = Arc::new(
            SimulatedEngine::new("sim")
                .with_table("t", &["x"])
                .with_latency_for("slow", Duration::from_millis(80)),
        );
        let config = SessionConfig::default();
        let candidates = vec![
            SqlCandidate::generated(0, "SELECT x AS slow FROM t"),
            SqlCandidate::generated(1, "SELECT x FROM t"),
            SqlCandidate::generated(2, "SELECT nope FROM t"),
        ];

        let outcomes = scheduler(engine, &config)
            .validate_all(&candidates, ValidationMode::FullExecution)
            .await;

        let indexes: Vec<usize> = outcomes.iter().map(|o| o.candidate().index()).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert!(outcomes[0].is_valid());
        assert!(outcomes[1].is_valid());
        assert!(!outcomes[2].is_valid());
    }

    #[tokio::test]
    async fn test_panicking_worker_still_yields_outcome() {
        let config = SessionConfig::default();
        let candidates = vec![
            SqlCandidate::generated(0, "SELECT 1"),
            SqlCandidate::generated(1, "SELECT boom"),
            SqlCandidate::generated(2, "SELECT 2"),
        ];

        let outcomes = scheduler(Arc::new(PanickyEngine), &config)
            .validate_all(&candidates, ValidationMode::FullExecution)
            .await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_valid());
        assert_eq!(outcomes[1].error_kind(), Some(ErrorKind::InfrastructureError));
        assert!(outcomes[2].is_valid());
    }

    #[tokio::test]
    async fn test_oversized_limit_is_clamped() {
        let engine = Arc::new(SimulatedEngine::new("sim").with_table("t", &["x"]));
        let validator = Arc::new(Validator::new(engine, &SessionConfig::default()));
        let scheduler = ValidationScheduler::new(validator, usize::MAX);
        assert_eq!(scheduler.concurrency_limit(), Semaphore::MAX_PERMITS);

        let outcomes = scheduler
            .validate_all(
                &[SqlCandidate::generated(0, "SELECT x FROM t")],
                ValidationMode::FullExecution,
            )
            .await;
        assert!(outcomes[0].is_valid());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let engine = Arc::new(SimulatedEngine::new("sim"));
        let outcomes = scheduler(engine, &SessionConfig::default())
            .validate_all(&[], ValidationMode::DryPlan)
            .await;
        assert!(outcomes.is_empty());
    }
}
