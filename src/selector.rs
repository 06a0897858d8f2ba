//! Result Selector
//!
//! Picks the accepted candidate of a finished session: the valid outcome
//! with the smallest `(attempt, index)`. The result depends only on which
//! outcomes exist, never on the order they were recorded in.

use crate::candidate::{CandidateSet, LineageState};
use crate::correction_loop::{ErrorKind, REPAIR_FAILED};
use crate::session::ValidationSession;
use crate::validation::ValidationOutcome;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Last error seen for one lineage that never validated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub original_index: usize,
    pub last_error: String,
    pub error_kind: Option<ErrorKind>,
    /// Newest SQL of the lineage
    pub last_sql: String,
    /// Corrections applied to the lineage
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub accepted: Option<ValidationOutcome>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Selection {
    pub fn is_accepted(&self) -> bool {
        self.accepted.is_some()
    }
}

pub struct ResultSelector;

impl ResultSelector {
    pub fn select(session: &ValidationSession) -> Selection {
        Self::select_from(session.outcomes(), session.candidate_set())
    }

    /// Select over an arbitrary outcome list for `candidates`
    pub fn select_from(outcomes: &[ValidationOutcome], candidates: &CandidateSet) -> Selection {
        let accepted = outcomes
            .iter()
            .filter(|o| o.is_valid())
            .min_by_key(|o| (o.candidate().attempt(), o.candidate().index()))
            .cloned();

        Selection {
            accepted,
            diagnostics: Self::diagnostics(outcomes, candidates),
        }
    }

    /// One diagnostic per lineage that did not end valid, in index order
    pub fn diagnostics(
        outcomes: &[ValidationOutcome],
        candidates: &CandidateSet,
    ) -> Vec<Diagnostic> {
        let latest = outcomes
            .iter()
            .into_group_map_by(|o| o.candidate().index())
            .into_iter()
            .filter_map(|(index, group)| {
                group
                    .into_iter()
                    .max_by_key(|o| o.candidate().attempt())
                    .map(|o| (index, o))
            })
            .collect::<std::collections::HashMap<_, _>>();

        candidates
            .lineages()
            .iter()
            .filter(|l| l.state() != LineageState::Valid)
            .map(|lineage| {
                let outcome = latest.get(&lineage.index());
                let (last_error, error_kind) = match lineage.terminal_error() {
                    Some(reason) if reason == REPAIR_FAILED => {
                        (reason.to_string(), Some(ErrorKind::RepairFailed))
                    }
                    Some(reason) => (reason.to_string(), Some(ErrorKind::Exhausted)),
                    None => (
                        outcome
                            .and_then(|o| o.error())
                            .unwrap_or("not validated")
                            .to_string(),
                        outcome.and_then(|o| o.error_kind()),
                    ),
                };

                Diagnostic {
                    original_index: lineage.index(),
                    last_error,
                    error_kind,
                    last_sql: lineage.current().sql().to_string(),
                    attempts: lineage.corrections(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::SqlCandidate;
    use crate::validation::ValidationMode;
    use std::time::Duration;

    fn valid(candidate: SqlCandidate) -> ValidationOutcome {
        ValidationOutcome::valid(
            candidate,
            ValidationMode::FullExecution,
            Vec::new(),
            Duration::ZERO,
        )
    }

    fn invalid(candidate: SqlCandidate, error: &str) -> ValidationOutcome {
        ValidationOutcome::invalid(
            candidate,
            ValidationMode::FullExecution,
            ErrorKind::SchemaReferenceError,
            error,
            Duration::ZERO,
        )
    }

    #[test]
    fn test_original_preferred_over_correction() {
        let first = SqlCandidate::generated(0, "SELECT a FROM t");
        let second = SqlCandidate::generated(1, "SELECT x FROM t");
        let outcomes = vec![
            invalid(first.clone(), "column 'a' does not exist"),
            valid(second.clone()),
            valid(first.corrected("SELECT x, y FROM t")),
        ];
        let set = CandidateSet::from_raw(["SELECT a FROM t", "SELECT x FROM t"]);

        let selection = ResultSelector::select_from(&outcomes, &set);
        let accepted = selection.accepted.unwrap();
        assert_eq!(accepted.candidate(), &second);
    }

    #[test]
    fn test_lower_index_wins_at_same_attempt() {
        let outcomes = vec![
            valid(SqlCandidate::generated(3, "SELECT 3")),
            valid(SqlCandidate::generated(1, "SELECT 1")),
        ];
        let set = CandidateSet::from_raw(["a", "SELECT 1", "b", "SELECT 3"]);

        let selection = ResultSelector::select_from(&outcomes, &set);
        assert_eq!(selection.accepted.unwrap().candidate().index(), 1);
    }

    #[test]
    fn test_failure_reports_latest_error_per_lineage() {
        let first = SqlCandidate::generated(0, "SELECT a FROM t");
        let outcomes = vec![
            invalid(first.corrected("SELECT b FROM t"), "column 'b' does not exist"),
            invalid(first, "column 'a' does not exist"),
        ];
        let set = CandidateSet::from_raw(["SELECT a FROM t"]);

        let selection = ResultSelector::select_from(&outcomes, &set);
        assert!(!selection.is_accepted());
        assert_eq!(selection.diagnostics.len(), 1);
        assert_eq!(selection.diagnostics[0].last_error, "column 'b' does not exist");
        assert_eq!(
            selection.diagnostics[0].error_kind,
            Some(ErrorKind::SchemaReferenceError)
        );
    }

    #[test]
    fn test_unvalidated_lineage_still_diagnosed() {
        let set = CandidateSet::from_raw(["SELECT 1", "SELECT 2"]);
        let selection = ResultSelector::select_from(&[], &set);
        assert_eq!(selection.diagnostics.len(), 2);
        assert_eq!(selection.diagnostics[1].original_index, 1);
        assert_eq!(selection.diagnostics[1].last_error, "not validated");
    }
}
