//! Candidate SQL
//!
//! Candidates, their lineages and the per-lineage lifecycle. A lineage is
//! every candidate sharing one original `index`; only its newest candidate
//! is ever validated or corrected.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)```(?:[A-Za-z0-9_+-]*[ \t]*\n)?(.*?)```").unwrap();
    static ref SQL_LABEL: Regex = Regex::new(r"(?i)^\s*sql\s*:\s*").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateOrigin {
    Generated,
    Corrected,
}

/// `(index, attempt)`, unique within a session
pub type CandidateKey = (usize, u32);

/// One proposed SQL statement. Never changes once built; a correction
/// produces a new candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlCandidate {
    index: usize,
    sql: String,
    origin: CandidateOrigin,
    attempt: u32,
}

impl SqlCandidate {
    /// A first draft at position `index` of the LLM output
    pub fn generated(index: usize, sql: impl Into<String>) -> Self {
        Self {
            index,
            sql: sql.into(),
            origin: CandidateOrigin::Generated,
            attempt: 0,
        }
    }

    /// The repaired successor of this candidate
    pub fn corrected(&self, sql: impl Into<String>) -> Self {
        Self {
            index: self.index,
            sql: sql.into(),
            origin: CandidateOrigin::Corrected,
            attempt: self.attempt + 1,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn origin(&self) -> CandidateOrigin {
        self.origin
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn key(&self) -> CandidateKey {
        (self.index, self.attempt)
    }
}

impl fmt::Display for SqlCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index, self.attempt)
    }
}

/// Lifecycle of one lineage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineageState {
    Generated,
    Validating,
    Valid,
    Invalid,
    Correcting,
    Exhausted,
}

impl LineageState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LineageState::Valid | LineageState::Exhausted)
    }

    fn can_transition_to(&self, next: LineageState) -> bool {
        use LineageState::*;
        matches!(
            (*self, next),
            (Generated, Validating)
                | (Validating, Valid)
                | (Validating, Invalid)
                | (Invalid, Correcting)
                | (Correcting, Validating)
        ) || (!self.is_terminal() && next == Exhausted)
    }
}

impl fmt::Display for LineageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lineage {
    current: SqlCandidate,
    state: LineageState,
    corrections: u32,
    terminal_error: Option<String>,
}

impl Lineage {
    pub fn index(&self) -> usize {
        self.current.index
    }

    /// The newest candidate of this lineage
    pub fn current(&self) -> &SqlCandidate {
        &self.current
    }

    pub fn state(&self) -> LineageState {
        self.state
    }

    /// Number of `Correcting` transitions taken so far
    pub fn corrections(&self) -> u32 {
        self.corrections
    }

    /// Reason recorded when the lineage was exhausted outside the
    /// validation path (`repair_failed`, `cancelled`)
    pub fn terminal_error(&self) -> Option<&str> {
        self.terminal_error.as_deref()
    }

    /// Move to `next`, or log and stay put when the move is illegal
    fn transition(&mut self, next: LineageState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                candidate = %self.current,
                from = %self.state,
                to = %next,
                "ignoring illegal lineage transition"
            );
            return false;
        }
        self.state = next;
        true
    }
}

/// The candidates of one generation call, one lineage per original index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateSet {
    lineages: Vec<Lineage>,
}

impl CandidateSet {
    /// Build a set from raw LLM strings. Each string is cleaned with
    /// [`extract_sql`]; strings with no SQL in them are kept as empty
    /// candidates so the validator can report them.
    pub fn from_raw<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let lineages = raw
            .into_iter()
            .enumerate()
            .map(|(index, text)| Lineage {
                current: SqlCandidate::generated(
                    index,
                    extract_sql(text.as_ref()).unwrap_or_default(),
                ),
                state: LineageState::Generated,
                corrections: 0,
                terminal_error: None,
            })
            .collect();
        Self { lineages }
    }

    pub fn len(&self) -> usize {
        self.lineages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lineages.is_empty()
    }

    pub fn lineages(&self) -> &[Lineage] {
        &self.lineages
    }

    pub fn lineage(&self, index: usize) -> Option<&Lineage> {
        self.lineages.get(index)
    }

    /// Current candidates of every lineage in `state`, in index order
    pub fn in_state(&self, state: LineageState) -> Vec<SqlCandidate> {
        self.lineages
            .iter()
            .filter(|l| l.state == state)
            .map(|l| l.current.clone())
            .collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.lineages.iter().all(|l| l.state.is_terminal())
    }

    pub(crate) fn begin_validation(&mut self, index: usize) {
        if let Some(lineage) = self.lineages.get_mut(index) {
            lineage.transition(LineageState::Validating);
        }
    }

    /// Apply a validation verdict. An invalid lineage with no correction
    /// budget left is exhausted straight away.
    pub(crate) fn record_verdict(&mut self, index: usize, valid: bool, max_attempts: u32) {
        if let Some(lineage) = self.lineages.get_mut(index) {
            if valid {
                lineage.transition(LineageState::Valid);
                return;
            }
            if lineage.transition(LineageState::Invalid)
                && lineage.current.attempt >= max_attempts
            {
                lineage.transition(LineageState::Exhausted);
            }
        }
    }

    pub(crate) fn begin_correction(&mut self, index: usize) {
        if let Some(lineage) = self.lineages.get_mut(index) {
            if lineage.transition(LineageState::Correcting) {
                lineage.corrections += 1;
            }
        }
    }

    /// Replace the lineage head with its corrected successor
    pub(crate) fn apply_correction(&mut self, candidate: SqlCandidate) {
        if let Some(lineage) = self.lineages.get_mut(candidate.index) {
            if lineage.state != LineageState::Correcting
                || lineage.current.attempt + 1 != candidate.attempt
            {
                tracing::warn!(
                    candidate = %candidate,
                    current = %lineage.current,
                    state = %lineage.state,
                    "ignoring out-of-order correction"
                );
                return;
            }
            lineage.current = candidate;
        }
    }

    pub(crate) fn exhaust(&mut self, index: usize, reason: impl Into<String>) {
        if let Some(lineage) = self.lineages.get_mut(index) {
            if lineage.transition(LineageState::Exhausted) {
                lineage.terminal_error = Some(reason.into());
            }
        }
    }
}

/// Pull a single SQL statement out of raw LLM text.
///
/// Takes the first fenced code block if there is one, drops a leading
/// `SQL:` label and trailing semicolons. Returns `None` when nothing is left.
pub fn extract_sql(raw: &str) -> Option<String> {
    let body = FENCED_BLOCK
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);

    let sql = SQL_LABEL.replace(body.trim(), "");
    let sql = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());

    if sql.is_empty() {
        None
    } else {
        Some(sql.to_string())
    }
}

/// Every SQL statement in an LLM reply that proposes several alternatives in
/// separate fenced blocks. Falls back to the whole reply when unfenced.
pub fn extract_all_sql(raw: &str) -> Vec<String> {
    let fenced: Vec<String> = FENCED_BLOCK
        .captures_iter(raw)
        .filter_map(|c| c.get(0))
        .filter_map(|m| extract_sql(m.as_str()))
        .collect();

    if fenced.is_empty() {
        extract_sql(raw).into_iter().collect()
    } else {
        fenced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_sql_from_fenced_block() {
        let raw = "Here you go:\n```sql\nSELECT id FROM users;\n```\nHope it helps";
        assert_eq!(extract_sql(raw).as_deref(), Some("SELECT id FROM users"));
    }

    #[test]
    fn test_extract_sql_strips_label() {
        assert_eq!(
            extract_sql("SQL: SELECT 1;;").as_deref(),
            Some("SELECT 1")
        );
    }

    #[test]
    fn test_extract_sql_empty() {
        assert_eq!(extract_sql("```sql\n```"), None);
        assert_eq!(extract_sql("   "), None);
    }

    #[test]
    fn test_extract_all_sql() {
        let raw = "```sql\nSELECT a FROM t\n```\nor\n```\nSELECT b FROM t;\n```";
        assert_eq!(
            extract_all_sql(raw),
            vec!["SELECT a FROM t".to_string(), "SELECT b FROM t".to_string()]
        );
        assert_eq!(extract_all_sql("SELECT 1"), vec!["SELECT 1".to_string()]);
    }

    #[test]
    fn test_corrected_keeps_index() {
        let first = SqlCandidate::generated(2, "SELECT x FROM t WHERE");
        let fixed = first.corrected("SELECT x FROM t WHERE y = 1");
        assert_eq!(fixed.index(), 2);
        assert_eq!(fixed.attempt(), 1);
        assert_eq!(fixed.origin(), CandidateOrigin::Corrected);
        assert_eq!(first.attempt(), 0);
    }

    #[test]
    fn test_lineage_lifecycle() {
        let mut set = CandidateSet::from_raw(["SELECT 1", "SELECT oops FROM"]);
        set.begin_validation(0);
        set.begin_validation(1);
        set.record_verdict(0, true, 2);
        set.record_verdict(1, false, 2);
        assert_eq!(set.lineage(0).unwrap().state(), LineageState::Valid);
        assert_eq!(set.lineage(1).unwrap().state(), LineageState::Invalid);

        set.begin_correction(1);
        let next = set.lineage(1).unwrap().current().corrected("SELECT 2");
        set.apply_correction(next);
        assert_eq!(set.lineage(1).unwrap().current().attempt(), 1);
        assert_eq!(set.lineage(1).unwrap().corrections(), 1);
    }

    #[test]
    fn test_no_budget_exhausts_immediately() {
        let mut set = CandidateSet::from_raw(["SELECT broken FROM"]);
        set.begin_validation(0);
        set.record_verdict(0, false, 0);
        assert_eq!(set.lineage(0).unwrap().state(), LineageState::Exhausted);
        assert!(set.all_terminal());
    }

    #[test]
    fn test_illegal_transition_is_ignored() {
        let mut set = CandidateSet::from_raw(["SELECT 1"]);
        set.begin_validation(0);
        set.record_verdict(0, true, 3);

        // a valid lineage never goes back to correction or validation
        set.begin_correction(0);
        set.begin_validation(0);
        set.exhaust(0, "cancelled");
        set.apply_correction(SqlCandidate::generated(0, "SELECT 1").corrected("SELECT 2"));

        let lineage = set.lineage(0).unwrap();
        assert_eq!(lineage.state(), LineageState::Valid);
        assert_eq!(lineage.terminal_error(), None);
        assert_eq!(lineage.corrections(), 0);
        assert_eq!(lineage.current().sql(), "SELECT 1");
    }

    #[test]
    fn test_unextractable_raw_kept_as_empty() {
        let set = CandidateSet::from_raw(["```\n```"]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.lineage(0).unwrap().current().sql(), "");
    }
}
