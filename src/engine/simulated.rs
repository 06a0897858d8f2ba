//! Simulated Query Engine
//!
//! An in-process engine over an in-memory catalog. Statements are parsed with
//! sqlparser; every referenced table must be in the catalog and every column
//! must belong to one of the referenced tables (or be an alias). Only
//! read-only queries are accepted.
//!
//! Latency and infrastructure failures can be injected, which makes it the
//! engine of choice for tests and offline runs.

use crate::engine::{EngineResult, ExecuteResponse, PlanResponse, QueryEngineClient};
use crate::error::EngineError;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::ast::{visit_expressions, visit_relations, Expr, SelectItem, SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

lazy_static! {
    static ref AS_ALIAS: Regex = Regex::new(r#"(?i)\bAS\s+["`]?([A-Za-z_][A-Za-z0-9_]*)"#).unwrap();
    static ref CTE_NAME: Regex = Regex::new(r"(?i)\b([A-Za-z_][A-Za-z0-9_]*)\s+AS\s*\(").unwrap();
}

/// Simulated engine
pub struct SimulatedEngine {
    name: String,
    catalog: HashMap<String, BTreeSet<String>>,
    supports_dry_run: bool,
    latency: Duration,
    slow_statements: Vec<(String, Duration)>,
    execution_failure: Option<String>,
    plan_failure: Option<String>,
    execute_calls: AtomicUsize,
    plan_calls: AtomicUsize,
}

impl SimulatedEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            catalog: HashMap::new(),
            supports_dry_run: true,
            latency: Duration::ZERO,
            slow_statements: Vec::new(),
            execution_failure: None,
            plan_failure: None,
            execute_calls: AtomicUsize::new(0),
            plan_calls: AtomicUsize::new(0),
        }
    }

    /// Register a table and its columns
    pub fn with_table(mut self, table: &str, columns: &[&str]) -> Self {
        self.catalog.insert(
            table.to_lowercase(),
            columns.iter().map(|c| c.to_lowercase()).collect(),
        );
        self
    }

    /// Answer every dry-run `execute` with a "not supported" error
    pub fn without_dry_run(mut self) -> Self {
        self.supports_dry_run = false;
        self
    }

    /// Delay applied to every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Extra delay for statements containing `fragment`
    pub fn with_latency_for(mut self, fragment: &str, latency: Duration) -> Self {
        self.slow_statements.push((fragment.to_string(), latency));
        self
    }

    /// Fail every `execute` call as if the engine were down
    pub fn failing_execution(mut self, message: &str) -> Self {
        self.execution_failure = Some(message.to_string());
        self
    }

    /// Fail every `validate_plan` call as if the engine were down
    pub fn failing_plan(mut self, message: &str) -> Self {
        self.plan_failure = Some(message.to_string());
        self
    }

    pub fn execute_calls(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    pub fn plan_calls(&self) -> usize {
        self.plan_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self, sql: &str) {
        let extra = self
            .slow_statements
            .iter()
            .filter(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, latency)| *latency)
            .max()
            .unwrap_or(Duration::ZERO);

        let total = self.latency + extra;
        if !total.is_zero() {
            tokio::time::sleep(total).await;
        }
    }

    /// Check a statement against the catalog, returning its output columns
    pub fn check(&self, sql: &str) -> std::result::Result<Vec<String>, String> {
        let statements = Parser::parse_sql(&GenericDialect {}, sql)
            .map_err(|e| format!("syntax error: {}", e))?;

        if statements.is_empty() {
            return Err("syntax error: empty sql statement".to_string());
        }
        if statements.len() > 1 {
            return Err(format!(
                "expected a single statement, got {}",
                statements.len()
            ));
        }
        if !matches!(statements[0], Statement::Query(_)) {
            return Err("only read-only queries are permitted".to_string());
        }

        let aliases = collect_aliases(sql);

        let mut tables: Vec<String> = Vec::new();
        let missing_table = visit_relations(&statements, |relation| {
            let table = relation
                .0
                .last()
                .map(|ident| ident.value.to_lowercase())
                .unwrap_or_default();
            if self.catalog.contains_key(&table) {
                if !tables.contains(&table) {
                    tables.push(table);
                }
                ControlFlow::Continue(())
            } else if aliases.contains(&table) {
                ControlFlow::Continue(())
            } else {
                ControlFlow::Break(relation.to_string())
            }
        });
        if let ControlFlow::Break(table) = missing_table {
            return Err(format!("table '{}' does not exist", table));
        }

        let known_columns: HashSet<String> = tables
            .iter()
            .filter_map(|t| self.catalog.get(t))
            .flat_map(|cols| cols.iter().cloned())
            .collect();

        let missing_column = visit_expressions(&statements, |expr| {
            let column = match expr {
                Expr::Identifier(ident) => ident.value.to_lowercase(),
                Expr::CompoundIdentifier(parts) => match parts.last() {
                    Some(ident) => ident.value.to_lowercase(),
                    None => return ControlFlow::Continue(()),
                },
                _ => return ControlFlow::Continue(()),
            };
            if known_columns.contains(&column) || aliases.contains(&column) {
                ControlFlow::Continue(())
            } else {
                ControlFlow::Break(column)
            }
        });
        if let ControlFlow::Break(column) = missing_column {
            return Err(format!("column '{}' does not exist", column));
        }

        Ok(self.output_columns(&statements[0], &tables))
    }

    fn output_columns(&self, statement: &Statement, tables: &[String]) -> Vec<String> {
        let Statement::Query(query) = statement else {
            return Vec::new();
        };
        let SetExpr::Select(select) = query.body.as_ref() else {
            return Vec::new();
        };

        let mut columns = Vec::new();
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(Expr::Identifier(ident)) => {
                    columns.push(ident.value.clone())
                }
                SelectItem::UnnamedExpr(Expr::CompoundIdentifier(parts)) => {
                    if let Some(ident) = parts.last() {
                        columns.push(ident.value.clone());
                    }
                }
                SelectItem::UnnamedExpr(expr) => columns.push(expr.to_string()),
                SelectItem::ExprWithAlias { alias, .. } => columns.push(alias.value.clone()),
                SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                    for table in tables {
                        if let Some(cols) = self.catalog.get(table) {
                            columns.extend(cols.iter().cloned());
                        }
                    }
                }
            }
        }
        columns
    }
}

fn collect_aliases(sql: &str) -> HashSet<String> {
    AS_ALIAS
        .captures_iter(sql)
        .chain(CTE_NAME.captures_iter(sql))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

#[async_trait]
impl QueryEngineClient for SimulatedEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        sql: &str,
        _project_id: Option<&str>,
        dry_run: bool,
    ) -> EngineResult<ExecuteResponse> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency(sql).await;

        if let Some(message) = &self.execution_failure {
            return Err(EngineError::Unavailable(message.clone()));
        }

        if dry_run && !self.supports_dry_run {
            return Ok(ExecuteResponse {
                error: Some(format!(
                    "dry run is not supported for data source '{}'",
                    self.name
                )),
                ..ExecuteResponse::default()
            });
        }

        match self.check(sql) {
            Ok(columns) => Ok(ExecuteResponse {
                columns,
                rows: Vec::new(),
                error: None,
            }),
            Err(error) => Ok(ExecuteResponse {
                error: Some(error),
                ..ExecuteResponse::default()
            }),
        }
    }

    async fn validate_plan(
        &self,
        sql: &str,
        _project_id: Option<&str>,
        _data_source: &str,
    ) -> EngineResult<PlanResponse> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency(sql).await;

        if let Some(message) = &self.plan_failure {
            return Err(EngineError::Unavailable(message.clone()));
        }

        Ok(PlanResponse {
            error: self.check(sql).err(),
        })
    }
}
