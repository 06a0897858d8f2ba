#![allow(dead_code)]

use async_trait::async_trait;
use sql_correction_engine::{
    CorrectionContext, RepairGenerator, Result, SimulatedEngine, SqlCorrectionError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Repairs from a fixed `failing sql -> reply` table. Unknown statements are
/// a repair failure.
#[derive(Default)]
pub struct ScriptedRepairer {
    replies: HashMap<String, String>,
    calls: AtomicUsize,
    contexts: Mutex<Vec<CorrectionContext>>,
}

impl ScriptedRepairer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, failing_sql: &str, reply: &str) -> Self {
        self.replies.insert(failing_sql.to_string(), reply.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> Vec<CorrectionContext> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl RepairGenerator for ScriptedRepairer {
    async fn repair(&self, context: &CorrectionContext) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().unwrap().push(context.clone());
        self.replies
            .get(&context.sql)
            .cloned()
            .ok_or_else(|| SqlCorrectionError::Llm(format!("no scripted fix for {}", context.sql)))
    }
}

/// Appends a never-existing column on every repair, so nothing ever validates
pub struct StubbornRepairer;

#[async_trait]
impl RepairGenerator for StubbornRepairer {
    async fn repair(&self, context: &CorrectionContext) -> Result<String> {
        Ok(format!("SELECT missing_{} FROM t", context.attempt + 1))
    }
}

pub fn warehouse() -> SimulatedEngine {
    SimulatedEngine::new("warehouse")
        .with_table("t", &["x", "y"])
        .with_table("orders", &["id", "customer_id", "amount", "created_at"])
        .with_table("customers", &["id", "name", "region"])
}
