//! Session Configuration
//!
//! Per-request options for one validation session. Everything a session
//! needs is carried here explicitly; nothing is read from globals once a
//! session has started.

use crate::error::{Result, SqlCorrectionError};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Semaphore;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_TIMEOUT_PER_CALL: Duration = Duration::from_secs(30);
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 8;
pub const DEFAULT_DATA_SOURCE: &str = "default";

/// Recognized options of a validation session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of correction rounds applied to any lineage
    pub max_attempts: u32,

    /// Deadline for each individual engine call
    #[serde(rename = "timeout_per_call_ms", with = "millis")]
    pub timeout_per_call: Duration,

    /// Maximum number of validations (or repairs) in flight at once
    pub concurrency_limit: usize,

    /// Retry once with a dry plan when full execution fails for
    /// infrastructure reasons
    pub allow_dry_plan_fallback: bool,

    /// Target data source, forwarded to the plan endpoint
    pub data_source: String,

    /// Engine project, if the data source is multi-tenant
    pub project_id: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout_per_call: DEFAULT_TIMEOUT_PER_CALL,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            allow_dry_plan_fallback: true,
            data_source: DEFAULT_DATA_SOURCE.to_string(),
            project_id: None,
        }
    }
}

impl SessionConfig {
    pub fn new(data_source: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into(),
            ..Self::default()
        }
    }

    /// Load configuration from the environment (and `.env`, if present)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        if let Some(value) = env_var("SQL_CORRECTION_MAX_ATTEMPTS") {
            config.max_attempts = parse_var("SQL_CORRECTION_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = env_var("SQL_CORRECTION_TIMEOUT_MS") {
            let ms: u64 = parse_var("SQL_CORRECTION_TIMEOUT_MS", &value)?;
            config.timeout_per_call = Duration::from_millis(ms);
        }
        if let Some(value) = env_var("SQL_CORRECTION_CONCURRENCY") {
            config.concurrency_limit = parse_var("SQL_CORRECTION_CONCURRENCY", &value)?;
        }
        if let Some(value) = env_var("SQL_CORRECTION_ALLOW_DRY_PLAN_FALLBACK") {
            config.allow_dry_plan_fallback =
                parse_flag("SQL_CORRECTION_ALLOW_DRY_PLAN_FALLBACK", &value)?;
        }
        if let Some(value) = env_var("SQL_CORRECTION_DATA_SOURCE") {
            config.data_source = value;
        }
        config.project_id = env_var("SQL_CORRECTION_PROJECT_ID");

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations a session cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.timeout_per_call.is_zero() {
            return Err(SqlCorrectionError::Config(
                "timeout_per_call must be greater than zero".to_string(),
            ));
        }
        if self.concurrency_limit == 0 {
            return Err(SqlCorrectionError::Config(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.concurrency_limit > Semaphore::MAX_PERMITS {
            return Err(SqlCorrectionError::Config(format!(
                "concurrency_limit must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.data_source.trim().is_empty() {
            return Err(SqlCorrectionError::Config(
                "data_source must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse::<T>()
        .map_err(|e| SqlCorrectionError::Config(format!("{}={:?}: {}", name, value, e)))
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(SqlCorrectionError::Config(format!(
            "{}={:?}: expected a boolean",
            name, other
        ))),
    }
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
