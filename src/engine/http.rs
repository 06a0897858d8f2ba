//! HTTP Query Engine
//!
//! Talks to a query engine service over JSON/HTTP:
//! - POST /v1/query       `{sql, project_id, dry_run}`
//! - POST /v1/query/plan  `{sql, project_id, data_source}`
//!
//! Both answer `{columns?, rows?, error?}`. A 400 or 422 with an error body
//! is the engine rejecting the statement. Every other failure status (auth,
//! routing, 408, 429, 5xx) and transport failures mean the engine could not
//! be asked at all.

use crate::engine::{EngineResult, ExecuteResponse, PlanResponse, QueryEngineClient};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_ENGINE_URL: &str = "http://localhost:8080";
const MAX_ERROR_BODY: usize = 512;

/// HTTP query engine client
pub struct HttpQueryEngine {
    base_url: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    sql: &'a str,
    project_id: Option<&'a str>,
    dry_run: bool,
}

#[derive(Debug, Serialize)]
struct PlanRequest<'a> {
    sql: &'a str,
    project_id: Option<&'a str>,
    data_source: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct EngineBody {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpQueryEngine {
    /// Create a client for the engine at `base_url` (e.g. "http://engine:8080").
    ///
    /// No request timeout is set here; each validation call carries its own
    /// deadline.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Create from `QUERY_ENGINE_URL`
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let base_url = std::env::var("QUERY_ENGINE_URL")
            .unwrap_or_else(|_| DEFAULT_ENGINE_URL.to_string());
        Self::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> EngineResult<EngineBody> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "engine request");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        // only 400 and 422 carry the engine's verdict on a statement; any
        // other failure status says nothing about the SQL
        if !status.is_success() && !is_statement_rejection(status) {
            return Err(EngineError::Unavailable(format!(
                "{}: {}",
                status,
                truncate(&text)
            )));
        }

        let parsed = if text.trim().is_empty() {
            Ok(EngineBody::default())
        } else {
            serde_json::from_str::<EngineBody>(&text)
        };

        match (status.is_success(), parsed) {
            (true, Ok(body)) => Ok(body),
            (true, Err(e)) => Err(EngineError::Protocol(format!(
                "invalid JSON from {}: {}",
                url, e
            ))),
            (false, Ok(body)) if body.error.is_some() => Ok(body),
            (false, Ok(_)) => Err(EngineError::Unavailable(format!(
                "{} from {} without an error message",
                status, url
            ))),
            // plain-text rejections from the engine
            (false, Err(_)) => Ok(EngineBody {
                error: Some(truncate(&text)),
                ..EngineBody::default()
            }),
        }
    }
}

#[async_trait]
impl QueryEngineClient for HttpQueryEngine {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(
        &self,
        sql: &str,
        project_id: Option<&str>,
        dry_run: bool,
    ) -> EngineResult<ExecuteResponse> {
        let body = self
            .post(
                "/v1/query",
                &ExecuteRequest {
                    sql,
                    project_id,
                    dry_run,
                },
            )
            .await?;

        Ok(ExecuteResponse {
            columns: body.columns,
            rows: body.rows,
            error: body.error,
        })
    }

    async fn validate_plan(
        &self,
        sql: &str,
        project_id: Option<&str>,
        data_source: &str,
    ) -> EngineResult<PlanResponse> {
        let body = self
            .post(
                "/v1/query/plan",
                &PlanRequest {
                    sql,
                    project_id,
                    data_source,
                },
            )
            .await?;

        Ok(PlanResponse { error: body.error })
    }
}

fn is_statement_rejection(status: StatusCode) -> bool {
    status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY
}

fn truncate(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
