use crate::correction_loop::{build_correction_prompt, CorrectionContext, RepairGenerator};
use crate::error::{Result, SqlCorrectionError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4";

const SYSTEM_PROMPT: &str = "You are a SQL repair assistant. Fix the failing SQL statement so it \
                             runs against the given schema. Return only SQL, no other text.";

/// OpenAI-compatible chat completion client
#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    client: Client,
}

impl LlmClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        })
    }

    /// Read `OPENAI_API_KEY`, `OPENAI_MODEL` and `OPENAI_BASE_URL`
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| SqlCorrectionError::Config("OPENAI_API_KEY is not set".to_string()))?;
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        Self::new(api_key, model, base_url)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn call_llm(&self, system: &str, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
            "max_tokens": 1000
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SqlCorrectionError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SqlCorrectionError::Llm(format!(
                "LLM API returned {}: {}",
                status,
                text.trim()
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SqlCorrectionError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| SqlCorrectionError::Llm("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

/// Repairs candidates by asking an LLM for a corrected statement
pub struct LlmRepairGenerator {
    llm: LlmClient,
}

impl LlmRepairGenerator {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(LlmClient::from_env()?))
    }
}

#[async_trait]
impl RepairGenerator for LlmRepairGenerator {
    async fn repair(&self, context: &CorrectionContext) -> Result<String> {
        let prompt = build_correction_prompt(context);
        debug!(model = self.llm.model(), kind = %context.error_kind, "requesting sql repair");
        self.llm.call_llm(SYSTEM_PROMPT, &prompt).await
    }
}
