//! Answer generation: prompt construction and the LLM client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use regex::{Captures, Regex};
use serde_json::{Value, json};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

use crate::error::{Collaborator, CollaboratorError, ConfigError};
use crate::query::{ChatMessage, recent};
use crate::search::RankedResult;

/// Financial-analyst QA prompt. `{context}`, `{chat_history}` and
/// `{question}` are substituted by [`PromptBuilder::build`].
pub const QA_TEMPLATE: &str = "\
You are a precise financial analyst. Your goal is to provide accurate numerical calculations based on the data provided.

Context Information:
{context}

Chat History:
{chat_history}

Current Question: {question}

Instructions:
1. For financial calculations, always:
   - Use exact numbers from the data
   - Show the final percentage with 2 decimal places
   - For percentage changes: ((New Value - Old Value) / Old Value) * 100
2. When calculating year-over-year changes:
   - Clearly identify the base year and comparison year
   - Use the earlier year as the base for percentage calculations
3. For currency values:
   - Use the exact numbers, ignoring currency symbols
   - Maintain precision in calculations
4. When analyzing trends:
   - Consider the full context provided
   - Note any significant changes or patterns
   - Explain any unusual variations

Your response should be:
- Precise and data-driven
- Include the exact calculation used
- Show the final percentage with 2 decimal places
- Explain any significant context from the data

Please provide your response:";

/// Shown in place of chat history when there is none.
pub const NO_HISTORY: &str = "No previous conversation.";

/// Chat messages included in the prompt.
pub const PROMPT_HISTORY_MESSAGES: usize = 3;

static TEMPLATE_SLOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(context|chat_history|question)\}").expect("slot pattern is valid")
});

/// Produces an answer for a fully rendered prompt.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, CollaboratorError>;

    fn model_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Prompt construction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    admission_threshold: f64,
    history_window: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(0.5, PROMPT_HISTORY_MESSAGES)
    }
}

impl PromptBuilder {
    pub fn new(admission_threshold: f64, history_window: usize) -> Self {
        Self {
            admission_threshold,
            history_window,
        }
    }

    /// Results scoring above the admission threshold, each prefixed with its
    /// relevance, separated by `---` lines.
    pub fn prepare_context(&self, results: &[RankedResult]) -> String {
        results
            .iter()
            .filter(|r| r.combined_score > self.admission_threshold)
            .map(|r| format!("[Relevance: {:.2}]\n{}\n", r.combined_score, r.document.content))
            .collect::<Vec<_>>()
            .join("\n---\n")
    }

    /// The last few messages as `Role: content` lines.
    pub fn format_chat_history(&self, history: &[ChatMessage]) -> String {
        if history.is_empty() {
            return NO_HISTORY.to_string();
        }
        recent(history, self.history_window)
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Fill every template slot in one pass; substituted text is never
    /// rescanned for slots.
    pub fn build(&self, context: &str, history: &[ChatMessage], question: &str) -> String {
        let chat_history = self.format_chat_history(history);
        TEMPLATE_SLOT
            .replace_all(QA_TEMPLATE, |caps: &Captures| match &caps[1] {
                "context" => context.to_string(),
                "chat_history" => chat_history.clone(),
                _ => question.to_string(),
            })
            .into_owned()
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible client
// ---------------------------------------------------------------------------

/// Configuration for the answer-generation model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Defaults to the public OpenAI endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "gpt-4-turbo-preview".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> usize {
    2000
}
fn default_timeout_secs() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    timeout_secs: u64,
}

impl OpenAiGenerator {
    /// Build a client, reading the API key from `config.api_key_env`.
    pub fn from_config(config: &LlmConfig) -> Result<Self, crate::error::FinragError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| ConfigError::EnvVarMissing {
            var: config.api_key_env.clone(),
        })?;
        Ok(Self::new_with_key(config, api_key)?)
    }

    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CollaboratorError::Unavailable {
                source_kind: Collaborator::Generator,
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_secs: config.timeout_secs,
        })
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        })
    }

    /// Text of the first choice of a chat completion response.
    fn parse_completion(body: &Value) -> Result<String, CollaboratorError> {
        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| CollaboratorError::InvalidResponse {
                source_kind: Collaborator::Generator,
                message: "No message content in response".to_string(),
            })
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, CollaboratorError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %self.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| {
                CollaboratorError::from_transport(Collaborator::Generator, &e, self.timeout_secs)
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            CollaboratorError::from_transport(Collaborator::Generator, &e, self.timeout_secs)
        })?;

        if !status.is_success() {
            return Err(CollaboratorError::from_http_status(
                Collaborator::Generator,
                status.as_u16(),
                &body,
            ));
        }

        let json: Value =
            serde_json::from_str(&body).map_err(|e| CollaboratorError::InvalidResponse {
                source_kind: Collaborator::Generator,
                message: format!("Invalid JSON: {}", e),
            })?;
        Self::parse_completion(&json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
