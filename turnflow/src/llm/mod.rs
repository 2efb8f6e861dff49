//! LLM client abstraction used by every graph node that calls an LLM.
//!
//! Two backends exist in production: an OpenAI-style client (Responses API,
//! reasoning-effort and verbosity controls, strict JSON schema output) and a
//! Groq-style client (OpenAI-compatible Chat Completions wire format, also
//! accepting `reasoning.effort`). Both implement [`LlmClient`]; nodes depend
//! only on the trait and a model name, never on a provider directly.

mod mock;
mod openai;

pub use mock::MockLlm;
pub use openai::{ChatOpenAI, OpenAiLikeConfig};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AgentError;
use crate::message::Message;

/// Reasoning effort hint passed to reasoning-capable models (GPT-5 family,
/// Groq `openai/gpt-oss-*`). Providers that don't support the parameter ignore it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReasoningEffort {
    Minimal,
    #[default]
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasoningEffort::Minimal => "minimal",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

/// Token usage for one LLM call (prompt + completion).
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Response from a free-text completion.
#[derive(Clone, Debug, Default)]
pub struct LlmResponse {
    pub content: String,
    pub usage: Option<LlmUsage>,
}

/// Options threaded into a single [`LlmClient`] call: model override, reasoning
/// effort, and temperature. `None` fields fall back to the client's defaults.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    pub model: Option<String>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub temperature: Option<f32>,
}

impl CallOptions {
    pub fn with_effort(effort: ReasoningEffort) -> Self {
        Self {
            reasoning_effort: Some(effort),
            ..Default::default()
        }
    }
}

/// LLM client: given messages, returns assistant text, or a schema-validated
/// JSON value for structured-output calls (orchestrator, reranker, validator,
/// query generator, summarizer).
///
/// **Interaction**: every graph node that talks to an LLM depends on this trait,
/// never on a concrete provider, so tests substitute [`MockLlm`].
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Free-text completion (used by greet/handoff/respond/retry_respond).
    async fn invoke(
        &self,
        messages: &[Message],
        options: &CallOptions,
    ) -> Result<LlmResponse, AgentError>;

    /// Structured-output completion: the model is constrained to the given JSON
    /// schema (`schema_name`/`schema`) and the raw parsed JSON is returned.
    /// A schema violation or non-JSON response is an `AgentError::Llm`, not a
    /// value to defensively re-parse by hand.
    async fn invoke_structured(
        &self,
        messages: &[Message],
        schema_name: &str,
        schema: &Value,
        options: &CallOptions,
    ) -> Result<(Value, Option<LlmUsage>), AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_llm_returns_configured_content() {
        let llm = MockLlm::with_content("hello");
        let resp = llm
            .invoke(&[Message::user("hi")], &CallOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.content, "hello");
    }
}
