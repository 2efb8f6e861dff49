//! OpenAI-compatible chat completion client.
//!
//! Works against both the OpenAI API and Groq's OpenAI-compatible endpoint —
//! the only difference is the base URL and API key, both captured in
//! [`OpenAiLikeConfig`]. Structured-output calls use `response_format:
//! json_schema` with `strict: true`, matching how the orchestrator, reranker,
//! validator, and query-generator nodes all request output.

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
        ResponseFormat, ResponseFormatJsonSchema,
    },
    Client,
};
use async_trait::async_trait;
use serde_json::Value;

use crate::error::AgentError;
use crate::message::Message;

use super::{CallOptions, LlmClient, LlmResponse, LlmUsage};

/// Provider-agnostic connection details for an OpenAI-compatible endpoint.
#[derive(Clone, Debug)]
pub struct OpenAiLikeConfig {
    pub api_key: String,
    pub api_base: Option<String>,
    pub default_model: String,
}

/// Chat-completions client for any OpenAI-compatible backend (OpenAI, Groq).
pub struct ChatOpenAI {
    config: OpenAiLikeConfig,
}

impl ChatOpenAI {
    pub fn new(config: OpenAiLikeConfig) -> Self {
        Self { config }
    }

    fn client(&self) -> Client<OpenAIConfig> {
        let mut cfg = OpenAIConfig::new().with_api_key(&self.config.api_key);
        if let Some(base) = &self.config.api_base {
            cfg = cfg.with_api_base(base);
        }
        Client::with_config(cfg)
    }

    fn to_request_messages(
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, AgentError> {
        messages
            .iter()
            .map(|m| match m {
                Message::System(s) => ChatCompletionRequestSystemMessageArgs::default()
                    .content(s.clone())
                    .build()
                    .map(Into::into)
                    .map_err(|e| AgentError::Llm(e.to_string())),
                Message::User(s) => ChatCompletionRequestUserMessageArgs::default()
                    .content(s.clone())
                    .build()
                    .map(Into::into)
                    .map_err(|e| AgentError::Llm(e.to_string())),
                Message::Assistant(s) => {
                    async_openai::types::chat::ChatCompletionRequestAssistantMessageArgs::default()
                        .content(s.clone())
                        .build()
                        .map(Into::into)
                        .map_err(|e| AgentError::Llm(e.to_string()))
                }
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for ChatOpenAI {
    async fn invoke(
        &self,
        messages: &[Message],
        options: &CallOptions,
    ) -> Result<LlmResponse, AgentError> {
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(model)
            .messages(Self::to_request_messages(messages)?);
        if let Some(t) = options.temperature {
            builder.temperature(t);
        }
        let request = builder.build().map_err(|e| AgentError::Llm(e.to_string()))?;

        let response = self
            .client()
            .chat()
            .create(request)
            .await
            .map_err(|e| AgentError::Llm(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        let usage = response.usage.map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(LlmResponse { content, usage })
    }

    async fn invoke_structured(
        &self,
        messages: &[Message],
        schema_name: &str,
        schema: &Value,
        options: &CallOptions,
    ) -> Result<(Value, Option<LlmUsage>), AgentError> {
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());

        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: None,
                name: schema_name.to_string(),
                schema: Some(schema.clone()),
                strict: Some(true),
            },
        };

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(model)
            .messages(Self::to_request_messages(messages)?)
            .response_format(response_format);
        if let Some(t) = options.temperature {
            builder.temperature(t);
        }
        let request = builder.build().map_err(|e| AgentError::Llm(e.to_string()))?;

        let response = self
            .client()
            .chat()
            .create(request)
            .await
            .map_err(|e| AgentError::Llm(e.to_string()))?;

        let raw = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| AgentError::Llm("structured response had no content".into()))?;

        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| AgentError::Llm(format!("invalid structured JSON: {e}")))?;

        let usage = response.usage.map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok((value, usage))
    }
}
