//! Fixed-response LLM client for node unit tests.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

use crate::error::AgentError;
use crate::message::Message;

use super::{CallOptions, LlmClient, LlmResponse, LlmUsage};

/// Returns a fixed text response, or a fixed JSON value for structured calls.
/// Records every prompt it was invoked with, for assertions in node tests.
pub struct MockLlm {
    content: String,
    structured: Option<Value>,
    error: Option<String>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockLlm {
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            structured: None,
            error: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_structured(content: impl Into<String>, structured: Value) -> Self {
        Self {
            content: content.into(),
            structured: Some(structured),
            error: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A client that fails every call, for exercising error-handling paths.
    pub fn with_error(message: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            structured: None,
            error: Some(message.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_messages(&self) -> Option<Vec<Message>> {
        self.calls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(
        &self,
        messages: &[Message],
        _options: &CallOptions,
    ) -> Result<LlmResponse, AgentError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if let Some(e) = &self.error {
            return Err(AgentError::Llm(e.clone()));
        }
        Ok(LlmResponse {
            content: self.content.clone(),
            usage: Some(LlmUsage {
                prompt_tokens: 10,
                completion_tokens: 10,
                total_tokens: 20,
            }),
        })
    }

    async fn invoke_structured(
        &self,
        messages: &[Message],
        _schema_name: &str,
        _schema: &Value,
        _options: &CallOptions,
    ) -> Result<(Value, Option<LlmUsage>), AgentError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if let Some(e) = &self.error {
            return Err(AgentError::Llm(e.clone()));
        }
        let value = self
            .structured
            .clone()
            .ok_or_else(|| AgentError::Llm("MockLlm has no structured response set".into()))?;
        Ok((
            value,
            Some(LlmUsage {
                prompt_tokens: 10,
                completion_tokens: 10,
                total_tokens: 20,
            }),
        ))
    }
}
