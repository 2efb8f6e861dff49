//! Conditional validation and single-retry self-correction.
//!
//! Both nodes only run when the graph has already routed here because
//! `confidence < 0.75`; neither re-checks confidence itself. `retry_respond`
//! fires at most once per turn — after it runs, the graph always ends — so
//! there is no risk of an infinite correction loop.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::analytics::AnalyticsWriter;
use crate::config::AgentConfiguration;
use crate::error::AgentError;
use crate::graph::{Next, Node};
use crate::llm::{CallOptions, LlmClient, ReasoningEffort};
use crate::message::Message;
use crate::state::TurnState;
use crate::tracker::{self, CallMetadata, CallTokens};

const VALIDATION_MODEL: &str = "gpt-5-mini";

const VALIDATION_SYSTEM_PROMPT: &str = "You grade the quality of one AI customer-service reply.\n\n\
Criteria: (1) does it directly answer what was asked, (2) is it specific rather than generic, \
(3) does it use the available knowledge-base context, (4) is it professional and well formed, \
(5) does it avoid inventing anything not backed by the context.\n\n\
Scoring: 0.85-1.0 excellent (passed=true); 0.70-0.84 good (passed=true); 0.50-0.69 weak (passed=false, \
needs a retry); 0.0-0.49 poor (passed=false, needs an urgent retry). A reasonably good reply above 0.70 \
should pass even if it isn't perfect.";

fn validation_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "passed": { "type": "boolean" },
            "quality_score": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
            "issues": { "type": "array", "items": { "type": "string" } },
            "suggestions": { "type": "string" }
        },
        "required": ["passed", "quality_score", "issues", "suggestions"],
        "additionalProperties": false
    })
}

#[derive(Deserialize)]
struct ValidationResult {
    passed: bool,
    quality_score: f32,
    issues: Vec<String>,
    suggestions: String,
}

/// Scores the latest assistant reply and decides whether it needs a retry.
pub struct ValidateResponse {
    config: Arc<AgentConfiguration>,
    llm: Arc<dyn LlmClient>,
    writer: Arc<dyn AnalyticsWriter>,
}

impl ValidateResponse {
    pub fn new(config: Arc<AgentConfiguration>, llm: Arc<dyn LlmClient>, writer: Arc<dyn AnalyticsWriter>) -> Self {
        Self { config, llm, writer }
    }
}

#[async_trait]
impl Node<TurnState> for ValidateResponse {
    fn id(&self) -> &str {
        "validate"
    }

    async fn run(&self, mut state: TurnState) -> Result<(TurnState, Next), AgentError> {
        state.record_node(self.id());

        let Some(reply) = state.last_assistant_reply().map(str::to_string) else {
            state.validation_passed = Some(true);
            state.quality_score = 1.0;
            return Ok((state, Next::End));
        };

        let context_info = match &state.retrieved_docs {
            Some(docs) if !docs.is_empty() => {
                let preview: String = docs.join("\n").chars().take(500).collect();
                format!("Knowledge-base context used (preview):\n{preview}...")
            }
            _ => "No knowledge-base context was used.".to_string(),
        };
        let query = state.last_user_message().to_string();
        let validation_input = format!(
            "CUSTOMER QUESTION:\n{query}\n\nASSISTANT REPLY:\n{reply}\n\nCONTEXT:\n{context_info}\n\n\
             Grade the reply against the criteria."
        );

        let schema = validation_schema();
        let meta = CallMetadata {
            business_id: state.business_id.clone(),
            execution_id: Some(state.execution_id.clone()),
            operation_type: "validation".to_string(),
            operation_context: serde_json::json!({
                "node": "validate",
                "conversation_id": state.conversation_id,
                "confidence": state.confidence,
            }),
            provider: self.config.provider.clone(),
            model: VALIDATION_MODEL.to_string(),
            reasoning_effort: Some(ReasoningEffort::Low.as_str().to_string()),
        };
        let llm = self.llm.clone();
        let messages = vec![Message::system(VALIDATION_SYSTEM_PROMPT), Message::user(validation_input)];
        let options = CallOptions::with_effort(ReasoningEffort::Low);
        let result = tracker::track_call(meta, self.writer.as_ref(), move || async move {
            let (value, usage) = llm.invoke_structured(&messages, "validation_result", &schema, &options).await?;
            let usage = usage.unwrap_or_default();
            Ok((
                value,
                CallTokens { input_tokens: usage.prompt_tokens, output_tokens: usage.completion_tokens, cached_tokens: 0, cache_hit: false },
            ))
        })
        .await;

        match result.and_then(|v| serde_json::from_value::<ValidationResult>(v).map_err(|e| AgentError::Llm(e.to_string()))) {
            Ok(v) => {
                state.validation_passed = Some(v.passed);
                state.quality_score = v.quality_score;
                state.validation_issues = v.issues;
                state.validation_feedback = v.suggestions;
            }
            Err(e) => {
                tracing::warn!(error = %e, "validation call failed, assuming the reply passes");
                state.validation_passed = Some(true);
                state.quality_score = 0.8;
                state.validation_issues = vec![format!("validation error: {e}")];
                state.validation_feedback = String::new();
            }
        }

        if state.validation_passed == Some(true) || state.was_retried {
            Ok((state, Next::End))
        } else {
            Ok((state, Next::Node("retry_respond".to_string())))
        }
    }
}

/// Regenerates the reply once, with the validator's feedback folded into the
/// system prompt and a higher reasoning effort than the original `respond`
/// call. Runs through the same [`LlmClient`] abstraction as every other node
/// rather than a second provider: the trait is already provider-agnostic, and
/// nothing else in this crate depends on a Groq-specific client.
pub struct RetryRespond {
    config: Arc<AgentConfiguration>,
    llm: Arc<dyn LlmClient>,
    writer: Arc<dyn AnalyticsWriter>,
}

impl RetryRespond {
    pub fn new(config: Arc<AgentConfiguration>, llm: Arc<dyn LlmClient>, writer: Arc<dyn AnalyticsWriter>) -> Self {
        Self { config, llm, writer }
    }

    fn enhanced_system_prompt(&self, state: &TurnState) -> String {
        let issues = if state.validation_issues.is_empty() {
            "- (no specific issues recorded)".to_string()
        } else {
            state.validation_issues.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n")
        };
        let feedback = if state.validation_feedback.is_empty() {
            "Be more specific and directly answer what was asked."
        } else {
            &state.validation_feedback
        };

        let mut prompt = format!(
            "{}\n\n\
             🔴 CRITICAL — YOUR PREVIOUS REPLY WAS REJECTED FOR LOW QUALITY 🔴\n\n\
             Problems found:\n{issues}\n\n\
             Feedback to improve on:\n{feedback}\n\n\
             For this reply:\n\
             1. Do not repeat the previous answer\n\
             2. Be MORE SPECIFIC with concrete details\n\
             3. Use ALL of the available context\n\
             4. Structure the reply CLEARLY\n\
             5. Answer DIRECTLY what was asked\n\n\
             This is your one chance to improve it. Make it count.",
            self.config.system_prompt,
        );

        if let Some(docs) = &state.retrieved_docs {
            if !docs.is_empty() {
                prompt.push_str(&format!("\n\nRelevant knowledge-base information:\n{}", docs.join("\n\n")));
            }
        }

        prompt
    }
}

#[async_trait]
impl Node<TurnState> for RetryRespond {
    fn id(&self) -> &str {
        "retry_respond"
    }

    async fn run(&self, mut state: TurnState) -> Result<(TurnState, Next), AgentError> {
        state.record_node(self.id());

        let enhanced_prompt = self.enhanced_system_prompt(&state);
        let without_failed_reply: Vec<Message> = {
            let mut without_last_assistant = state.messages.clone();
            if let Some(pos) = without_last_assistant.iter().rposition(|m| matches!(m, Message::Assistant(_))) {
                without_last_assistant.remove(pos);
            }
            without_last_assistant.into_iter().rev().take(5).rev().collect()
        };

        let mut prompt_messages = vec![Message::system(enhanced_prompt)];
        prompt_messages.extend(without_failed_reply);

        let meta = CallMetadata {
            business_id: state.business_id.clone(),
            execution_id: Some(state.execution_id.clone()),
            operation_type: "chat".to_string(),
            operation_context: serde_json::json!({
                "node": "retry_respond",
                "conversation_id": state.conversation_id,
                "is_retry": true,
                "original_quality_score": state.quality_score,
            }),
            provider: self.config.provider.clone(),
            model: self.config.model.clone(),
            reasoning_effort: Some(ReasoningEffort::High.as_str().to_string()),
        };
        let llm = self.llm.clone();
        let options = CallOptions { reasoning_effort: Some(ReasoningEffort::High), temperature: Some(0.3), ..Default::default() };
        let result = tracker::track_call(meta, self.writer.as_ref(), move || async move {
            let response = llm.invoke(&prompt_messages, &options).await?;
            let usage = response.usage.clone().unwrap_or_default();
            Ok((
                response.content,
                CallTokens { input_tokens: usage.prompt_tokens, output_tokens: usage.completion_tokens, cached_tokens: 0, cache_hit: false },
            ))
        })
        .await;

        match result {
            Ok(improved) => state.replace_last_assistant_reply(improved),
            Err(e) => tracing::warn!(error = %e, "retry failed, keeping the original reply"),
        }

        state.was_retried = true;
        Ok((state, Next::End))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::InMemoryAnalyticsWriter;
    use crate::llm::MockLlm;
    use chrono::Utc;

    fn state_with_reply(reply: &str) -> TurnState {
        let mut s = TurnState::new("biz-1", "conv-1", "+5511999999999", None, "exec-1", "what's your return policy?", false, Utc::now());
        s.confidence = 0.5;
        s.messages.push(Message::assistant(reply));
        s
    }

    #[tokio::test]
    async fn no_ai_message_passes_immediately() {
        let llm = Arc::new(MockLlm::with_content("unused"));
        let writer = Arc::new(InMemoryAnalyticsWriter::new());
        let node = ValidateResponse::new(Arc::new(AgentConfiguration::default_for("biz-1")), llm, writer);
        let mut s = TurnState::new("biz-1", "conv-1", "+5511999999999", None, "exec-1", "hi", false, Utc::now());
        s.messages.clear();
        s.messages.push(Message::user("hi"));
        let (out, next) = node.run(s).await.unwrap();
        assert_eq!(out.quality_score, 1.0);
        assert_eq!(next, Next::End);
    }

    #[tokio::test]
    async fn passing_score_ends_the_turn() {
        let llm = Arc::new(MockLlm::with_structured(
            "ignored",
            serde_json::json!({ "passed": true, "quality_score": 0.9, "issues": [], "suggestions": "" }),
        ));
        let writer = Arc::new(InMemoryAnalyticsWriter::new());
        let node = ValidateResponse::new(Arc::new(AgentConfiguration::default_for("biz-1")), llm, writer);
        let (out, next) = node.run(state_with_reply("our policy allows 30-day returns")).await.unwrap();
        assert_eq!(out.validation_passed, Some(true));
        assert_eq!(next, Next::End);
    }

    #[tokio::test]
    async fn failing_score_routes_to_retry() {
        let llm = Arc::new(MockLlm::with_structured(
            "ignored",
            serde_json::json!({ "passed": false, "quality_score": 0.4, "issues": ["too vague"], "suggestions": "add specifics" }),
        ));
        let writer = Arc::new(InMemoryAnalyticsWriter::new());
        let node = ValidateResponse::new(Arc::new(AgentConfiguration::default_for("biz-1")), llm, writer);
        let (out, next) = node.run(state_with_reply("maybe, not sure")).await.unwrap();
        assert_eq!(out.validation_passed, Some(false));
        assert_eq!(next, Next::Node("retry_respond".to_string()));
    }

    #[tokio::test]
    async fn already_retried_ends_even_on_failing_score() {
        let llm = Arc::new(MockLlm::with_structured(
            "ignored",
            serde_json::json!({ "passed": false, "quality_score": 0.3, "issues": [], "suggestions": "" }),
        ));
        let writer = Arc::new(InMemoryAnalyticsWriter::new());
        let node = ValidateResponse::new(Arc::new(AgentConfiguration::default_for("biz-1")), llm, writer);
        let mut s = state_with_reply("second attempt");
        s.was_retried = true;
        let (_, next) = node.run(s).await.unwrap();
        assert_eq!(next, Next::End);
    }

    #[tokio::test]
    async fn validation_call_failure_fails_open() {
        let llm = Arc::new(MockLlm::with_content("no structured response configured"));
        let writer = Arc::new(InMemoryAnalyticsWriter::new());
        let node = ValidateResponse::new(Arc::new(AgentConfiguration::default_for("biz-1")), llm, writer);
        let (out, next) = node.run(state_with_reply("a reply")).await.unwrap();
        assert_eq!(out.validation_passed, Some(true));
        assert_eq!(out.quality_score, 0.8);
        assert_eq!(next, Next::End);
    }

    #[tokio::test]
    async fn retry_replaces_last_reply_and_marks_retried() {
        let llm = Arc::new(MockLlm::with_content("a much more specific answer"));
        let writer = Arc::new(InMemoryAnalyticsWriter::new());
        let node = RetryRespond::new(Arc::new(AgentConfiguration::default_for("biz-1")), llm, writer);
        let mut s = state_with_reply("vague answer");
        s.validation_feedback = "be specific".to_string();
        s.validation_issues = vec!["too vague".to_string()];
        let (out, next) = node.run(s).await.unwrap();
        assert_eq!(out.last_assistant_reply(), Some("a much more specific answer"));
        assert!(out.was_retried);
        assert_eq!(next, Next::End);
    }

    #[tokio::test]
    async fn retry_keeps_original_reply_on_llm_failure() {
        let llm = Arc::new(MockLlm::with_error("boom"));
        let writer = Arc::new(InMemoryAnalyticsWriter::new());
        let node = RetryRespond::new(Arc::new(AgentConfiguration::default_for("biz-1")), llm, writer);
        let (out, _) = node.run(state_with_reply("original answer")).await.unwrap();
        assert_eq!(out.last_assistant_reply(), Some("original answer"));
        assert!(out.was_retried);
    }
}
