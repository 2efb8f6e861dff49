//! Generates the customer-facing reply: composes the full layered prompt,
//! calls the configured model, and appends the assistant message.
//!
//! Never answers from thin air: if the orchestrator decided knowledge-base
//! context was needed and retrieval came back empty, the prompt gets the
//! anti-hallucination guardrail prefixed instead of being skipped — the
//! model itself is the one that states it has no information.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::analytics::AnalyticsWriter;
use crate::config::AgentConfiguration;
use crate::conversation_memory::ConversationMemory;
use crate::error::AgentError;
use crate::graph::{Next, Node};
use crate::llm::{CallOptions, LlmClient};
use crate::message::Message;
use crate::prompts::{MemoryContext, PromptComposer, SpecializedPrompt};
use crate::state::TurnState;
use crate::tracker::{self, CallMetadata, CallTokens};

const GENERATION_FAILURE_MESSAGE: &str =
    "I'm sorry, I ran into a problem processing your message. Could you try again?";

pub struct Respond {
    config: Arc<AgentConfiguration>,
    llm: Arc<dyn LlmClient>,
    writer: Arc<dyn AnalyticsWriter>,
    conversation_memory: Arc<ConversationMemory>,
}

impl Respond {
    pub fn new(
        config: Arc<AgentConfiguration>,
        llm: Arc<dyn LlmClient>,
        writer: Arc<dyn AnalyticsWriter>,
        conversation_memory: Arc<ConversationMemory>,
    ) -> Self {
        Self { config, llm, writer, conversation_memory }
    }
}

#[async_trait]
impl Node<TurnState> for Respond {
    fn id(&self) -> &str {
        "respond"
    }

    async fn run(&self, mut state: TurnState) -> Result<(TurnState, Next), AgentError> {
        state.record_node(self.id());

        let needs_guardrail = state.needs_knowledge_base
            && state.retrieved_docs.as_ref().map_or(true, |docs| docs.is_empty());

        let now = Utc::now();
        let summary = self
            .conversation_memory
            .get_or_create_summary(&state.conversation_id, &state.messages, &state.business_id, Some(&state.execution_id), now)
            .await;
        let memory_ctx = summary.as_ref().map(|s| MemoryContext { summary_text: &s.text });

        let system_prompt = if needs_guardrail {
            PromptComposer::compose_guardrail_prefixed_prompt(&self.config, &state, memory_ctx, now)
        } else {
            PromptComposer::compose_full_prompt(&self.config, &state, memory_ctx, now)
        };

        let recent: Vec<Message> = state.messages.iter().rev().take(5).rev().cloned().collect();
        let mut prompt_messages = vec![Message::system(system_prompt)];
        prompt_messages.extend(recent);

        let meta = CallMetadata {
            business_id: state.business_id.clone(),
            execution_id: Some(state.execution_id.clone()),
            operation_type: "chat".to_string(),
            operation_context: serde_json::json!({
                "node": "respond",
                "conversation_id": state.conversation_id,
                "guardrail": needs_guardrail,
            }),
            provider: self.config.provider.clone(),
            model: self.config.model.clone(),
            reasoning_effort: None,
        };

        let llm = self.llm.clone();
        let result = tracker::track_call(meta, self.writer.as_ref(), move || async move {
            let response = llm.invoke(&prompt_messages, &CallOptions::default()).await?;
            let usage = response.usage.clone().unwrap_or_default();
            Ok((
                response.content,
                CallTokens {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                    cached_tokens: 0,
                    cache_hit: false,
                },
            ))
        })
        .await;

        let reply = match result {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(error = %e, "respond generation failed");
                if needs_guardrail {
                    PromptComposer::compose_specialized_prompt(&self.config, &state, SpecializedPrompt::Fallback, now)
                } else {
                    GENERATION_FAILURE_MESSAGE.to_string()
                }
            }
        };

        state.messages.push(Message::assistant(reply));
        let next = self.next_after_reply(&state);
        Ok((state, next))
    }
}

impl Respond {
    fn next_after_reply(&self, state: &TurnState) -> Next {
        if state.confidence >= 0.75 {
            Next::End
        } else {
            Next::Node("validate".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::InMemoryAnalyticsWriter;
    use crate::conversation_memory::InMemorySummaryStore;
    use crate::llm::MockLlm;

    fn node(llm: Arc<dyn LlmClient>) -> Respond {
        let config = Arc::new(AgentConfiguration::default_for("biz-1"));
        let writer = Arc::new(InMemoryAnalyticsWriter::new());
        let memory = Arc::new(ConversationMemory::new(
            Arc::new(InMemorySummaryStore::new()),
            llm.clone(),
            writer.clone(),
        ));
        Respond::new(config, llm, writer, memory)
    }

    fn state() -> TurnState {
        TurnState::new("biz-1", "conv-1", "+5511999999999", None, "exec-1", "what's your return policy?", false, Utc::now())
    }

    #[tokio::test]
    async fn calls_the_llm_with_the_guardrail_prefix_when_kb_needed_but_no_docs() {
        let llm = Arc::new(MockLlm::with_content(
            "I don't have that information, let me connect you with someone who can help.",
        ));
        let mut s = state();
        s.needs_knowledge_base = true;
        s.retrieved_docs = None;
        let (out, next) = node(llm).run(s).await.unwrap();
        assert_eq!(
            out.last_assistant_reply(),
            Some("I don't have that information, let me connect you with someone who can help.")
        );
        assert_eq!(next, Next::Node("validate".to_string()));
    }

    #[tokio::test]
    async fn guardrail_path_falls_back_to_the_configured_fallback_prompt_on_llm_failure() {
        let llm = Arc::new(MockLlm::with_error("boom"));
        let mut s = state();
        s.needs_knowledge_base = true;
        s.retrieved_docs = None;
        let (out, _) = node(llm).run(s).await.unwrap();
        assert!(out.last_assistant_reply().unwrap().contains("asesor"));
    }

    #[tokio::test]
    async fn ends_directly_on_high_confidence() {
        let llm = Arc::new(MockLlm::with_content("here is your answer"));
        let mut s = state();
        s.confidence = 0.9;
        let (out, next) = node(llm).run(s).await.unwrap();
        assert_eq!(out.last_assistant_reply(), Some("here is your answer"));
        assert_eq!(next, Next::End);
    }

    #[tokio::test]
    async fn routes_to_validate_on_low_confidence() {
        let llm = Arc::new(MockLlm::with_content("an answer"));
        let mut s = state();
        s.confidence = 0.5;
        let (_, next) = node(llm).run(s).await.unwrap();
        assert_eq!(next, Next::Node("validate".to_string()));
    }
}
