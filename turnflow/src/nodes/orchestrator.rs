//! Full planning pass: one structured-output LLM call produces intent,
//! confidence, retrieval strategy, response strategy, sentiment, and a
//! handoff recommendation in a single round trip.
//!
//! Falls back to a conservative, fixed decision if the call fails or the
//! response can't be parsed, so a flaky model never blocks the turn.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::analytics::AnalyticsWriter;
use crate::config::AgentConfiguration;
use crate::error::AgentError;
use crate::graph::{Next, Node};
use crate::llm::{CallOptions, LlmClient};
use crate::message::Message;
use crate::state::{Complexity, Intent, KbSearchStrategy, ResponseStrategy, RoutingDecision, Sentiment, TurnState};
use crate::tracker::{self, CallMetadata, CallTokens};

const ORCHESTRATOR_MODEL: &str = "gpt-5-mini";

const ORCHESTRATOR_SYSTEM_PROMPT: &str = "You are the orchestrator for a conversational agent: analyze the \
customer's message and the conversation so far, then decide intent, confidence, retrieval strategy, \
response strategy, sentiment, and whether to hand off to a human.\n\n\
Confidence bands: 0.9-1.0 very sure (simple question or a clear knowledge-base hit expected); \
0.7-0.9 moderately sure; 0.5-0.7 unsure (ambiguous, may not be in the knowledge base); \
0.3-0.5 very unsure (complex or out of scope); 0.0-0.3 no ability to answer.\n\n\
Recommend handoff when the customer explicitly asks for a human, the question is out of the \
business's scope, sentiment is very negative with rising frustration, confidence is below 0.5 on a \
critical topic (pricing, warranties, technical issues), or the customer repeats the same question.\n\n\
kb_search_strategy: exact (direct query), broad (expand with synonyms), multi_query (2-3 phrasings), \
none (no retrieval needed). response_strategy: direct (no retrieval needed), with_context (use \
retrieved knowledge), multi_step (the request needs several turns), deflect (cannot help, suggest an \
alternative or handoff).";

#[derive(Deserialize)]
struct OrchestratorDecision {
    intent: Intent,
    confidence: f32,
    needs_knowledge_base: bool,
    kb_search_strategy: KbSearchStrategy,
    search_queries: Vec<String>,
    complexity: Complexity,
    should_handoff: bool,
    handoff_reason: Option<String>,
    response_strategy: ResponseStrategy,
    customer_sentiment: Sentiment,
    reasoning: String,
}

fn orchestrator_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "intent": { "type": "string", "enum": ["greeting", "question", "complaint", "request_human", "other"] },
            "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
            "needs_knowledge_base": { "type": "boolean" },
            "kb_search_strategy": { "type": "string", "enum": ["exact", "broad", "multi_query", "none"] },
            "search_queries": { "type": "array", "items": { "type": "string" }, "minItems": 0, "maxItems": 3 },
            "complexity": { "type": "string", "enum": ["simple", "medium", "complex"] },
            "should_handoff": { "type": "boolean" },
            "handoff_reason": { "type": ["string", "null"] },
            "response_strategy": { "type": "string", "enum": ["direct", "with_context", "multi_step", "deflect"] },
            "customer_sentiment": { "type": "string", "enum": ["very_positive", "positive", "neutral", "negative", "very_negative"] },
            "reasoning": { "type": "string" }
        },
        "required": [
            "intent", "confidence", "needs_knowledge_base", "kb_search_strategy", "search_queries",
            "complexity", "should_handoff", "handoff_reason", "response_strategy", "customer_sentiment",
            "reasoning"
        ],
        "additionalProperties": false
    })
}

fn fallback_decision(query: &str) -> OrchestratorDecision {
    OrchestratorDecision {
        intent: Intent::Question,
        confidence: 0.4,
        needs_knowledge_base: true,
        kb_search_strategy: KbSearchStrategy::Broad,
        search_queries: vec![query.to_string()],
        complexity: Complexity::Medium,
        should_handoff: false,
        handoff_reason: None,
        response_strategy: ResponseStrategy::WithContext,
        customer_sentiment: Sentiment::Neutral,
        reasoning: "fallback after an orchestrator error".to_string(),
    }
}

pub struct Orchestrator {
    config: Arc<AgentConfiguration>,
    llm: Arc<dyn LlmClient>,
    writer: Arc<dyn AnalyticsWriter>,
}

impl Orchestrator {
    pub fn new(config: Arc<AgentConfiguration>, llm: Arc<dyn LlmClient>, writer: Arc<dyn AnalyticsWriter>) -> Self {
        Self { config, llm, writer }
    }

    fn build_context(&self, state: &TurnState) -> String {
        let recent: Vec<&Message> = state.messages.iter().rev().take(3).collect();
        recent
            .into_iter()
            .rev()
            .map(|m| format!("{}: {}", if matches!(m, Message::User(_)) { "Customer" } else { "Assistant" }, m.content()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Node<TurnState> for Orchestrator {
    fn id(&self) -> &str {
        "orchestrator"
    }

    async fn run(&self, mut state: TurnState) -> Result<(TurnState, Next), AgentError> {
        state.record_node(self.id());

        let current_message = state.last_user_message().to_string();
        let conversation_history = self.build_context(&state);
        let prompt = format!(
            "{ORCHESTRATOR_SYSTEM_PROMPT}\n\nBusiness: {}\n\nRecent conversation:\n{conversation_history}\n\n\
             Current customer message:\n\"{current_message}\"\n\nIs first message: {}",
            self.config.business_id, state.is_first_message,
        );

        let schema = orchestrator_schema();
        let meta = CallMetadata {
            business_id: state.business_id.clone(),
            execution_id: Some(state.execution_id.clone()),
            operation_type: "orchestration".to_string(),
            operation_context: serde_json::json!({ "conversation_id": state.conversation_id }),
            provider: self.config.provider.clone(),
            model: ORCHESTRATOR_MODEL.to_string(),
            reasoning_effort: None,
        };

        let llm = self.llm.clone();
        let prompt_messages = vec![Message::system(prompt)];
        let result = tracker::track_call(meta, self.writer.as_ref(), move || async move {
            let (value, usage) = llm
                .invoke_structured(&prompt_messages, "orchestrator_decision", &schema, &CallOptions::default())
                .await?;
            let usage = usage.unwrap_or_default();
            Ok((
                value,
                CallTokens {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                    cached_tokens: 0,
                    cache_hit: false,
                },
            ))
        })
        .await;

        let decision = match result.and_then(|v| {
            serde_json::from_value::<OrchestratorDecision>(v).map_err(|e| AgentError::Llm(e.to_string()))
        }) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "orchestrator call failed, using conservative fallback");
                fallback_decision(&current_message)
            }
        };

        state.intent = decision.intent;
        state.confidence = decision.confidence;
        state.needs_knowledge_base = decision.needs_knowledge_base;
        state.kb_search_strategy = decision.kb_search_strategy;
        state.search_queries = decision.search_queries;
        state.complexity = decision.complexity;
        state.should_handoff = decision.should_handoff;
        state.handoff_reason = decision.handoff_reason;
        state.response_strategy = decision.response_strategy;
        state.customer_sentiment = decision.customer_sentiment;
        state.orchestrator_reasoning = Some(decision.reasoning);

        let next = match state.routing_decision() {
            RoutingDecision::ForceHandoff => Next::Node("handoff".to_string()),
            RoutingDecision::SuggestHandoff => {
                state.suggest_handoff_in_response = true;
                Next::Node("respond".to_string())
            }
            RoutingDecision::Greet => Next::Node("greet".to_string()),
            RoutingDecision::RetrieveKnowledge => Next::Node("optimized_rag".to_string()),
            RoutingDecision::DirectRespond => Next::Node("respond".to_string()),
        };

        Ok((state, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::InMemoryAnalyticsWriter;
    use crate::llm::MockLlm;
    use chrono::Utc;

    fn state(message: &str) -> TurnState {
        TurnState::new("biz-1", "conv-1", "+5511999999999", None, "exec-1", message, false, Utc::now())
    }

    fn good_decision() -> serde_json::Value {
        serde_json::json!({
            "intent": "question",
            "confidence": 0.9,
            "needs_knowledge_base": true,
            "kb_search_strategy": "exact",
            "search_queries": ["refund policy"],
            "complexity": "simple",
            "should_handoff": false,
            "handoff_reason": null,
            "response_strategy": "with_context",
            "customer_sentiment": "neutral",
            "reasoning": "customer asked a factual question"
        })
    }

    #[tokio::test]
    async fn routes_to_optimized_rag_when_kb_needed() {
        let llm = Arc::new(MockLlm::with_structured("ignored", good_decision()));
        let writer = Arc::new(InMemoryAnalyticsWriter::new());
        let node = Orchestrator::new(Arc::new(AgentConfiguration::default_for("biz-1")), llm, writer);

        let (out, next) = node.run(state("what's your refund policy?")).await.unwrap();
        assert_eq!(out.confidence, 0.9);
        assert_eq!(next, Next::Node("optimized_rag".to_string()));
    }

    #[tokio::test]
    async fn falls_back_conservatively_on_llm_error() {
        let llm = Arc::new(MockLlm::with_content("no structured response configured"));
        let writer = Arc::new(InMemoryAnalyticsWriter::new());
        let node = Orchestrator::new(Arc::new(AgentConfiguration::default_for("biz-1")), llm, writer);

        let (out, _) = node.run(state("a very complex question")).await.unwrap();
        assert_eq!(out.confidence, 0.4);
        assert!(out.needs_knowledge_base);
        assert_eq!(out.kb_search_strategy, KbSearchStrategy::Broad);
    }

    #[tokio::test]
    async fn low_confidence_routes_to_suggest_handoff_respond() {
        let mut decision = good_decision();
        decision["confidence"] = serde_json::json!(0.5);
        let llm = Arc::new(MockLlm::with_structured("ignored", decision));
        let writer = Arc::new(InMemoryAnalyticsWriter::new());
        let node = Orchestrator::new(Arc::new(AgentConfiguration::default_for("biz-1")), llm, writer);

        let (out, next) = node.run(state("something ambiguous")).await.unwrap();
        assert!(out.suggest_handoff_in_response);
        assert_eq!(next, Next::Node("respond".to_string()));
    }
}
