//! Public entry point: wires every node into the compiled graph and runs one
//! customer turn end to end.
//!
//! The graph's declared edges form a single static chain purely to satisfy
//! [`crate::graph::StateGraph::compile`]'s structural checks (exactly one
//! edge from START, a reachable END, no node with both a static and a
//! conditional edge). The turn's actual branching is driven entirely by the
//! `Next::Node(..)` values each node returns — `smart_router` and
//! `orchestrator` jump straight past the declared chain whenever the turn
//! needs to skip ahead or end early.

use std::sync::Arc;

use chrono::Utc;

use crate::analytics::{AnalyticsWriter, ExecutionRecord, ExecutionStatus};
use crate::config::{AgentConfiguration, ConfigStore};
use crate::conversation_memory::ConversationMemory;
use crate::error::AgentError;
use crate::graph::{CompiledStateGraph, Node, StateGraph, END, START};
use crate::kb::KnowledgeBase;
use crate::llm::LlmClient;
use crate::nodes::{Greet, Handoff, OptimizedRag, Orchestrator, Respond, RetryRespond, SmartRouter, ValidateResponse};
use crate::state::TurnState;

/// Everything the engine needs to run a turn, independent of any one
/// business's configuration.
pub struct AgentEngine {
    config_store: Arc<dyn ConfigStore>,
    llm: Arc<dyn LlmClient>,
    kb: Arc<KnowledgeBase>,
    writer: Arc<dyn AnalyticsWriter>,
    conversation_memory: Arc<ConversationMemory>,
}

/// The outcome of one turn: the final assistant reply plus the execution's
/// terminal bookkeeping.
#[derive(Clone, Debug)]
pub struct ChatResult {
    pub execution_id: String,
    pub reply: String,
    pub status: ExecutionStatus,
    pub nodes_visited: Vec<String>,
    pub handoff: bool,
}

impl AgentEngine {
    pub fn new(
        config_store: Arc<dyn ConfigStore>,
        llm: Arc<dyn LlmClient>,
        kb: Arc<KnowledgeBase>,
        writer: Arc<dyn AnalyticsWriter>,
        conversation_memory: Arc<ConversationMemory>,
    ) -> Self {
        Self { config_store, llm, kb, writer, conversation_memory }
    }

    /// Builds one turn's node set, bound to `config`. Rebuilt per turn because
    /// each business's [`AgentConfiguration`] (prompts, model, provider) is
    /// only known once `chat` loads it.
    fn compile_for(
        config: Arc<AgentConfiguration>,
        llm: Arc<dyn LlmClient>,
        kb: Arc<KnowledgeBase>,
        writer: Arc<dyn AnalyticsWriter>,
        conversation_memory: Arc<ConversationMemory>,
    ) -> CompiledStateGraph<TurnState> {
        let mut graph: StateGraph<TurnState> = StateGraph::new();

        graph.add_node("smart_router", Arc::new(SmartRouter) as Arc<dyn Node<TurnState>>);
        graph.add_node("orchestrator", Arc::new(Orchestrator::new(config.clone(), llm.clone(), writer.clone())));
        graph.add_node("greet", Arc::new(Greet::new(config.clone())));
        graph.add_node("optimized_rag", Arc::new(OptimizedRag::new(config.clone(), kb.clone(), llm.clone(), writer.clone())));
        graph.add_node(
            "respond",
            Arc::new(Respond::new(config.clone(), llm.clone(), writer.clone(), conversation_memory.clone())),
        );
        graph.add_node("validate", Arc::new(ValidateResponse::new(config.clone(), llm.clone(), writer.clone())));
        graph.add_node("retry_respond", Arc::new(RetryRespond::new(config.clone(), llm.clone(), writer.clone())));
        graph.add_node("handoff", Arc::new(Handoff::new(config.clone())));

        // A single static chain, solely to satisfy `compile()`'s structural
        // checks. Every node's own `run` returns the `Next::Node(..)` that
        // actually drives this turn's routing.
        graph.add_edge(START, "smart_router");
        graph.add_edge("smart_router", "orchestrator");
        graph.add_edge("orchestrator", "greet");
        graph.add_edge("greet", "optimized_rag");
        graph.add_edge("optimized_rag", "respond");
        graph.add_edge("respond", "validate");
        graph.add_edge("validate", "retry_respond");
        graph.add_edge("retry_respond", "handoff");
        graph.add_edge("handoff", END);

        graph.compile().expect("the declared node chain is structurally valid")
    }

    /// Runs one customer turn: loads the business's configuration, runs the
    /// graph, and records the execution's terminal state.
    #[allow(clippy::too_many_arguments)]
    pub async fn chat(
        &self,
        business_id: &str,
        conversation_id: &str,
        customer_phone: &str,
        customer_name: Option<String>,
        message: &str,
        is_first_message: bool,
    ) -> Result<ChatResult, AgentError> {
        let config = self
            .config_store
            .get(business_id)
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("no agent configuration for business {business_id}")))?;
        if !config.enabled {
            return Err(AgentError::Forbidden(format!("agent is disabled for business {business_id}")));
        }
        let config = Arc::new(config);

        let now = Utc::now();
        let execution_id = uuid::Uuid::new_v4().to_string();
        let mut execution = ExecutionRecord::new_active(execution_id.clone(), business_id, conversation_id, now);
        if let Err(e) = self.writer.write_execution(execution.clone()).await {
            tracing::error!(error = %e, "failed to persist active execution record");
        }

        let graph = Self::compile_for(
            config,
            self.llm.clone(),
            self.kb.clone(),
            self.writer.clone(),
            self.conversation_memory.clone(),
        );

        let state = TurnState::new(business_id, conversation_id, customer_phone, customer_name, execution_id.clone(), message, is_first_message, now);

        let result = graph.invoke(state).await;

        let completed_at = Utc::now();
        execution.completed_at = Some(completed_at);
        execution.duration_ms = (completed_at - now).num_milliseconds().max(0) as u64;

        let chat_result = match result {
            Ok(final_state) => {
                execution.nodes_visited = final_state.nodes_visited.clone();
                execution.cost = self.writer.total_llm_cost(&execution_id).await.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "failed to compute total llm cost for execution");
                    0.0
                });
                execution.intent = format!("{:?}", final_state.intent);
                execution.sentiment = format!("{:?}", final_state.customer_sentiment);
                execution.handoff = final_state.should_handoff;
                execution.rag = final_state
                    .rag_summary
                    .as_ref()
                    .map(|r| crate::analytics::ExecutionRagMetadata {
                        chunks_retrieved: r.chunks_retrieved,
                        rag_tokens: r.total_tokens,
                        sources_count: r.sources.len(),
                        avg_similarity: r.avg_similarity,
                        retrieval_time_ms: r.retrieval_time_ms,
                    })
                    .unwrap_or_default();
                let handed_off = final_state.nodes_visited.iter().any(|n| n == "handoff");
                execution.status = if handed_off { ExecutionStatus::Handoff } else { ExecutionStatus::Completed };

                ChatResult {
                    execution_id: execution_id.clone(),
                    reply: final_state.last_assistant_reply().unwrap_or_default().to_string(),
                    status: execution.status,
                    nodes_visited: final_state.nodes_visited,
                    handoff: handed_off,
                }
            }
            Err(e) => {
                execution.status = ExecutionStatus::Failed;
                execution.error = Some(e.to_string());
                if let Err(write_err) = self.writer.write_execution(execution.clone()).await {
                    tracing::error!(error = %write_err, "failed to persist failed execution record");
                }
                return Err(e);
            }
        };

        if let Err(e) = self.writer.write_execution(execution).await {
            tracing::error!(error = %e, "failed to persist completed execution record");
        }

        Ok(chat_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::InMemoryAnalyticsWriter;
    use crate::conversation_memory::InMemorySummaryStore;
    use crate::config::InMemoryConfigStore;
    use crate::llm::MockLlm;
    use crate::memory::{Embedder, InMemoryVectorStore};

    struct StubEmbedder;

    #[async_trait::async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, AgentError> {
            Ok(texts.iter().map(|_| vec![0.1f32; 4]).collect())
        }
        fn dimension(&self) -> usize {
            4
        }
    }

    fn engine(llm: Arc<dyn LlmClient>) -> (AgentEngine, Arc<InMemoryAnalyticsWriter>) {
        let config_store = Arc::new(InMemoryConfigStore::new());
        config_store.insert(AgentConfiguration::default_for("biz-1"));
        let writer = Arc::new(InMemoryAnalyticsWriter::new());
        let store = Arc::new(InMemoryVectorStore::new(Arc::new(StubEmbedder)));
        let kb = Arc::new(KnowledgeBase::new(store, writer.clone()));
        let memory = Arc::new(ConversationMemory::new(Arc::new(InMemorySummaryStore::new()), llm.clone(), writer.clone()));
        (AgentEngine::new(config_store, llm, kb, writer.clone(), memory), writer)
    }

    #[tokio::test]
    async fn greeting_fast_paths_to_a_reply() {
        let llm = Arc::new(MockLlm::with_content("hi there"));
        let (engine, _writer) = engine(llm);
        let result = engine.chat("biz-1", "conv-1", "+5511999999999", None, "hola!", true).await.unwrap();
        assert!(!result.reply.is_empty());
        assert!(result.nodes_visited.contains(&"smart_router".to_string()));
    }

    #[tokio::test]
    async fn unknown_business_is_not_found() {
        let llm = Arc::new(MockLlm::with_content("hi"));
        let (engine, _writer) = engine(llm);
        let err = engine.chat("biz-missing", "conv-1", "+5511999999999", None, "hola", true).await.unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[tokio::test]
    async fn disabled_agent_is_forbidden() {
        let llm = Arc::new(MockLlm::with_content("hi"));
        let config_store = Arc::new(InMemoryConfigStore::new());
        let mut cfg = AgentConfiguration::default_for("biz-1");
        cfg.enabled = false;
        config_store.insert(cfg);
        let writer = Arc::new(InMemoryAnalyticsWriter::new());
        let store = Arc::new(InMemoryVectorStore::new(Arc::new(StubEmbedder)));
        let kb = Arc::new(KnowledgeBase::new(store, writer.clone()));
        let memory = Arc::new(ConversationMemory::new(Arc::new(InMemorySummaryStore::new()), llm.clone(), writer.clone()));
        let engine = AgentEngine::new(config_store, llm, kb, writer, memory);

        let err = engine.chat("biz-1", "conv-1", "+5511999999999", None, "hola", true).await.unwrap_err();
        assert!(matches!(err, AgentError::Forbidden(_)));
    }

    #[tokio::test]
    async fn request_human_marks_the_execution_as_handoff() {
        let llm = Arc::new(MockLlm::with_content("connecting you now"));
        let (engine, writer) = engine(llm);
        let result = engine.chat("biz-1", "conv-1", "+5511999999999", None, "quiero hablar con un humano", false).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Handoff);
        assert!(result.handoff);
        let record = writer.execution(&result.execution_id).unwrap();
        assert_eq!(record.status, ExecutionStatus::Handoff);
    }
}
