//! # Turnflow
//!
//! A graph-based execution engine for one customer-support conversation turn:
//! classify intent, decide whether to retrieve from a knowledge base, generate
//! a reply, validate it, and retry once if validation fails — all as nodes in
//! a compiled [`graph::StateGraph`] over a single [`state::TurnState`].
//!
//! ## Design principles
//!
//! - **Single state type**: every node reads and writes one [`state::TurnState`];
//!   there is no separate input/output type per node.
//! - **Declared edges are structural, not behavioral**: the graph's static
//!   chain exists to satisfy [`graph::StateGraph::compile`]; each node's own
//!   [`graph::Next`] return value is what actually drives routing (see
//!   [`engine`]).
//! - **Provider-agnostic LLM boundary**: every node depends on [`llm::LlmClient`],
//!   never on a concrete provider, so tests substitute [`llm::MockLlm`].
//! - **Best-effort analytics**: [`analytics::AnalyticsWriter`] writes never fail
//!   a turn; see [`tracker::track_call`].
//!
//! ## Main modules
//!
//! - [`graph`]: [`graph::StateGraph`], [`graph::CompiledStateGraph`], [`graph::Node`],
//!   [`graph::Next`], [`graph::RunContext`] — the general-purpose graph executor.
//! - [`state`]: [`state::TurnState`] and the enums ([`state::Intent`], [`state::Sentiment`],
//!   [`state::KbSearchStrategy`], [`state::Complexity`], [`state::ResponseStrategy`],
//!   [`state::RoutingDecision`]) that drive one turn.
//! - [`nodes`]: the eight graph nodes — [`nodes::SmartRouter`], [`nodes::Orchestrator`],
//!   [`nodes::Greet`], [`nodes::OptimizedRag`], [`nodes::Respond`], [`nodes::ValidateResponse`],
//!   [`nodes::RetryRespond`], [`nodes::Handoff`].
//! - [`engine`]: [`engine::AgentEngine`] — loads a business's configuration, compiles
//!   the graph, and runs one [`engine::ChatResult`]-producing turn.
//! - [`config`]: [`config::AgentConfiguration`], [`config::ConfigStore`], [`config::InMemoryConfigStore`].
//! - [`llm`]: [`llm::LlmClient`] trait, [`llm::MockLlm`], [`llm::ChatOpenAI`].
//! - [`memory`]: [`memory::Embedder`], [`memory::OpenAIEmbedder`], [`memory::InMemoryVectorStore`]
//!   — the knowledge base's embedding layer.
//! - [`kb`]: [`kb::KnowledgeBase`] — semantic and hybrid retrieval over embedded chunks.
//! - [`conversation_memory`]: [`conversation_memory::ConversationMemory`] — rolling
//!   conversation summaries.
//! - [`prompts`]: [`prompts::PromptComposer`] — multi-layer system prompt assembly.
//! - [`pricing`]: static per-model pricing and cost computation.
//! - [`tracker`]: [`tracker::track_call`] — scoped LLM-call measurement and persistence.
//! - [`analytics`]: [`analytics::AnalyticsWriter`], [`analytics::ExecutionRecord`],
//!   [`analytics::LlmCallRecord`], [`analytics::RagMetricsRecord`].
//! - [`message`]: [`message::Message`] (System / User / Assistant).
//! - [`error`]: [`error::AgentError`].
//!
//! Key types are re-exported at crate root: `use turnflow::{AgentEngine, TurnState, Message};`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use turnflow::{
//!     AgentConfiguration, AgentEngine, ConversationMemory, InMemoryAnalyticsWriter,
//!     InMemoryConfigStore, InMemorySummaryStore, InMemoryVectorStore, Embedder, KnowledgeBase,
//!     MockLlm,
//! };
//!
//! struct FixedEmbedder;
//!
//! #[async_trait::async_trait]
//! impl Embedder for FixedEmbedder {
//!     async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, turnflow::AgentError> {
//!         Ok(texts.iter().map(|_| vec![0.0f32; 4]).collect())
//!     }
//!     fn dimension(&self) -> usize {
//!         4
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config_store = Arc::new(InMemoryConfigStore::new());
//! config_store.insert(AgentConfiguration::default_for("biz-1"));
//!
//! let llm = Arc::new(MockLlm::with_content("Thanks for reaching out!"));
//! let writer = Arc::new(InMemoryAnalyticsWriter::new());
//! let kb = Arc::new(KnowledgeBase::new(
//!     Arc::new(InMemoryVectorStore::new(Arc::new(FixedEmbedder))),
//!     writer.clone(),
//! ));
//! let memory = Arc::new(ConversationMemory::new(
//!     Arc::new(InMemorySummaryStore::new()),
//!     llm.clone(),
//!     writer.clone(),
//! ));
//!
//! let engine = AgentEngine::new(config_store, llm, kb, writer, memory);
//! let result = engine
//!     .chat("biz-1", "conv-1", "+15551234567", None, "hi there!", true)
//!     .await
//!     .unwrap();
//! println!("{}", result.reply);
//! # }
//! ```

pub mod analytics;
pub mod config;
pub mod conversation_memory;
pub mod engine;
pub mod error;
pub mod graph;
pub mod kb;
pub mod llm;
pub mod memory;
pub mod message;
pub mod nodes;
pub mod pricing;
pub mod prompts;
pub mod state;
pub mod tracker;

pub use analytics::{
    AnalyticsWriter, ExecutionRagMetadata, ExecutionRecord, ExecutionStatus, InMemoryAnalyticsWriter,
    LlmCallRecord, RagMetricsRecord, SearchStrategyUsed,
};
pub use config::{AgentConfiguration, ConfigStore, InMemoryConfigStore};
pub use conversation_memory::{ConversationMemory, ConversationSummary, InMemorySummaryStore, SummaryStore};
pub use engine::{AgentEngine, ChatResult};
pub use error::AgentError;
pub use graph::{
    CompilationError, CompiledStateGraph, ConditionalRouter, ConditionalRouterFn, Next, NextEntry,
    Node, NodeMiddleware, RunContext, StateGraph, END, START,
};
pub use kb::{KbStats, KnowledgeBase, RetrievedChunk};
pub use llm::{
    CallOptions, ChatOpenAI, LlmClient, LlmResponse, LlmUsage, MockLlm, OpenAiLikeConfig,
    ReasoningEffort,
};
pub use memory::{cosine_similarity, Embedder, InMemoryVectorStore, OpenAIEmbedder, StoredChunk};
pub use message::Message;
pub use nodes::{
    Greet, Handoff, OptimizedRag, Orchestrator, Respond, RetryRespond, SmartRouter, ValidateResponse,
};
pub use pricing::{calculate_cost, model_price, CostBreakdown, ModelPrice};
pub use prompts::{MemoryContext, PromptComposer, SpecializedPrompt};
pub use state::{
    Complexity, Intent, KbSearchStrategy, RagSummary, ResponseStrategy, RoutingDecision, Sentiment,
    TurnState,
};
pub use tracker::{track_call, CallMetadata, CallTokens};

/// When running `cargo test -p turnflow`, initializes tracing from `RUST_LOG` so that
/// unit tests in `src/**` can print logs with `--nocapture`.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
