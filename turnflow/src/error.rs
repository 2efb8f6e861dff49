//! Crate-wide error type.

use thiserror::Error;

/// Error produced by a node, the compiled graph, or a collaborator (LLM, KB,
/// embedder) while running one turn.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A node or the graph executor could not complete (node panic substitute,
    /// missing node, exceeded step budget).
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The turn-level deadline was exceeded while a node (or the whole run) was
    /// in flight.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The LLM backend returned an error or an unparseable response for an
    /// operation that requires strict JSON schema output.
    #[error("llm error: {0}")]
    Llm(String),

    /// A knowledge base / vector store operation failed.
    #[error("knowledge base error: {0}")]
    KnowledgeBase(String),

    /// An analytics or persistence write failed. Callers generally treat this
    /// as best-effort and log rather than propagate it (see `AnalyticsWriter`),
    /// but it is still a distinct variant so it can be surfaced when needed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A configuration value was missing or invalid for the requested agent.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No agent configuration exists for the requested business.
    #[error("not found: {0}")]
    NotFound(String),

    /// An agent configuration exists but is disabled.
    #[error("forbidden: {0}")]
    Forbidden(String),
}
