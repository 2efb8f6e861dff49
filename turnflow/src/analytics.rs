//! Write-only analytics records and the collaborator that persists them.
//!
//! Nodes and the engine never read these back within a turn; they are
//! strictly output. The concrete writer (database-backed in production) is
//! injected as `Arc<dyn AnalyticsWriter>`; tests use [`InMemoryAnalyticsWriter`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::AgentError;

/// Terminal status of one turn's execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Active,
    Completed,
    Failed,
    Handoff,
}

/// RAG metadata attached to the execution record's `metadata.rag` field.
#[derive(Clone, Debug, Default)]
pub struct ExecutionRagMetadata {
    pub chunks_retrieved: usize,
    pub rag_tokens: u32,
    pub sources_count: usize,
    pub avg_similarity: f32,
    pub retrieval_time_ms: u64,
}

/// One row per turn. Created `active` at chat start, transitioned exactly once
/// to `completed`, `failed`, or `handoff`.
#[derive(Clone, Debug)]
pub struct ExecutionRecord {
    pub id: String,
    pub business_id: String,
    pub conversation_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub nodes_visited: Vec<String>,
    pub tokens_used: u32,
    pub cost: f64,
    pub error: Option<String>,
    pub intent: String,
    pub sentiment: String,
    pub handoff: bool,
    pub duration_ms: u64,
    pub rag: ExecutionRagMetadata,
}

impl ExecutionRecord {
    pub fn new_active(id: impl Into<String>, business_id: impl Into<String>, conversation_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            business_id: business_id.into(),
            conversation_id: conversation_id.into(),
            status: ExecutionStatus::Active,
            started_at,
            completed_at: None,
            nodes_visited: Vec::new(),
            tokens_used: 0,
            cost: 0.0,
            error: None,
            intent: String::new(),
            sentiment: String::new(),
            handoff: false,
            duration_ms: 0,
            rag: ExecutionRagMetadata::default(),
        }
    }
}

/// One row per outgoing LLM (or embedding) request. The only thing that
/// writes this record is [`crate::tracker::track_call`].
#[derive(Clone, Debug)]
pub struct LlmCallRecord {
    pub business_id: String,
    pub execution_id: Option<String>,
    pub operation_type: String,
    pub operation_context: serde_json::Value,
    pub provider: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cached_tokens: u32,
    pub total_tokens: u32,
    pub input_cost: f64,
    pub output_cost: f64,
    pub cached_cost: f64,
    pub total_cost: f64,
    pub duration_ms: u64,
    pub reasoning_effort: Option<String>,
    pub cache_hit: bool,
    pub error: Option<String>,
}

/// Retrieval strategy actually exercised by one `optimized_rag` run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategyUsed {
    Hybrid,
    SemanticOnly,
    MultiQuery,
}

/// One row per `optimized_rag` execution, written even when the node fails.
#[derive(Clone, Debug)]
pub struct RagMetricsRecord {
    pub execution_id: String,
    pub business_id: String,
    pub original_query: String,
    pub queries_generated: usize,
    pub queries_executed: usize,
    pub search_strategy: SearchStrategyUsed,
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    pub threshold_used: f32,
    pub chunks_found: usize,
    pub chunks_after_reranking: Option<usize>,
    pub reranking_applied: bool,
    pub relevance_validation_passed: Option<bool>,
    pub search_duration_ms: u64,
    pub reranking_duration_ms: Option<u64>,
    pub total_duration_ms: u64,
}

/// Persists the three write-only record types. Every method is best-effort:
/// implementations log failures internally; callers never see them
/// propagate (see `track_call`'s and `optimized_rag`'s error-handling policy).
#[async_trait]
pub trait AnalyticsWriter: Send + Sync {
    async fn write_execution(&self, record: ExecutionRecord) -> Result<(), AgentError>;
    async fn write_llm_call(&self, record: LlmCallRecord) -> Result<(), AgentError>;
    async fn write_rag_metrics(&self, record: RagMetricsRecord) -> Result<(), AgentError>;

    /// Sum of every LLM call's `total_cost` recorded under `execution_id`, used
    /// to populate the execution record's own `cost` once a turn completes.
    async fn total_llm_cost(&self, execution_id: &str) -> Result<f64, AgentError>;
}

/// In-memory writer for tests and quick-start demos.
#[derive(Default)]
pub struct InMemoryAnalyticsWriter {
    pub executions: DashMap<String, ExecutionRecord>,
    pub llm_calls: DashMap<usize, LlmCallRecord>,
    pub rag_metrics: DashMap<usize, RagMetricsRecord>,
}

impl InMemoryAnalyticsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execution(&self, id: &str) -> Option<ExecutionRecord> {
        self.executions.get(id).map(|e| e.clone())
    }

    pub fn total_llm_cost(&self, execution_id: &str) -> f64 {
        self.llm_calls
            .iter()
            .filter(|e| e.execution_id.as_deref() == Some(execution_id))
            .map(|e| e.total_cost)
            .sum()
    }
}

#[async_trait]
impl AnalyticsWriter for InMemoryAnalyticsWriter {
    async fn write_execution(&self, record: ExecutionRecord) -> Result<(), AgentError> {
        self.executions.insert(record.id.clone(), record);
        Ok(())
    }

    async fn write_llm_call(&self, record: LlmCallRecord) -> Result<(), AgentError> {
        let idx = self.llm_calls.len();
        self.llm_calls.insert(idx, record);
        Ok(())
    }

    async fn write_rag_metrics(&self, record: RagMetricsRecord) -> Result<(), AgentError> {
        let idx = self.rag_metrics.len();
        self.rag_metrics.insert(idx, record);
        Ok(())
    }

    async fn total_llm_cost(&self, execution_id: &str) -> Result<f64, AgentError> {
        Ok(self.total_llm_cost(execution_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_writer_records_execution() {
        let writer = InMemoryAnalyticsWriter::new();
        let record = ExecutionRecord::new_active("exec-1", "biz-1", "conv-1", Utc::now());
        writer.write_execution(record).await.unwrap();
        assert!(writer.execution("exec-1").is_some());
    }

    #[tokio::test]
    async fn total_llm_cost_sums_only_matching_execution() {
        let writer = InMemoryAnalyticsWriter::new();
        let mut rec = sample_llm_call("exec-1");
        rec.total_cost = 0.01;
        writer.write_llm_call(rec).await.unwrap();
        let mut rec2 = sample_llm_call("exec-2");
        rec2.total_cost = 0.05;
        writer.write_llm_call(rec2).await.unwrap();

        assert_eq!(writer.total_llm_cost("exec-1"), 0.01);
    }

    fn sample_llm_call(execution_id: &str) -> LlmCallRecord {
        LlmCallRecord {
            business_id: "biz-1".into(),
            execution_id: Some(execution_id.into()),
            operation_type: "chat".into(),
            operation_context: serde_json::json!({}),
            provider: "openai".into(),
            model: "gpt-5-mini".into(),
            input_tokens: 10,
            output_tokens: 10,
            cached_tokens: 0,
            total_tokens: 20,
            input_cost: 0.0,
            output_cost: 0.0,
            cached_cost: 0.0,
            total_cost: 0.0,
            duration_ms: 5,
            reasoning_effort: None,
            cache_hit: false,
            error: None,
        }
    }
}
