//! Adaptive retrieval: expands the customer's query into several phrasings,
//! fans the search out across all of them, optionally reranks with an LLM,
//! validates relevance, and falls back to a loose semantic search rather than
//! answering from nothing.
//!
//! Always writes exactly one [`RagMetricsRecord`], even when the whole pass
//! degrades to the fallback search or comes back empty.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use crate::analytics::{AnalyticsWriter, RagMetricsRecord, SearchStrategyUsed};
use crate::config::AgentConfiguration;
use crate::error::AgentError;
use crate::graph::{Next, Node};
use crate::kb::{KnowledgeBase, RetrievedChunk};
use crate::llm::{CallOptions, LlmClient, ReasoningEffort};
use crate::message::Message;
use crate::state::{KbSearchStrategy, RagSummary, TurnState};
use crate::tracker::{self, CallMetadata, CallTokens};

const QUERY_GENERATION_MODEL: &str = "gpt-5-mini";
const RERANK_MODEL: &str = "gpt-oss-20b";
const SEMANTIC_WEIGHT: f32 = 0.6;
const KEYWORD_WEIGHT: f32 = 0.4;
const RERANK_MIN_CHUNKS: usize = 5;
const RERANK_CANDIDATES: usize = 10;
const FINAL_TOP_K: usize = 5;
const COMBINED_SCORE_FLOOR: f32 = 0.4;
const RERANK_SCORE_FLOOR: f32 = 0.5;
const FALLBACK_K: usize = 3;
const FALLBACK_THRESHOLD: f32 = 0.2;

/// Threshold used to filter retrieval, scaled to how sure the orchestrator
/// already is: a confident turn can afford to be pickier about what counts
/// as relevant.
fn adaptive_threshold(confidence: f32) -> f32 {
    if confidence > 0.85 {
        0.30
    } else if confidence > 0.70 {
        0.35
    } else {
        0.40
    }
}

fn queries_wanted(strategy: KbSearchStrategy) -> usize {
    match strategy {
        KbSearchStrategy::Exact => 1,
        KbSearchStrategy::Broad => 2,
        KbSearchStrategy::MultiQuery => 3,
        KbSearchStrategy::None => 1,
    }
}

pub struct OptimizedRag {
    config: Arc<AgentConfiguration>,
    kb: Arc<KnowledgeBase>,
    llm: Arc<dyn LlmClient>,
    writer: Arc<dyn AnalyticsWriter>,
}

impl OptimizedRag {
    pub fn new(config: Arc<AgentConfiguration>, kb: Arc<KnowledgeBase>, llm: Arc<dyn LlmClient>, writer: Arc<dyn AnalyticsWriter>) -> Self {
        Self { config, kb, llm, writer }
    }

    /// Expands the original query into `[original, variations...]`, always
    /// keeping the literal original as the first query and asking the LLM
    /// for `count - 1` additional phrasings. Falls back to `[original]` alone
    /// on any failure, so retrieval always has at least one query to run.
    async fn generate_search_queries(&self, original: &str, count: usize, state: &TurnState) -> Vec<String> {
        if count <= 1 {
            return vec![original.to_string()];
        }

        let wanted_variations = count - 1;
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "queries": { "type": "array", "items": { "type": "string" }, "minItems": 1, "maxItems": wanted_variations }
            },
            "required": ["queries"],
            "additionalProperties": false
        });
        let prompt = format!(
            "Generate {wanted_variations} distinct alternative search phrasings of the customer's question, to \
             widen a knowledge-base search. The original question will be searched as-is in addition to these — \
             do not repeat it verbatim. Keep each phrasing short and on-topic; do not invent details the question \
             didn't ask for.\n\nQuestion: \"{original}\""
        );

        let meta = CallMetadata {
            business_id: state.business_id.clone(),
            execution_id: Some(state.execution_id.clone()),
            operation_type: "query_expansion".to_string(),
            operation_context: serde_json::json!({ "node": "optimized_rag" }),
            provider: self.config.provider.clone(),
            model: QUERY_GENERATION_MODEL.to_string(),
            reasoning_effort: None,
        };
        let llm = self.llm.clone();
        let messages = vec![Message::system(prompt)];
        let result = tracker::track_call(meta, self.writer.as_ref(), move || async move {
            let (value, usage) = llm
                .invoke_structured(&messages, "search_queries", &schema, &CallOptions::default())
                .await?;
            let usage = usage.unwrap_or_default();
            Ok((
                value,
                CallTokens { input_tokens: usage.prompt_tokens, output_tokens: usage.completion_tokens, cached_tokens: 0, cache_hit: false },
            ))
        })
        .await;

        #[derive(Deserialize)]
        struct Queries {
            queries: Vec<String>,
        }

        let variations = match result.and_then(|v| serde_json::from_value::<Queries>(v).map_err(|e| AgentError::Llm(e.to_string()))) {
            Ok(q) => q.queries,
            Err(_) => Vec::new(),
        };

        let mut queries = vec![original.to_string()];
        queries.extend(variations.into_iter().filter(|q| q != original));
        queries
    }

    /// Runs hybrid search for every query concurrently and merges the results,
    /// keeping the highest `combined_score` per `chunk_id` when the same chunk
    /// surfaces under more than one phrasing.
    async fn multi_query_search(&self, business_id: &str, queries: &[String], threshold: f32, execution_id: &str) -> Vec<RetrievedChunk> {
        let searches = queries.iter().map(|q| {
            let kb = self.kb.clone();
            let business_id = business_id.to_string();
            let q = q.clone();
            let execution_id = execution_id.to_string();
            async move {
                kb.hybrid_search(&business_id, &q, RERANK_CANDIDATES, threshold, SEMANTIC_WEIGHT, KEYWORD_WEIGHT, Some(&execution_id))
                    .await
            }
        });

        let results = futures::future::join_all(searches).await;

        let mut merged: HashMap<String, RetrievedChunk> = HashMap::new();
        for outcome in results {
            match outcome {
                Ok(chunks) => {
                    for chunk in chunks {
                        merged
                            .entry(chunk.chunk_id.clone())
                            .and_modify(|existing| {
                                if chunk.combined_score > existing.combined_score {
                                    *existing = chunk.clone();
                                }
                            })
                            .or_insert(chunk);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "one query in multi_query_search failed"),
            }
        }

        let mut chunks: Vec<RetrievedChunk> = merged.into_values().collect();
        chunks.sort_by(|a, b| b.combined_score.total_cmp(&a.combined_score));
        chunks
    }

    /// Reranks the top candidates with a dedicated LLM call when there are
    /// enough chunks to make it worthwhile. Falls back to the original
    /// similarity order (truncated) on any failure.
    async fn rerank(&self, query: &str, chunks: Vec<RetrievedChunk>, state: &TurnState) -> (Vec<(RetrievedChunk, Option<f32>)>, bool) {
        if chunks.len() < RERANK_MIN_CHUNKS {
            return (chunks.into_iter().map(|c| (c, None)).collect(), false);
        }

        let candidates: Vec<RetrievedChunk> = chunks.into_iter().take(RERANK_CANDIDATES).collect();
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "scores": { "type": "array", "items": { "type": "number", "minimum": 0.0, "maximum": 1.0 } }
            },
            "required": ["scores"],
            "additionalProperties": false
        });

        let listing: String = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{i}] {}", c.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "Score how relevant each numbered passage is to the question, from 0.0 (irrelevant) to 1.0 \
             (directly answers it). Return one score per passage, in order.\n\nQuestion: \"{query}\"\n\n{listing}"
        );

        let meta = CallMetadata {
            business_id: state.business_id.clone(),
            execution_id: Some(state.execution_id.clone()),
            operation_type: "rerank".to_string(),
            operation_context: serde_json::json!({ "node": "optimized_rag", "candidates": candidates.len() }),
            provider: self.config.provider.clone(),
            model: RERANK_MODEL.to_string(),
            reasoning_effort: Some(ReasoningEffort::Low.as_str().to_string()),
        };
        let llm = self.llm.clone();
        let messages = vec![Message::system(prompt)];
        let options = CallOptions::with_effort(ReasoningEffort::Low);
        let result = tracker::track_call(meta, self.writer.as_ref(), move || async move {
            let (value, usage) = llm.invoke_structured(&messages, "rerank_scores", &schema, &options).await?;
            let usage = usage.unwrap_or_default();
            Ok((
                value,
                CallTokens { input_tokens: usage.prompt_tokens, output_tokens: usage.completion_tokens, cached_tokens: 0, cache_hit: false },
            ))
        })
        .await;

        #[derive(Deserialize)]
        struct Scores {
            scores: Vec<f32>,
        }

        let parsed = result.and_then(|v| serde_json::from_value::<Scores>(v).map_err(|e| AgentError::Llm(e.to_string())));
        match parsed {
            Ok(s) => {
                let mut scored: Vec<(RetrievedChunk, Option<f32>)> = candidates
                    .into_iter()
                    .enumerate()
                    .map(|(i, c)| (c, Some(*s.scores.get(i).unwrap_or(&0.5))))
                    .collect();
                scored.sort_by(|a, b| b.1.unwrap_or(0.5).total_cmp(&a.1.unwrap_or(0.5)));
                scored.truncate(FINAL_TOP_K);
                (scored, true)
            }
            Err(e) => {
                tracing::warn!(error = %e, "rerank failed, keeping similarity order");
                (candidates.into_iter().take(FINAL_TOP_K).map(|c| (c, None)).collect(), false)
            }
        }
    }

    /// Rejects chunks whose similarity or rerank score falls below the
    /// documented floors. Chunks that were never reranked default to a
    /// passing `rerank_score` of 1.0 so the rerank floor never rejects them.
    fn validate_relevance(scored: Vec<(RetrievedChunk, Option<f32>)>) -> Vec<RetrievedChunk> {
        scored
            .into_iter()
            .filter(|(chunk, rerank_score)| {
                chunk.combined_score >= COMBINED_SCORE_FLOOR && rerank_score.unwrap_or(1.0) >= RERANK_SCORE_FLOOR
            })
            .map(|(chunk, _)| chunk)
            .collect()
    }
}

#[async_trait]
impl Node<TurnState> for OptimizedRag {
    fn id(&self) -> &str {
        "optimized_rag"
    }

    async fn run(&self, mut state: TurnState) -> Result<(TurnState, Next), AgentError> {
        state.record_node(self.id());

        let total_start = Instant::now();
        let original_query = state.search_queries.first().cloned().unwrap_or_else(|| state.last_user_message().to_string());
        let threshold = adaptive_threshold(state.confidence);
        let wanted = queries_wanted(state.kb_search_strategy);

        let queries = self.generate_search_queries(&original_query, wanted, &state).await;

        let search_start = Instant::now();
        let found = self.multi_query_search(&state.business_id, &queries, threshold, &state.execution_id).await;
        let search_duration_ms = search_start.elapsed().as_millis() as u64;
        let chunks_found = found.len();

        let rerank_start = Instant::now();
        let (scored, reranking_applied) = self.rerank(&original_query, found, &state).await;
        let reranking_duration_ms = if reranking_applied { Some(rerank_start.elapsed().as_millis() as u64) } else { None };
        let chunks_after_reranking = if reranking_applied { Some(scored.len()) } else { None };

        let mut validated = Self::validate_relevance(scored);

        let mut final_threshold_used = threshold;
        if validated.is_empty() && threshold > FALLBACK_THRESHOLD {
            tracing::warn!(business_id = %state.business_id, "no chunks passed validation, falling back to loose semantic search");
            final_threshold_used = FALLBACK_THRESHOLD;
            match self.kb.semantic_search(&state.business_id, &original_query, FALLBACK_K, FALLBACK_THRESHOLD, Some(&state.execution_id)).await {
                Ok(fallback_chunks) => validated = fallback_chunks,
                Err(e) => tracing::warn!(error = %e, "fallback semantic search failed"),
            }
        }

        let relevance_validation_passed = Some(!validated.is_empty());
        let avg_similarity = if validated.is_empty() {
            0.0
        } else {
            validated.iter().map(|c| c.combined_score).sum::<f32>() / validated.len() as f32
        };
        let sources: Vec<String> = validated.iter().map(|c| c.document_id.clone()).collect();
        let texts: Vec<String> = validated.iter().map(|c| c.text.clone()).collect();
        let total_tokens: u32 = texts.iter().map(|t| tracker::estimate_embedding_tokens(t)).sum();

        let total_duration_ms = total_start.elapsed().as_millis() as u64;

        let metrics = RagMetricsRecord {
            execution_id: state.execution_id.clone(),
            business_id: state.business_id.clone(),
            original_query: original_query.clone(),
            queries_generated: queries.len(),
            queries_executed: queries.len(),
            search_strategy: if queries.len() > 1 { SearchStrategyUsed::MultiQuery } else { SearchStrategyUsed::Hybrid },
            semantic_weight: SEMANTIC_WEIGHT,
            keyword_weight: KEYWORD_WEIGHT,
            threshold_used: final_threshold_used,
            chunks_found,
            chunks_after_reranking,
            reranking_applied,
            relevance_validation_passed,
            search_duration_ms,
            reranking_duration_ms,
            total_duration_ms,
        };
        if let Err(e) = self.writer.write_rag_metrics(metrics).await {
            tracing::error!(error = %e, "failed to persist rag metrics record");
        }

        state.retrieved_docs = Some(texts);
        state.rag_summary = Some(RagSummary {
            chunks_retrieved: validated.len(),
            total_tokens,
            sources,
            avg_similarity,
            retrieval_time_ms: search_duration_ms,
        });

        Ok((state, Next::Node("respond".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::InMemoryAnalyticsWriter;
    use crate::llm::MockLlm;
    use crate::memory::{Embedder, InMemoryVectorStore};
    use chrono::Utc;

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, AgentError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0f32; 8];
                    for (i, b) in t.bytes().enumerate() {
                        v[i % 8] += b as f32 / 256.0;
                    }
                    v
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            8
        }
    }

    async fn node_with_docs() -> (OptimizedRag, TurnState, Arc<InMemoryAnalyticsWriter>) {
        let store = Arc::new(InMemoryVectorStore::new(Arc::new(StubEmbedder)));
        store.add_document("biz-1", "doc1", "our refund policy allows returns within 30 days of purchase", 200, 0).await.unwrap();
        store.add_document("biz-1", "doc2", "shipping usually takes five to seven business days", 200, 0).await.unwrap();

        let writer = Arc::new(InMemoryAnalyticsWriter::new());
        let kb = Arc::new(KnowledgeBase::new(store, writer.clone()));
        let llm = Arc::new(MockLlm::with_content("no structured response configured"));
        let config = Arc::new(AgentConfiguration::default_for("biz-1"));

        let mut state = TurnState::new("biz-1", "conv-1", "+5511999999999", None, "exec-1", "what's your refund policy?", false, Utc::now());
        state.needs_knowledge_base = true;
        state.search_queries = vec!["refund policy".to_string()];
        state.kb_search_strategy = KbSearchStrategy::Exact;
        state.confidence = 0.8;

        (OptimizedRag::new(config, kb, llm, writer.clone()), state, writer)
    }

    #[test]
    fn adaptive_threshold_tightens_with_confidence() {
        assert_eq!(adaptive_threshold(0.9), 0.30);
        assert_eq!(adaptive_threshold(0.75), 0.35);
        assert_eq!(adaptive_threshold(0.5), 0.40);
    }

    #[test]
    fn validate_relevance_rejects_below_floors() {
        let chunk = RetrievedChunk {
            chunk_id: "doc1:0".into(),
            document_id: "doc1".into(),
            text: "x".into(),
            semantic_score: 0.5,
            keyword_score: 0.0,
            combined_score: 0.3,
        };
        let result = OptimizedRag::validate_relevance(vec![(chunk, None)]);
        assert!(result.is_empty());
    }

    #[test]
    fn validate_relevance_defaults_missing_rerank_score_to_passing() {
        let chunk = RetrievedChunk {
            chunk_id: "doc1:0".into(),
            document_id: "doc1".into(),
            text: "x".into(),
            semantic_score: 0.9,
            keyword_score: 0.0,
            combined_score: 0.9,
        };
        let result = OptimizedRag::validate_relevance(vec![(chunk, None)]);
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn retrieves_and_routes_to_respond() {
        let (node, state, _writer) = node_with_docs().await;
        let (out, next) = node.run(state).await.unwrap();
        assert_eq!(next, Next::Node("respond".to_string()));
        assert!(out.retrieved_docs.is_some());
        assert!(out.rag_summary.is_some());
    }

    #[tokio::test]
    async fn writes_a_rag_metrics_record_even_with_no_results() {
        let (node, mut state, writer) = node_with_docs().await;
        state.business_id = "biz-empty".to_string();
        let (out, _) = node.run(state).await.unwrap();
        assert_eq!(writer.rag_metrics.len(), 1);
        assert_eq!(out.rag_summary.unwrap().chunks_retrieved, 0);
    }
}
