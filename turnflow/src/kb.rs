//! Knowledge base client: semantic and hybrid retrieval over a business's
//! embedded document chunks.
//!
//! Every query takes `business_id` explicitly and never crosses into another
//! business's chunks — [`crate::memory::InMemoryVectorStore`] partitions
//! storage by business id, so isolation falls out of the storage layer rather
//! than a filter this module has to remember to apply.

use std::sync::Arc;

use crate::analytics::AnalyticsWriter;
use crate::error::AgentError;
use crate::memory::{cosine_similarity, InMemoryVectorStore, StoredChunk};
use crate::tracker::{self, CallMetadata, CallTokens};

/// One chunk returned by a search, with the score(s) that produced it.
#[derive(Clone, Debug)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub semantic_score: f32,
    pub keyword_score: f32,
    pub combined_score: f32,
}

/// Per-business counts surfaced by `stats`.
#[derive(Clone, Copy, Debug, Default)]
pub struct KbStats {
    pub document_count: usize,
    pub chunk_count: usize,
}

/// Semantic + hybrid retrieval over one business's embedded chunks.
pub struct KnowledgeBase {
    store: Arc<InMemoryVectorStore>,
    writer: Arc<dyn AnalyticsWriter>,
}

impl KnowledgeBase {
    pub fn new(store: Arc<InMemoryVectorStore>, writer: Arc<dyn AnalyticsWriter>) -> Self {
        Self { store, writer }
    }

    /// Embeds `query`, scores every chunk stored for `business_id` by cosine
    /// similarity, filters by `threshold`, and returns the top `k`. Returns
    /// immediately with no chunks embedded or scored if the business has no
    /// stored chunks.
    pub async fn semantic_search(
        &self,
        business_id: &str,
        query: &str,
        k: usize,
        threshold: f32,
        execution_id: Option<&str>,
    ) -> Result<Vec<RetrievedChunk>, AgentError> {
        let chunks = self.store.chunks_for_business(business_id);
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embed_query_tracked(business_id, query, execution_id).await?;

        let mut scored: Vec<RetrievedChunk> = chunks
            .iter()
            .map(|c| {
                let score = cosine_similarity(&query_vector, &c.vector);
                RetrievedChunk {
                    chunk_id: c.chunk_id.clone(),
                    document_id: c.document_id.clone(),
                    text: c.text.clone(),
                    semantic_score: score,
                    keyword_score: 0.0,
                    combined_score: score,
                }
            })
            .filter(|c| c.combined_score >= threshold)
            .collect();

        scored.sort_by(|a, b| b.combined_score.total_cmp(&a.combined_score));
        scored.truncate(k);
        Ok(scored)
    }

    /// Blends semantic similarity with keyword overlap:
    /// `combined = semantic_weight * semantic_score + keyword_weight * keyword_score`.
    /// Ranks by `combined_score` and filters on it, not on either score alone.
    #[allow(clippy::too_many_arguments)]
    pub async fn hybrid_search(
        &self,
        business_id: &str,
        query: &str,
        k: usize,
        threshold: f32,
        semantic_weight: f32,
        keyword_weight: f32,
        execution_id: Option<&str>,
    ) -> Result<Vec<RetrievedChunk>, AgentError> {
        let chunks = self.store.chunks_for_business(business_id);
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embed_query_tracked(business_id, query, execution_id).await?;
        let query_terms = tokenize(query);

        let mut scored: Vec<RetrievedChunk> = chunks
            .iter()
            .map(|c: &StoredChunk| {
                let semantic_score = cosine_similarity(&query_vector, &c.vector);
                let keyword_score = keyword_rank(&query_terms, &c.text);
                let combined = semantic_weight * semantic_score + keyword_weight * keyword_score;
                RetrievedChunk {
                    chunk_id: c.chunk_id.clone(),
                    document_id: c.document_id.clone(),
                    text: c.text.clone(),
                    semantic_score,
                    keyword_score,
                    combined_score: combined,
                }
            })
            .filter(|c| c.combined_score >= threshold)
            .collect();

        scored.sort_by(|a, b| b.combined_score.total_cmp(&a.combined_score));
        scored.truncate(k);
        Ok(scored)
    }

    pub fn stats(&self, business_id: &str) -> KbStats {
        KbStats {
            document_count: self.store.document_count(business_id),
            chunk_count: self.store.chunk_count(business_id),
        }
    }

    async fn embed_query_tracked(
        &self,
        business_id: &str,
        query: &str,
        execution_id: Option<&str>,
    ) -> Result<Vec<f32>, AgentError> {
        let store = self.store.clone();
        let model = format!("embedder/dim-{}", store.embedder().dimension());
        let meta = CallMetadata {
            business_id: business_id.to_string(),
            execution_id: execution_id.map(str::to_string),
            operation_type: "embedding".to_string(),
            operation_context: serde_json::json!({ "query_len": query.len() }),
            provider: "openai".to_string(),
            model,
            reasoning_effort: None,
        };
        let query_owned = query.to_string();
        tracker::track_call(meta, self.writer.as_ref(), move || {
            let store = store.clone();
            async move {
                let tokens = tracker::estimate_embedding_tokens(&query_owned);
                let vector = store.embed_query(&query_owned).await?;
                Ok((
                    vector,
                    CallTokens {
                        input_tokens: tokens,
                        output_tokens: 0,
                        cached_tokens: 0,
                        cache_hit: false,
                    },
                ))
            }
        })
        .await
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Fraction of query terms that appear at least once in `text`, case-insensitive.
/// Zero query terms yields zero rank rather than dividing by zero.
fn keyword_rank(query_terms: &[String], text: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let text_lower = text.to_lowercase();
    let matches = query_terms.iter().filter(|t| text_lower.contains(t.as_str())).count();
    matches as f32 / query_terms.len() as f32
}
