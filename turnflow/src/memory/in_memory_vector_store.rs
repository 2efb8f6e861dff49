//! In-memory per-business chunk store backing the knowledge base.
//!
//! Holds embedded document chunks keyed by business id. Provides cosine
//! similarity for semantic search; keyword overlap scoring for hybrid search
//! lives in [`crate::kb`], which owns the combined-score formula. Not
//! persistent — a production deployment backs this with pgvector instead.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::AgentError;
use crate::memory::embedder::Embedder;

/// One embedded chunk of a document, scoped to a business.
#[derive(Clone, Debug)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub business_id: String,
    pub text: String,
    pub vector: Vec<f32>,
    pub created_at: SystemTime,
}

/// Per-business embedded chunk storage with cosine similarity search.
pub struct InMemoryVectorStore {
    chunks: DashMap<String, Vec<StoredChunk>>,
    embedder: Arc<dyn Embedder>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            chunks: DashMap::new(),
            embedder,
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Splits `text` into fixed-size, overlapping chunks, embeds each one, and
    /// stores them under `business_id`/`document_id`. Returns the number of
    /// chunks stored.
    pub async fn add_document(
        &self,
        business_id: &str,
        document_id: &str,
        text: &str,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<usize, AgentError> {
        let pieces = split_into_chunks(text, chunk_size, chunk_overlap);
        if pieces.is_empty() {
            return Ok(0);
        }

        let refs: Vec<&str> = pieces.iter().map(String::as_str).collect();
        let vectors = self.embedder.embed(&refs).await?;
        if vectors.len() != pieces.len() {
            return Err(AgentError::KnowledgeBase(
                "embedder returned a different number of vectors than chunks".into(),
            ));
        }

        let mut stored = Vec::with_capacity(pieces.len());
        for (i, (text, vector)) in pieces.into_iter().zip(vectors.into_iter()).enumerate() {
            stored.push(StoredChunk {
                chunk_id: format!("{document_id}:{i}"),
                document_id: document_id.to_string(),
                business_id: business_id.to_string(),
                text,
                vector,
                created_at: SystemTime::now(),
            });
        }

        let count = stored.len();
        self.chunks
            .entry(business_id.to_string())
            .or_default()
            .extend(stored);
        Ok(count)
    }

    pub fn delete_document(&self, business_id: &str, document_id: &str) -> usize {
        let Some(mut entry) = self.chunks.get_mut(business_id) else {
            return 0;
        };
        let before = entry.len();
        entry.retain(|c| c.document_id != document_id);
        before - entry.len()
    }

    /// All chunks stored for a business, for callers that compute their own
    /// scoring (hybrid search combines this with a keyword signal).
    pub fn chunks_for_business(&self, business_id: &str) -> Vec<StoredChunk> {
        self.chunks
            .get(business_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn chunk_count(&self, business_id: &str) -> usize {
        self.chunks.get(business_id).map(|v| v.len()).unwrap_or(0)
    }

    pub fn document_count(&self, business_id: &str) -> usize {
        let Some(entry) = self.chunks.get(business_id) else {
            return 0;
        };
        let mut ids: Vec<&str> = entry.iter().map(|c| c.document_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, AgentError> {
        let vectors = self.embedder.embed(&[query]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::KnowledgeBase("embedder returned no vector".into()))
    }
}

/// Cosine similarity between two vectors; 0.0 if either has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

fn split_into_chunks(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    if chars.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let step = chunk_size.saturating_sub(chunk_overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}
