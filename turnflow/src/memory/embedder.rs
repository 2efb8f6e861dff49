//! Embedder trait shared by the knowledge base's semantic index.
//!
//! Implementations can wrap OpenAI or a fixed fake embedder for tests.

use async_trait::async_trait;

use crate::error::AgentError;

/// Produces fixed-size float vectors from text.
///
/// Implementations must be `Send + Sync` for use from async node handlers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds each text into a vector of dimension [`Embedder::dimension`].
    /// Returns one vector per input text in the same order.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, AgentError>;

    /// Vector dimension returned by [`Embedder::embed`].
    fn dimension(&self) -> usize;
}
