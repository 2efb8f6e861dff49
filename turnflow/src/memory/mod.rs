//! # Memory: Knowledge Base Embedding Layer
//!
//! The spec calls for no cross-turn shared mutable state beyond the
//! connection pool, so this module is narrower than its name once implied:
//! it holds only the embedding abstraction and the in-memory chunk store that
//! back [`crate::kb::KnowledgeBase`]. Conversation summaries and execution
//! records are handled elsewhere ([`crate::conversation_memory`],
//! [`crate::analytics`]); there is no cross-session checkpointer here.
//!
//! | Type                    | Role                                          |
//! |-------------------------|------------------------------------------------|
//! | [`Embedder`]             | text -> vector, implemented by OpenAI or a fake |
//! | [`OpenAIEmbedder`]       | production embedder (`text-embedding-3-small`)  |
//! | [`InMemoryVectorStore`]  | per-business chunk storage + cosine similarity  |

mod embedder;
mod in_memory_vector_store;
mod openai_embedder;

pub use embedder::Embedder;
pub use in_memory_vector_store::{cosine_similarity, InMemoryVectorStore, StoredChunk};
pub use openai_embedder::OpenAIEmbedder;
