//! Rolling conversation summaries: lets `orchestrator` see context from
//! dozens of prior turns without paying for their tokens on every call.
//!
//! Refresh policy: generate when no summary exists and at least 5 messages
//! have accumulated; refresh an existing summary once 10+ messages have
//! landed since it was written, or once it is more than 24 hours old;
//! otherwise return the cached summary unchanged. Every failure here is
//! absorbed — a conversation with no summary is a degraded experience, not a
//! failed turn.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;

use crate::analytics::AnalyticsWriter;
use crate::error::AgentError;
use crate::llm::{CallOptions, LlmClient, ReasoningEffort};
use crate::message::Message;
use crate::tracker::{self, CallMetadata, CallTokens};

const SUMMARIZATION_MODEL: &str = "gpt-5-mini";
const MIN_MESSAGES_TO_SUMMARIZE: usize = 5;
const MESSAGES_SINCE_REFRESH_THRESHOLD: usize = 10;
const MAX_SUMMARY_AGE_HOURS: i64 = 24;
const MAX_MESSAGES_IN_PROMPT: usize = 50;

const SUMMARIZATION_SYSTEM_PROMPT: &str = "You summarize conversations between customers and an AI agent.\n\n\
Produce a CONCISE, USEFUL summary covering:\n\
1. General context: what is this conversation about?\n\
2. Customer needs: what are they looking for?\n\
3. Topics discussed so far.\n\
4. Decisions or agreements reached.\n\
5. Current state of the conversation.\n\n\
Format: 2-3 paragraphs, 150-250 words, plain and direct language, focused on what's useful to continue the conversation. \
Skip irrelevant detail, repetition, and content-free greetings or goodbyes.";

/// A cached conversation summary plus the bookkeeping needed to decide when
/// it needs refreshing.
#[derive(Clone, Debug, Deserialize)]
pub struct ConversationSummary {
    pub text: String,
    pub topics: Vec<String>,
    pub message_count: usize,
    pub last_updated_at: DateTime<Utc>,
}

/// Persists one summary per conversation. Production backs this with the
/// conversations table; tests use [`InMemorySummaryStore`].
#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn get(&self, conversation_id: &str) -> Result<Option<ConversationSummary>, AgentError>;
    async fn save(&self, conversation_id: &str, summary: ConversationSummary) -> Result<(), AgentError>;
}

/// In-memory summary store for tests and the demo harness.
#[derive(Default)]
pub struct InMemorySummaryStore {
    summaries: DashMap<String, ConversationSummary>,
}

impl InMemorySummaryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SummaryStore for InMemorySummaryStore {
    async fn get(&self, conversation_id: &str) -> Result<Option<ConversationSummary>, AgentError> {
        Ok(self.summaries.get(conversation_id).map(|s| s.clone()))
    }

    async fn save(&self, conversation_id: &str, summary: ConversationSummary) -> Result<(), AgentError> {
        self.summaries.insert(conversation_id.to_string(), summary);
        Ok(())
    }
}

/// Generates and caches conversation summaries.
pub struct ConversationMemory {
    store: Arc<dyn SummaryStore>,
    llm: Arc<dyn LlmClient>,
    writer: Arc<dyn AnalyticsWriter>,
}

impl ConversationMemory {
    pub fn new(store: Arc<dyn SummaryStore>, llm: Arc<dyn LlmClient>, writer: Arc<dyn AnalyticsWriter>) -> Self {
        Self { store, llm, writer }
    }

    /// Returns the cached summary, a freshly generated one if refresh
    /// criteria are met, or `None` if there isn't enough conversation yet or
    /// generation failed. Never returns an error: a missing summary just
    /// means `respond`'s prompt omits the memory layer.
    pub async fn get_or_create_summary(
        &self,
        conversation_id: &str,
        messages: &[Message],
        business_id: &str,
        execution_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<ConversationSummary> {
        let existing = match self.store.get(conversation_id).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load cached conversation summary");
                None
            }
        };

        let current_message_count = messages.len();

        let needs_refresh = match &existing {
            None => {
                if current_message_count < MIN_MESSAGES_TO_SUMMARIZE {
                    return None;
                }
                true
            }
            Some(summary) => {
                let messages_since = current_message_count.saturating_sub(summary.message_count);
                let age = now.signed_duration_since(summary.last_updated_at);
                messages_since >= MESSAGES_SINCE_REFRESH_THRESHOLD
                    || age > chrono::Duration::hours(MAX_SUMMARY_AGE_HOURS)
            }
        };

        if !needs_refresh {
            return existing;
        }

        let generated = self
            .generate_summary(messages, business_id, execution_id, current_message_count, now)
            .await;

        match generated {
            Some(summary) => {
                if let Err(e) = self.store.save(conversation_id, summary.clone()).await {
                    tracing::warn!(error = %e, "failed to persist conversation summary");
                }
                Some(summary)
            }
            None => existing,
        }
    }

    async fn generate_summary(
        &self,
        messages: &[Message],
        business_id: &str,
        execution_id: Option<&str>,
        message_count: usize,
        now: DateTime<Utc>,
    ) -> Option<ConversationSummary> {
        let window = if messages.len() > MAX_MESSAGES_IN_PROMPT {
            &messages[messages.len() - MAX_MESSAGES_IN_PROMPT..]
        } else {
            messages
        };

        let conversation_text = window
            .iter()
            .filter(|m| !matches!(m, Message::System(_)))
            .map(|m| format!("{}: {}", if matches!(m, Message::User(_)) { "Customer" } else { "Assistant" }, m.content()))
            .collect::<Vec<_>>()
            .join("\n");

        let schema = summary_schema();
        let meta = CallMetadata {
            business_id: business_id.to_string(),
            execution_id: execution_id.map(str::to_string),
            operation_type: "summarization".to_string(),
            operation_context: serde_json::json!({ "message_count": window.len() }),
            provider: "openai".to_string(),
            model: SUMMARIZATION_MODEL.to_string(),
            reasoning_effort: Some(ReasoningEffort::Low.as_str().to_string()),
        };

        let llm = self.llm.clone();
        let prompt_messages = vec![
            Message::system(SUMMARIZATION_SYSTEM_PROMPT),
            Message::user(format!("CONVERSATION:\n\n{conversation_text}")),
        ];
        let options = CallOptions::with_effort(ReasoningEffort::Low);

        let result = tracker::track_call(meta, self.writer.as_ref(), move || async move {
            let (value, usage) = llm
                .invoke_structured(&prompt_messages, "conversation_summary", &schema, &options)
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

        let value = match result {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "conversation summarization call failed");
                return None;
            }
        };

        #[derive(Deserialize)]
        struct RawSummary {
            text: String,
            topics: Vec<String>,
        }

        match serde_json::from_value::<RawSummary>(value) {
            Ok(raw) => Some(ConversationSummary {
                text: raw.text,
                topics: raw.topics,
                message_count,
                last_updated_at: now,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "could not parse conversation summary response");
                None
            }
        }
    }
}

fn summary_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "text": { "type": "string", "description": "2-3 paragraph conversation summary" },
            "topics": { "type": "array", "items": { "type": "string" }, "description": "Main topics discussed" }
        },
        "required": ["text", "topics"],
        "additionalProperties": false
    })
}

/// Fixed upper bound on how long a summary may sit unrefreshed.
pub fn max_summary_age() -> Duration {
    Duration::from_secs(MAX_SUMMARY_AGE_HOURS as u64 * 3600)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::InMemoryAnalyticsWriter;
    use crate::llm::MockLlm;

    fn messages(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question {i}"))
                } else {
                    Message::assistant(format!("answer {i}"))
                }
            })
            .collect()
    }

    fn memory_with_structured(value: serde_json::Value) -> ConversationMemory {
        let store = Arc::new(InMemorySummaryStore::new());
        let llm = Arc::new(MockLlm::with_structured("ignored", value));
        let writer = Arc::new(InMemoryAnalyticsWriter::new());
        ConversationMemory::new(store, llm, writer)
    }

    #[tokio::test]
    async fn returns_none_below_minimum_message_count() {
        let memory = memory_with_structured(serde_json::json!({"text": "summary", "topics": ["a"]}));
        let result = memory
            .get_or_create_summary("conv-1", &messages(3), "biz-1", None, Utc::now())
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn generates_summary_once_minimum_reached() {
        let memory = memory_with_structured(
            serde_json::json!({"text": "they asked about refunds", "topics": ["refunds"]}),
        );
        let result = memory
            .get_or_create_summary("conv-1", &messages(6), "biz-1", None, Utc::now())
            .await
            .unwrap();
        assert_eq!(result.text, "they asked about refunds");
        assert_eq!(result.message_count, 6);
    }

    #[tokio::test]
    async fn returns_cached_summary_when_no_refresh_needed() {
        let store = Arc::new(InMemorySummaryStore::new());
        let now = Utc::now();
        store
            .save(
                "conv-1",
                ConversationSummary {
                    text: "cached".to_string(),
                    topics: vec![],
                    message_count: 6,
                    last_updated_at: now,
                },
            )
            .await
            .unwrap();
        let llm = Arc::new(MockLlm::with_content(r#"{"text":"fresh","topics":[]}"#));
        let writer = Arc::new(InMemoryAnalyticsWriter::new());
        let memory = ConversationMemory::new(store, llm, writer);

        let result = memory
            .get_or_create_summary("conv-1", &messages(7), "biz-1", None, now)
            .await
            .unwrap();
        assert_eq!(result.text, "cached");
    }

    #[tokio::test]
    async fn refreshes_after_ten_new_messages() {
        let store = Arc::new(InMemorySummaryStore::new());
        let now = Utc::now();
        store
            .save(
                "conv-1",
                ConversationSummary {
                    text: "stale".to_string(),
                    topics: vec![],
                    message_count: 6,
                    last_updated_at: now,
                },
            )
            .await
            .unwrap();
        let llm = Arc::new(MockLlm::with_structured(
            "ignored",
            serde_json::json!({"text": "refreshed", "topics": ["x"]}),
        ));
        let writer = Arc::new(InMemoryAnalyticsWriter::new());
        let memory = ConversationMemory::new(store, llm, writer);

        let result = memory
            .get_or_create_summary("conv-1", &messages(16), "biz-1", None, now)
            .await
            .unwrap();
        assert_eq!(result.text, "refreshed");
    }

    #[tokio::test]
    async fn refreshes_when_summary_older_than_24_hours() {
        let store = Arc::new(InMemorySummaryStore::new());
        let now = Utc::now();
        store
            .save(
                "conv-1",
                ConversationSummary {
                    text: "old".to_string(),
                    topics: vec![],
                    message_count: 6,
                    last_updated_at: now - chrono::Duration::hours(25),
                },
            )
            .await
            .unwrap();
        let llm = Arc::new(MockLlm::with_structured(
            "ignored",
            serde_json::json!({"text": "new summary", "topics": []}),
        ));
        let writer = Arc::new(InMemoryAnalyticsWriter::new());
        let memory = ConversationMemory::new(store, llm, writer);

        let result = memory
            .get_or_create_summary("conv-1", &messages(7), "biz-1", None, now)
            .await
            .unwrap();
        assert_eq!(result.text, "new summary");
    }

    #[tokio::test]
    async fn falls_back_to_cached_summary_when_generation_fails() {
        let store = Arc::new(InMemorySummaryStore::new());
        let now = Utc::now();
        store
            .save(
                "conv-1",
                ConversationSummary {
                    text: "cached".to_string(),
                    topics: vec![],
                    message_count: 6,
                    last_updated_at: now,
                },
            )
            .await
            .unwrap();
        let llm = Arc::new(MockLlm::with_content("not valid json"));
        let writer = Arc::new(InMemoryAnalyticsWriter::new());
        let memory = ConversationMemory::new(store, llm, writer);

        let result = memory
            .get_or_create_summary("conv-1", &messages(16), "biz-1", None, now)
            .await
            .unwrap();
        assert_eq!(result.text, "cached");
    }
}
