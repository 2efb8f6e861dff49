//! Scoped measurement of one outbound LLM (or embedding) call.
//!
//! Rust has no async `Drop`, so the "always write a record on exit, even on
//! failure" context-manager semantics are expressed as a higher-order
//! function wrapping the call rather than a guard: [`track_call`] always
//! computes duration and cost and writes exactly one [`LlmCallRecord`],
//! whether the wrapped call succeeds or fails, and never lets a write
//! failure change the wrapped call's outcome.

use std::future::Future;
use std::time::Instant;

use crate::analytics::{AnalyticsWriter, LlmCallRecord};
use crate::error::AgentError;
use crate::pricing::calculate_cost;

/// Static metadata for one LLM call, known before the call is made.
#[derive(Clone, Debug)]
pub struct CallMetadata {
    pub business_id: String,
    pub execution_id: Option<String>,
    pub operation_type: String,
    pub operation_context: serde_json::Value,
    pub provider: String,
    pub model: String,
    pub reasoning_effort: Option<String>,
}

/// Token accounting reported by the caller after a successful call.
#[derive(Clone, Copy, Debug, Default)]
pub struct CallTokens {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cached_tokens: u32,
    pub cache_hit: bool,
}

/// Wraps one LLM call: runs `f`, always persists an [`LlmCallRecord`]
/// (tokens zeroed and `error` populated on failure), and returns the
/// original `Result` unchanged. Write failures are logged, never propagated.
pub async fn track_call<F, Fut, T>(
    meta: CallMetadata,
    writer: &dyn AnalyticsWriter,
    f: F,
) -> Result<T, AgentError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(T, CallTokens), AgentError>>,
{
    let start = Instant::now();
    let outcome = f().await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let (tokens, error) = match &outcome {
        Ok((_, tokens)) => (*tokens, None),
        Err(e) => (CallTokens::default(), Some(e.to_string())),
    };

    let costs = calculate_cost(
        &meta.model,
        tokens.input_tokens,
        tokens.output_tokens,
        tokens.cached_tokens,
    );

    let record = LlmCallRecord {
        business_id: meta.business_id,
        execution_id: meta.execution_id,
        operation_type: meta.operation_type,
        operation_context: meta.operation_context,
        provider: meta.provider,
        model: meta.model,
        input_tokens: tokens.input_tokens,
        output_tokens: tokens.output_tokens,
        cached_tokens: tokens.cached_tokens,
        total_tokens: tokens.input_tokens + tokens.output_tokens,
        input_cost: costs.input_cost,
        output_cost: costs.output_cost,
        cached_cost: costs.cached_cost,
        total_cost: costs.total_cost,
        duration_ms,
        reasoning_effort: meta.reasoning_effort,
        cache_hit: tokens.cache_hit,
        error,
    };

    if let Err(e) = writer.write_llm_call(record).await {
        tracing::error!(error = %e, "failed to persist llm call record");
    }

    outcome.map(|(v, _)| v)
}

/// OpenAI embeddings average roughly one token per four characters; used
/// when the provider doesn't report embedding token counts directly.
pub fn estimate_embedding_tokens(text: &str) -> u32 {
    (text.len() / 4).max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::InMemoryAnalyticsWriter;

    fn meta() -> CallMetadata {
        CallMetadata {
            business_id: "biz-1".into(),
            execution_id: Some("exec-1".into()),
            operation_type: "chat".into(),
            operation_context: serde_json::json!({}),
            provider: "openai".into(),
            model: "gpt-5-mini".into(),
            reasoning_effort: None,
        }
    }

    #[tokio::test]
    async fn track_call_records_success_and_returns_value() {
        let writer = InMemoryAnalyticsWriter::new();
        let result = track_call(meta(), &writer, || async {
            Ok::<_, AgentError>((
                "hello",
                CallTokens { input_tokens: 10, output_tokens: 5, cached_tokens: 0, cache_hit: false },
            ))
        })
        .await
        .unwrap();

        assert_eq!(result, "hello");
        assert_eq!(writer.llm_calls.len(), 1);
        let record = writer.llm_calls.get(&0).unwrap();
        assert_eq!(record.total_tokens, 15);
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn track_call_records_failure_and_propagates_error() {
        let writer = InMemoryAnalyticsWriter::new();
        let result: Result<&str, AgentError> = track_call(meta(), &writer, || async {
            Err(AgentError::Llm("boom".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(writer.llm_calls.len(), 1);
        let record = writer.llm_calls.get(&0).unwrap();
        assert_eq!(record.total_tokens, 0);
        assert!(record.error.as_deref() == Some("llm error: boom"));
    }

    #[test]
    fn estimate_embedding_tokens_rounds_down_with_floor_of_one() {
        assert_eq!(estimate_embedding_tokens(""), 1);
        assert_eq!(estimate_embedding_tokens("abc"), 1);
        assert_eq!(estimate_embedding_tokens("twelve chars"), 3);
    }
}
