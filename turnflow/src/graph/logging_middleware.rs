//! Node middleware that logs start/complete/error around every node run.

use async_trait::async_trait;
use std::fmt::Debug;
use std::pin::Pin;
use std::time::Instant;

use crate::error::AgentError;

use super::logging::{log_node_complete, log_node_start};
use super::{Next, NodeMiddleware};

/// Wraps every node run with debug-level start/complete tracing spans.
pub struct LoggingNodeMiddleware {
    run_id: String,
}

impl LoggingNodeMiddleware {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }
}

#[async_trait]
impl<S> NodeMiddleware<S> for LoggingNodeMiddleware
where
    S: Clone + Send + Sync + Debug + 'static,
{
    async fn around_run(
        &self,
        node_id: &str,
        state: S,
        inner: Box<
            dyn FnOnce(
                    S,
                ) -> Pin<
                    Box<dyn std::future::Future<Output = Result<(S, Next), AgentError>> + Send>,
                > + Send,
        >,
    ) -> Result<(S, Next), AgentError> {
        log_node_start(&self.run_id, node_id);
        let started = Instant::now();
        let result = inner(state).await;
        log_node_complete(&self.run_id, node_id, started.elapsed().as_millis());
        result
    }
}
