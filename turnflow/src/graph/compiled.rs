//! Compiled, immutable state graph: executes nodes from START to END.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AgentError;

use super::conditional::NextEntry;
use super::logging::{log_graph_complete, log_graph_error, log_graph_start};
use super::node::Node;
use super::node_middleware::NodeMiddleware;
use super::run_context::RunContext;
use super::next::Next;
use super::state_graph::END;

/// An executable graph produced by [`StateGraph::compile`](super::StateGraph::compile).
///
/// Immutable: node set, edge order, and conditional routers are fixed at
/// compile time. `invoke` walks the graph from its single START node, applying
/// middleware (if any) around every node run, until a node returns `Next::End`
/// or the compiled chain runs out of edges.
pub struct CompiledStateGraph<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    pub(super) nodes: HashMap<String, Arc<dyn Node<S>>>,
    pub(super) first_node_id: String,
    pub(super) edge_order: Vec<String>,
    pub(super) next_map: HashMap<String, NextEntry<S>>,
    pub(super) middleware: Option<Arc<dyn NodeMiddleware<S>>>,
}

impl<S> CompiledStateGraph<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Runs the graph to completion, with no deadline.
    pub async fn invoke(&self, state: S) -> Result<S, AgentError> {
        self.invoke_with_context(state, RunContext::new("run")).await
    }

    /// Runs the graph to completion, aborting with `AgentError::Timeout` if the
    /// whole run exceeds `timeout`.
    pub async fn invoke_with_timeout(
        &self,
        state: S,
        run_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<S, AgentError> {
        self.invoke_with_context(state, RunContext::with_timeout(run_id, timeout))
            .await
    }

    /// Runs the graph to completion using an explicit [`RunContext`].
    pub async fn invoke_with_context(
        &self,
        mut state: S,
        ctx: RunContext<S>,
    ) -> Result<S, AgentError> {
        log_graph_start(&ctx.run_id, &self.first_node_id);

        let mut current_id = self.first_node_id.clone();
        let mut visited = Vec::new();
        let max_steps = self.nodes.len().saturating_mul(4).max(16);

        loop {
            if visited.len() > max_steps {
                return Err(AgentError::ExecutionFailed(format!(
                    "graph exceeded {} steps without reaching END (possible cycle)",
                    max_steps
                )));
            }
            if ctx.is_expired() {
                return Err(AgentError::Timeout(format!(
                    "turn deadline exceeded at node {}",
                    current_id
                )));
            }

            let node = self.nodes.get(&current_id).ok_or_else(|| {
                AgentError::ExecutionFailed(format!("node not found: {}", current_id))
            })?;
            visited.push(current_id.clone());

            let run_result = match (&self.middleware, ctx.remaining()) {
                (Some(mw), _) => {
                    let node = node.clone();
                    mw.around_run(
                        &current_id,
                        state,
                        Box::new(move |s| Box::pin(async move { node.run(s).await })),
                    )
                    .await
                }
                (None, Some(remaining)) => {
                    match tokio::time::timeout(remaining, node.run_with_context(state, &ctx)).await
                    {
                        Ok(r) => r,
                        Err(_) => {
                            return Err(AgentError::Timeout(format!(
                                "turn deadline exceeded running node {}",
                                current_id
                            )))
                        }
                    }
                }
                (None, None) => node.run_with_context(state, &ctx).await,
            };

            let (new_state, next) = match run_result {
                Ok(v) => v,
                Err(e) => {
                    log_graph_error(&ctx.run_id, &current_id, &e);
                    return Err(e);
                }
            };
            state = new_state;

            let resolved = match next {
                Next::End => None,
                Next::Node(id) => Some(id),
                Next::Continue => match self.next_map.get(&current_id) {
                    Some(NextEntry::Unconditional(to)) => Some(to.clone()),
                    Some(NextEntry::Conditional(router)) => Some(router.resolve(&state)),
                    None => None,
                },
            };

            match resolved {
                None => break,
                Some(id) if id == END => break,
                Some(id) => current_id = id,
            }
        }

        log_graph_complete(&ctx.run_id, &visited);
        Ok(state)
    }

    /// Node ids in compiled edge order (useful for diagnostics/tests).
    pub fn node_ids(&self) -> Vec<&str> {
        self.edge_order.iter().map(|s| s.as_str()).collect()
    }
}
