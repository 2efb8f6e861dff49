//! State graph: nodes + explicit/conditional edges, compile and invoke.
//!
//! Build with [`StateGraph`], compile to an immutable [`CompiledStateGraph`],
//! then `invoke` (or `invoke_with_timeout`) with a state value.

mod compile_error;
mod compiled;
mod conditional;
mod logging;
mod logging_middleware;
mod name_node;
mod next;
mod node;
mod node_middleware;
mod run_context;
mod state_graph;

pub use compile_error::CompilationError;
pub use compiled::CompiledStateGraph;
pub use conditional::{ConditionalRouter, ConditionalRouterFn, NextEntry};
pub use logging::{
    log_graph_complete, log_graph_error, log_graph_start, log_node_complete, log_node_start,
    log_state_update,
};
pub use logging_middleware::LoggingNodeMiddleware;
pub use name_node::NameNode;
pub use next::Next;
pub use node::Node;
pub use node_middleware::NodeMiddleware;
pub use run_context::RunContext;
pub use state_graph::{StateGraph, END, START};
