//! Structured tracing spans for graph and node execution.

use std::fmt::Debug;

use tracing::{debug, error, info};

pub fn log_graph_start(run_id: &str, first_node: &str) {
    info!(run_id, first_node, "graph run started");
}

pub fn log_graph_complete(run_id: &str, nodes_visited: &[String]) {
    info!(run_id, nodes_visited = ?nodes_visited, "graph run completed");
}

pub fn log_graph_error(run_id: &str, node_id: &str, error: &dyn std::fmt::Display) {
    error!(run_id, node_id, %error, "graph run failed");
}

pub fn log_node_start(run_id: &str, node_id: &str) {
    debug!(run_id, node_id, "node started");
}

pub fn log_node_complete(run_id: &str, node_id: &str, elapsed_ms: u128) {
    debug!(run_id, node_id, elapsed_ms, "node completed");
}

pub fn log_state_update<S: Debug>(run_id: &str, node_id: &str, state: &S) {
    debug!(run_id, node_id, state = ?state, "state updated");
}
