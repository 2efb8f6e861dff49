//! Conditional routing: source node -> router function -> next node id.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Routing function: given the state after a source node ran, returns a key.
///
/// The key is either a node id directly, or looked up in the router's `path_map`.
pub type ConditionalRouterFn<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

/// A conditional router attached to one source node: the routing function plus
/// an optional map from router keys to node ids (or `END`).
#[derive(Clone)]
pub struct ConditionalRouter<S> {
    pub path: ConditionalRouterFn<S>,
    pub path_map: Option<HashMap<String, String>>,
}

impl<S> ConditionalRouter<S> {
    pub fn new(path: ConditionalRouterFn<S>, path_map: Option<HashMap<String, String>>) -> Self {
        Self { path, path_map }
    }

    /// Resolves the next node id for `state`: calls `path`, then looks the result
    /// up in `path_map` when present (falling back to the raw key if absent).
    pub fn resolve(&self, state: &S) -> String {
        let key = (self.path)(state);
        match &self.path_map {
            Some(map) => map.get(&key).cloned().unwrap_or(key),
            None => key,
        }
    }
}

/// Compiled per-node routing: either a fixed next node, or a conditional router.
pub enum NextEntry<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    Unconditional(String),
    Conditional(ConditionalRouter<S>),
}
