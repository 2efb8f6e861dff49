//! Graph node implementations. Each node implements [`crate::graph::Node`]
//! for [`crate::state::TurnState`] and returns the [`crate::graph::Next`]
//! that drives the dynamic branching described in the engine module;
//! the graph's declared edges exist only to satisfy structural compilation.

mod greet;
mod handoff;
mod optimized_rag;
mod orchestrator;
mod respond;
mod smart_router;
mod validate_response;

pub use greet::Greet;
pub use handoff::Handoff;
pub use optimized_rag::OptimizedRag;
pub use orchestrator::Orchestrator;
pub use respond::Respond;
pub use smart_router::SmartRouter;
pub use validate_response::{RetryRespond, ValidateResponse};
