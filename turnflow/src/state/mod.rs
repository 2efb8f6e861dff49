//! The value that flows through the graph: one [`TurnState`] per in-flight turn.
//!
//! Every node receives the current `TurnState`, returns an updated one plus a
//! [`crate::graph::Next`]. `messages` and `nodes_visited` are append-only;
//! every other field is last-write-wins (a node that sets a field overrides
//! whatever a previous node set).

use chrono::{DateTime, Utc};

use crate::message::Message;

/// Classified intent of the latest customer message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    #[default]
    Question,
    Complaint,
    RequestHuman,
    Other,
}

/// Customer sentiment, as assessed by the smart router or orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    VeryPositive,
    Positive,
    #[default]
    Neutral,
    Negative,
    VeryNegative,
}

/// Retrieval strategy selected for the turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KbSearchStrategy {
    Exact,
    Broad,
    MultiQuery,
    #[default]
    None,
}

/// Perceived complexity of the turn, used only for prompt interpolation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    #[default]
    Simple,
    Medium,
    Complex,
}

/// How `respond` should approach answering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStrategy {
    #[default]
    Direct,
    WithContext,
    MultiStep,
    Deflect,
}

/// Derived from the orchestrator's output; decides the edge out of `orchestrator`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingDecision {
    ForceHandoff,
    SuggestHandoff,
    Greet,
    RetrieveKnowledge,
    DirectRespond,
}

/// Aggregated retrieval stats written by `optimized_rag`, carried on the state
/// for the final reply's metadata (distinct from the persisted RAG Metrics Record).
#[derive(Clone, Debug, Default)]
pub struct RagSummary {
    pub chunks_retrieved: usize,
    pub total_tokens: u32,
    pub sources: Vec<String>,
    pub avg_similarity: f32,
    pub retrieval_time_ms: u64,
}

/// The value that flows through the graph for one turn.
#[derive(Clone, Debug)]
pub struct TurnState {
    pub messages: Vec<Message>,

    // Identity
    pub business_id: String,
    pub conversation_id: String,
    pub customer_phone: String,
    pub customer_name: Option<String>,
    pub execution_id: String,
    pub started_at: DateTime<Utc>,

    // Classification
    pub intent: Intent,
    pub customer_sentiment: Sentiment,
    pub is_first_message: bool,

    // Planning
    pub confidence: f32,
    pub needs_knowledge_base: bool,
    pub kb_search_strategy: KbSearchStrategy,
    pub search_queries: Vec<String>,
    pub complexity: Complexity,
    pub response_strategy: ResponseStrategy,
    pub should_handoff: bool,
    pub handoff_reason: Option<String>,
    pub orchestrator_reasoning: Option<String>,
    pub use_full_orchestrator: bool,
    pub suggest_handoff_in_response: bool,

    // Retrieval
    pub retrieved_docs: Option<Vec<String>>,
    pub rag_summary: Option<RagSummary>,

    // Validation
    pub validation_passed: Option<bool>,
    pub quality_score: f32,
    pub validation_issues: Vec<String>,
    pub validation_feedback: String,
    pub was_retried: bool,

    // Tracking
    pub nodes_visited: Vec<String>,
    pub tools_used: Vec<String>,
}

impl TurnState {
    pub fn new(
        business_id: impl Into<String>,
        conversation_id: impl Into<String>,
        customer_phone: impl Into<String>,
        customer_name: Option<String>,
        execution_id: impl Into<String>,
        message: impl Into<String>,
        is_first_message: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            messages: vec![Message::user(message)],
            business_id: business_id.into(),
            conversation_id: conversation_id.into(),
            customer_phone: customer_phone.into(),
            customer_name,
            execution_id: execution_id.into(),
            started_at,
            intent: Intent::default(),
            customer_sentiment: Sentiment::default(),
            is_first_message,
            confidence: 0.0,
            needs_knowledge_base: false,
            kb_search_strategy: KbSearchStrategy::default(),
            search_queries: Vec::new(),
            complexity: Complexity::default(),
            response_strategy: ResponseStrategy::default(),
            should_handoff: false,
            handoff_reason: None,
            orchestrator_reasoning: None,
            use_full_orchestrator: true,
            suggest_handoff_in_response: false,
            retrieved_docs: None,
            rag_summary: None,
            validation_passed: None,
            quality_score: 0.0,
            validation_issues: Vec::new(),
            validation_feedback: String::new(),
            was_retried: false,
            nodes_visited: Vec::new(),
            tools_used: Vec::new(),
        }
    }

    /// The latest human message's text, used by the smart router and every
    /// prompt-building node.
    pub fn last_user_message(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find_map(|m| match m {
                Message::User(s) => Some(s.as_str()),
                _ => None,
            })
            .unwrap_or("")
    }

    /// The last assistant reply, if any node has produced one yet.
    pub fn last_assistant_reply(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::Assistant(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// Replaces the last assistant message in place (used by `retry_respond`).
    /// Appends instead if no assistant message exists yet.
    pub fn replace_last_assistant_reply(&mut self, content: impl Into<String>) {
        if let Some(pos) = self
            .messages
            .iter()
            .rposition(|m| matches!(m, Message::Assistant(_)))
        {
            self.messages[pos] = Message::assistant(content);
        } else {
            self.messages.push(Message::assistant(content));
        }
    }

    /// Derives the routing decision out of `orchestrator`, per the confidence
    /// and planning fields set on this state.
    pub fn routing_decision(&self) -> RoutingDecision {
        if self.should_handoff || self.confidence < 0.4 {
            RoutingDecision::ForceHandoff
        } else if self.confidence < 0.6 {
            RoutingDecision::SuggestHandoff
        } else if self.is_first_message {
            RoutingDecision::Greet
        } else if self.needs_knowledge_base {
            RoutingDecision::RetrieveKnowledge
        } else {
            RoutingDecision::DirectRespond
        }
    }

    pub fn record_node(&mut self, node_id: &str) {
        self.nodes_visited.push(node_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> TurnState {
        TurnState::new(
            "biz-1",
            "conv-1",
            "+5511999999999",
            None,
            "exec-1",
            "hola",
            true,
            Utc::now(),
        )
    }

    #[test]
    fn routing_decision_force_handoff_below_point_four() {
        let mut s = state();
        s.confidence = 0.35;
        assert_eq!(s.routing_decision(), RoutingDecision::ForceHandoff);
    }

    #[test]
    fn routing_decision_suggest_handoff_between_bands() {
        let mut s = state();
        s.confidence = 0.5;
        assert_eq!(s.routing_decision(), RoutingDecision::SuggestHandoff);
    }

    #[test]
    fn routing_decision_greet_on_first_message() {
        let mut s = state();
        s.confidence = 0.9;
        s.is_first_message = true;
        assert_eq!(s.routing_decision(), RoutingDecision::Greet);
    }

    #[test]
    fn routing_decision_retrieve_knowledge_when_needed() {
        let mut s = state();
        s.confidence = 0.9;
        s.is_first_message = false;
        s.needs_knowledge_base = true;
        assert_eq!(s.routing_decision(), RoutingDecision::RetrieveKnowledge);
    }

    #[test]
    fn routing_decision_direct_respond_otherwise() {
        let mut s = state();
        s.confidence = 0.9;
        s.is_first_message = false;
        s.needs_knowledge_base = false;
        assert_eq!(s.routing_decision(), RoutingDecision::DirectRespond);
    }

    #[test]
    fn replace_last_assistant_reply_replaces_in_place() {
        let mut s = state();
        s.messages.push(Message::assistant("first draft"));
        s.replace_last_assistant_reply("improved draft");
        assert_eq!(s.last_assistant_reply(), Some("improved draft"));
        assert_eq!(s.messages.len(), 2);
    }
}
