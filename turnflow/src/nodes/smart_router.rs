//! Fast-path router: detects obvious greeting/farewell/thanks/request-human
//! patterns by keyword match and skips the orchestrator's LLM call entirely.
//!
//! Every fast-path match sets `confidence = 0.95` and leaves
//! `use_full_orchestrator = false`; anything else falls through to the
//! orchestrator.

use async_trait::async_trait;

use crate::error::AgentError;
use crate::graph::{Next, Node};
use crate::state::{Complexity, Intent, KbSearchStrategy, ResponseStrategy, Sentiment, TurnState};

const GREETING_PATTERNS: &[&str] = &["hola", "buenos días", "buenas tardes", "buenas noches", "hey", "hi", "buenas"];
const FAREWELL_PATTERNS: &[&str] = &["adiós", "adios", "chao", "chau", "hasta luego", "bye", "nos vemos"];
const THANKS_PATTERNS: &[&str] = &["gracias", "thank", "thanks", "grazie"];
const REQUEST_HUMAN_PATTERNS: &[&str] = &["hablar con", "persona", "humano", "agente", "operador", "asesor"];

enum FastPath {
    Greeting,
    Farewell,
    Thanks,
    RequestHuman,
}

fn detect(message: &str) -> Option<FastPath> {
    let lower = message.to_lowercase();
    if GREETING_PATTERNS.iter().any(|p| lower.contains(p)) {
        Some(FastPath::Greeting)
    } else if FAREWELL_PATTERNS.iter().any(|p| lower.contains(p)) {
        Some(FastPath::Farewell)
    } else if THANKS_PATTERNS.iter().any(|p| lower.contains(p)) {
        Some(FastPath::Thanks)
    } else if REQUEST_HUMAN_PATTERNS.iter().any(|p| lower.contains(p)) {
        Some(FastPath::RequestHuman)
    } else {
        None
    }
}

pub struct SmartRouter;

#[async_trait]
impl Node<TurnState> for SmartRouter {
    fn id(&self) -> &str {
        "smart_router"
    }

    async fn run(&self, mut state: TurnState) -> Result<(TurnState, Next), AgentError> {
        state.record_node(self.id());

        let message = state.last_user_message().to_string();
        let fast_path = detect(&message);

        let Some(fast_path) = fast_path else {
            state.use_full_orchestrator = true;
            return Ok((state, Next::Node("orchestrator".to_string())));
        };

        state.use_full_orchestrator = false;
        state.confidence = 0.95;
        state.needs_knowledge_base = false;
        state.kb_search_strategy = KbSearchStrategy::None;
        state.search_queries = Vec::new();
        state.complexity = Complexity::Simple;

        let next = match fast_path {
            FastPath::Greeting => {
                state.intent = Intent::Greeting;
                state.should_handoff = false;
                state.handoff_reason = None;
                state.response_strategy = ResponseStrategy::Direct;
                state.customer_sentiment = Sentiment::Neutral;
                state.orchestrator_reasoning = Some("fast-path: detected greeting pattern".to_string());
                "respond"
            }
            FastPath::Farewell => {
                state.intent = Intent::Other;
                state.should_handoff = false;
                state.handoff_reason = None;
                state.response_strategy = ResponseStrategy::Direct;
                state.customer_sentiment = Sentiment::Positive;
                state.orchestrator_reasoning = Some("fast-path: detected farewell pattern".to_string());
                "respond"
            }
            FastPath::Thanks => {
                state.intent = Intent::Other;
                state.should_handoff = false;
                state.handoff_reason = None;
                state.response_strategy = ResponseStrategy::Direct;
                state.customer_sentiment = Sentiment::Positive;
                state.orchestrator_reasoning = Some("fast-path: detected thanks pattern".to_string());
                "respond"
            }
            FastPath::RequestHuman => {
                state.intent = Intent::RequestHuman;
                state.should_handoff = true;
                state.handoff_reason = Some("customer explicitly asked for a human".to_string());
                state.response_strategy = ResponseStrategy::Deflect;
                state.customer_sentiment = Sentiment::Neutral;
                state.orchestrator_reasoning = Some("fast-path: detected request for a human agent".to_string());
                "handoff"
            }
        };

        Ok((state, Next::Node(next.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn state(message: &str, is_first: bool) -> TurnState {
        TurnState::new("biz-1", "conv-1", "+5511999999999", None, "exec-1", message, is_first, Utc::now())
    }

    #[tokio::test]
    async fn greeting_fast_paths_to_respond() {
        let router = SmartRouter;
        let (out, next) = router.run(state("hola, buenas!", true)).await.unwrap();
        assert!(!out.use_full_orchestrator);
        assert_eq!(out.confidence, 0.95);
        assert_eq!(out.intent, Intent::Greeting);
        assert_eq!(next, Next::Node("respond".to_string()));
    }

    #[tokio::test]
    async fn request_human_routes_directly_to_handoff() {
        let router = SmartRouter;
        let (out, next) = router.run(state("quiero hablar con un humano", false)).await.unwrap();
        assert!(out.should_handoff);
        assert_eq!(out.intent, Intent::RequestHuman);
        assert_eq!(next, Next::Node("handoff".to_string()));
    }

    #[tokio::test]
    async fn unmatched_message_routes_to_orchestrator() {
        let router = SmartRouter;
        let (out, next) = router.run(state("what is your return policy", false)).await.unwrap();
        assert!(out.use_full_orchestrator);
        assert_eq!(next, Next::Node("orchestrator".to_string()));
    }

    #[tokio::test]
    async fn records_node_visit() {
        let router = SmartRouter;
        let (out, _) = router.run(state("hola", true)).await.unwrap();
        assert_eq!(out.nodes_visited, vec!["smart_router"]);
    }
}
