//! Greets the customer on their first message, then falls through to
//! `respond` so the turn still produces a substantive reply.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::AgentConfiguration;
use crate::error::AgentError;
use crate::graph::{Next, Node};
use crate::message::Message;
use crate::prompts::{PromptComposer, SpecializedPrompt};
use crate::state::TurnState;

const DEFAULT_GREETING: &str = "¡Hola! 👋 ¿En qué puedo ayudarte hoy?";

pub struct Greet {
    config: Arc<AgentConfiguration>,
}

impl Greet {
    pub fn new(config: Arc<AgentConfiguration>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Node<TurnState> for Greet {
    fn id(&self) -> &str {
        "greet"
    }

    async fn run(&self, mut state: TurnState) -> Result<(TurnState, Next), AgentError> {
        state.record_node(self.id());

        if state.is_first_message {
            let greeting = PromptComposer::compose_specialized_prompt(
                &self.config,
                &state,
                SpecializedPrompt::Greet,
                Utc::now(),
            );
            let text = if greeting.is_empty() { DEFAULT_GREETING.to_string() } else { greeting };
            state.messages.push(Message::assistant(text));
        }

        Ok((state, Next::Node("respond".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(is_first: bool) -> TurnState {
        TurnState::new("biz-1", "conv-1", "+5511999999999", None, "exec-1", "hola", is_first, Utc::now())
    }

    #[tokio::test]
    async fn greets_on_first_message() {
        let node = Greet::new(Arc::new(AgentConfiguration::default_for("biz-1")));
        let (out, next) = node.run(state(true)).await.unwrap();
        assert_eq!(out.messages.len(), 2);
        assert_eq!(next, Next::Node("respond".to_string()));
    }

    #[tokio::test]
    async fn skips_greeting_on_later_messages() {
        let node = Greet::new(Arc::new(AgentConfiguration::default_for("biz-1")));
        let (out, _) = node.run(state(false)).await.unwrap();
        assert_eq!(out.messages.len(), 1);
    }
}
