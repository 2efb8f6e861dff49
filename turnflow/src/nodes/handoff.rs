//! Terminal node: marks the turn for human handoff and appends a transfer
//! message. The conversation's `ai_paused` flag is set by the collaborator
//! surface that reads `handoff_reason` out of the execution record's
//! metadata, not by this node directly.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::AgentConfiguration;
use crate::error::AgentError;
use crate::graph::{Next, Node};
use crate::message::Message;
use crate::prompts::{PromptComposer, SpecializedPrompt};
use crate::state::TurnState;

pub struct Handoff {
    config: Arc<AgentConfiguration>,
}

impl Handoff {
    pub fn new(config: Arc<AgentConfiguration>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Node<TurnState> for Handoff {
    fn id(&self) -> &str {
        "handoff"
    }

    async fn run(&self, mut state: TurnState) -> Result<(TurnState, Next), AgentError> {
        state.record_node(self.id());

        let message = PromptComposer::compose_specialized_prompt(
            &self.config,
            &state,
            SpecializedPrompt::Handoff,
            Utc::now(),
        );
        state.messages.push(Message::assistant(message));

        Ok((state, Next::End))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_transfer_message_and_ends() {
        let node = Handoff::new(Arc::new(AgentConfiguration::default_for("biz-1")));
        let state = TurnState::new("biz-1", "conv-1", "+5511999999999", None, "exec-1", "necesito un humano", false, Utc::now());
        let (out, next) = node.run(state).await.unwrap();
        assert_eq!(next, Next::End);
        assert!(matches!(out.messages.last(), Some(Message::Assistant(_))));
    }
}
