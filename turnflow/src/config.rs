//! Per-business agent configuration.
//!
//! Read-only within a turn: the engine loads one [`AgentConfiguration`] at
//! the start of `chat` and passes it by reference to every node.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::AgentError;

/// Model/provider configuration and prompt overrides for one business.
#[derive(Clone, Debug)]
pub struct AgentConfiguration {
    pub business_id: String,
    pub system_prompt: String,
    pub agent_prompt: Option<String>,
    pub greet_prompt: Option<String>,
    pub handoff_prompt: Option<String>,
    pub fallback_prompt: Option<String>,
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
    pub enabled: bool,
    pub custom_variables: HashMap<String, String>,
    pub enable_dynamic_variables: bool,
    pub enable_conversation_memory: bool,
}

const DEFAULT_SYSTEM_PROMPT: &str = "Eres un asistente virtual de atención al cliente profesional y amable.\n\nTu objetivo es:\n- Responder preguntas de los clientes de forma clara y precisa\n- Usar la información de la base de conocimiento cuando esté disponible\n- Ser cortés y mantener un tono profesional\n- Si no sabes algo, admítelo y ofrece transferir con un humano\n\nReglas:\n- Nunca inventes información\n- Sé breve y conciso\n- Mantén la conversación enfocada en ayudar al cliente";

impl AgentConfiguration {
    /// The configuration created for a business with no stored config yet.
    pub fn default_for(business_id: impl Into<String>) -> Self {
        Self {
            business_id: business_id.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            agent_prompt: None,
            greet_prompt: None,
            handoff_prompt: None,
            fallback_prompt: None,
            provider: "openai".to_string(),
            model: "gpt-5-mini".to_string(),
            max_tokens: 2000,
            enabled: true,
            custom_variables: HashMap::new(),
            enable_dynamic_variables: true,
            enable_conversation_memory: true,
        }
    }
}

/// Loads one business's configuration. Production backs this with the
/// businesses/agent-config table; [`InMemoryConfigStore`] backs tests and the
/// demo harness.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, business_id: &str) -> Result<Option<AgentConfiguration>, AgentError>;
}

/// In-memory configuration store, seeded explicitly — there is no implicit
/// default-for-any-business behavior here, unlike [`AgentConfiguration::default_for`]
/// which a caller can opt into before seeding one.
#[derive(Default)]
pub struct InMemoryConfigStore {
    configs: DashMap<String, AgentConfiguration>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, config: AgentConfiguration) {
        self.configs.insert(config.business_id.clone(), config);
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn get(&self, business_id: &str) -> Result<Option<AgentConfiguration>, AgentError> {
        Ok(self.configs.get(business_id).map(|c| c.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_for_is_enabled_with_gpt5_mini() {
        let cfg = AgentConfiguration::default_for("biz-1");
        assert!(cfg.enabled);
        assert_eq!(cfg.model, "gpt-5-mini");
        assert_eq!(cfg.provider, "openai");
    }

    #[tokio::test]
    async fn in_memory_store_returns_none_when_not_seeded() {
        let store = InMemoryConfigStore::new();
        assert!(store.get("biz-unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn in_memory_store_returns_seeded_config() {
        let store = InMemoryConfigStore::new();
        store.insert(AgentConfiguration::default_for("biz-1"));
        let cfg = store.get("biz-1").await.unwrap().unwrap();
        assert_eq!(cfg.business_id, "biz-1");
    }
}
