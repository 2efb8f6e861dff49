//! Multi-layer system prompt assembly: base system layer, agent layer,
//! knowledge base context, confidence-driven disclaimer, conversation memory.
//!
//! Variable interpolation (`{business_name}`, `{customer_name}`, ...) only
//! runs when `config.enable_dynamic_variables` is set; custom variables from
//! `config.custom_variables` are interpolated after system variables, and
//! any placeholder left unresolved is kept intact rather than blanked out.

use chrono::{DateTime, Utc};

use crate::config::AgentConfiguration;
use crate::state::TurnState;

const HANDOFF_PROMPT_DEFAULT: &str = "Te conecto con un asesor que te ayudará mejor 👤";
const FALLBACK_PROMPT_DEFAULT: &str =
    "Lo siento, no tengo información específica sobre eso. ¿Te gustaría que te conecte con un asesor?";

/// Prepended to the full prompt when knowledge-base retrieval was expected
/// but came back empty, so the model states it has no information instead
/// of guessing.
const ANTI_HALLUCINATION_GUARDRAIL: &str =
    "⚠️ CRÍTICO: No tienes información en la base de conocimiento para responder esta consulta.\n\
     DEBES decir explícitamente que no tienes esa información disponible y ofrecer conectar al \
     usuario con un asesor humano. No inventes ni asumas datos que no están en el contexto.";

/// The summary text injected into the conversation-memory layer (already
/// truncated to the composer's character budget by the caller if needed).
pub struct MemoryContext<'a> {
    pub summary_text: &'a str,
}

/// Assembles the full system prompt passed to `respond`/`retry_respond`.
pub struct PromptComposer;

impl PromptComposer {
    /// Builds the base system layer: `config.system_prompt` with variables
    /// interpolated, optionally followed by the conversation-memory section.
    pub fn compose_system_layer(
        config: &AgentConfiguration,
        state: &TurnState,
        memory: Option<MemoryContext>,
        now: DateTime<Utc>,
    ) -> String {
        let mut prompt = config.system_prompt.clone();
        if config.enable_dynamic_variables {
            prompt = Self::inject_system_variables(&prompt, config, state, now);
            prompt = Self::inject_custom_variables(&prompt, config);
        }

        if config.enable_conversation_memory {
            if let Some(mem) = memory {
                if !mem.summary_text.is_empty() {
                    let truncated: String = mem.summary_text.chars().take(300).collect();
                    prompt.push_str(&format!(
                        "\n\n--- Resumen de Conversación Previa ---\n{}\n",
                        truncated
                    ));
                }
            }
        }

        prompt
    }

    /// Builds the full multi-layer prompt used by `respond`/`retry_respond`:
    /// system layer, optional agent layer, optional KB context, optional
    /// confidence-driven disclaimer.
    pub fn compose_full_prompt(
        config: &AgentConfiguration,
        state: &TurnState,
        memory: Option<MemoryContext>,
        now: DateTime<Utc>,
    ) -> String {
        let mut layers = Vec::new();

        layers.push(Self::compose_system_layer(config, state, memory, now));

        if let Some(agent) = &config.agent_prompt {
            if !agent.is_empty() {
                let interpolated = if config.enable_dynamic_variables {
                    Self::inject_custom_variables(
                        &Self::inject_system_variables(agent, config, state, now),
                        config,
                    )
                } else {
                    agent.clone()
                };
                layers.push(format!("\n--- Instrucciones Específicas ---\n{interpolated}"));
            }
        }

        if let Some(docs) = &state.retrieved_docs {
            if !docs.is_empty() {
                let kb_context = docs.join("\n\n");
                layers.push(format!("\n--- Base de Conocimiento ---\n{kb_context}"));
            }
        }

        if let Some(disclaimer) = Self::confidence_disclaimer(state.confidence, state.suggest_handoff_in_response) {
            layers.push(disclaimer);
        }

        layers.join("\n")
    }

    /// Like [`compose_full_prompt`](Self::compose_full_prompt), but with the
    /// anti-hallucination guardrail prepended — used by `respond` when
    /// retrieval was expected but came back empty.
    pub fn compose_guardrail_prefixed_prompt(
        config: &AgentConfiguration,
        state: &TurnState,
        memory: Option<MemoryContext>,
        now: DateTime<Utc>,
    ) -> String {
        format!(
            "{ANTI_HALLUCINATION_GUARDRAIL}\n\n{}",
            Self::compose_full_prompt(config, state, memory, now)
        )
    }

    /// Resolves `greet_prompt`/`handoff_prompt`/`fallback_prompt`, falling
    /// back to the documented default and running the same variable
    /// interpolation as the system layer.
    pub fn compose_specialized_prompt(
        config: &AgentConfiguration,
        state: &TurnState,
        kind: SpecializedPrompt,
        now: DateTime<Utc>,
    ) -> String {
        let (configured, default) = match kind {
            SpecializedPrompt::Greet => (&config.greet_prompt, None),
            SpecializedPrompt::Handoff => (&config.handoff_prompt, Some(HANDOFF_PROMPT_DEFAULT)),
            SpecializedPrompt::Fallback => (&config.fallback_prompt, Some(FALLBACK_PROMPT_DEFAULT)),
        };

        let base = configured
            .clone()
            .or_else(|| default.map(str::to_string))
            .unwrap_or_default();

        if base.is_empty() {
            return base;
        }

        if config.enable_dynamic_variables {
            let interpolated = Self::inject_system_variables(&base, config, state, now);
            Self::inject_custom_variables(&interpolated, config)
        } else {
            base
        }
    }

    fn inject_system_variables(
        prompt: &str,
        config: &AgentConfiguration,
        state: &TurnState,
        now: DateTime<Utc>,
    ) -> String {
        let mut out = prompt.to_string();
        let replacements: [(&str, String); 8] = [
            ("{business_name}", config.business_id.clone()),
            (
                "{customer_name}",
                state.customer_name.clone().unwrap_or_else(|| "Cliente".to_string()),
            ),
            ("{current_time}", now.format("%I:%M %p").to_string()),
            ("{current_date}", now.format("%d de %B, %Y").to_string()),
            ("{day_of_week}", now.format("%A").to_string()),
            ("{conversation_summary}", String::new()),
            ("{sentiment}", format!("{:?}", state.customer_sentiment)),
            ("{complexity}", format!("{:?}", state.complexity)),
        ];
        for (placeholder, value) in replacements {
            out = out.replace(placeholder, &value);
        }
        out
    }

    fn inject_custom_variables(prompt: &str, config: &AgentConfiguration) -> String {
        let mut out = prompt.to_string();
        for (name, value) in &config.custom_variables {
            out = out.replace(&format!("{{{name}}}"), value);
        }
        out
    }

    /// The confidence-driven disclaimer layer. `None` means no disclaimer
    /// applies (confidence is high and `suggest_handoff_in_response` is false).
    fn confidence_disclaimer(confidence: f32, suggest_handoff: bool) -> Option<String> {
        if confidence < 0.4 {
            Some(
                "\n\n⚠️ CRÍTICO: Tu nivel de confianza sobre esta consulta es MUY BAJO (<40%).\n\
                 No tienes información suficiente para responder con certeza.\n\
                 DEBES ofrecer conectar al usuario con un asesor humano de forma directa y clara."
                    .to_string(),
            )
        } else if confidence < 0.6 {
            Some(
                "\n\n💡 NOTA: Tu nivel de confianza sobre esta consulta es MEDIO (40-60%).\n\
                 Responde lo mejor que puedas con la información disponible, pero al final\n\
                 sugiere de forma natural que pueden contactar a un asesor si necesitan más ayuda."
                    .to_string(),
            )
        } else if suggest_handoff {
            Some(
                "\n\n💡 SUGERENCIA: Aunque puedes responder, el usuario podría beneficiarse de atención humana.\n\
                 Incluye sutilmente la opción de hablar con un asesor si lo prefiere."
                    .to_string(),
            )
        } else {
            None
        }
    }
}

/// Which specialized layer to compose.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpecializedPrompt {
    Greet,
    Handoff,
    Fallback,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn state() -> TurnState {
        TurnState::new("biz-1", "conv-1", "+5511999999999", None, "exec-1", "hola", true, now())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn disclaimer_mandatory_below_point_four() {
        let d = PromptComposer::confidence_disclaimer(0.2, false).unwrap();
        assert!(d.contains("CRÍTICO"));
    }

    #[test]
    fn disclaimer_suggest_between_bands() {
        let d = PromptComposer::confidence_disclaimer(0.5, false).unwrap();
        assert!(d.contains("MEDIO"));
    }

    #[test]
    fn disclaimer_soft_when_suggest_handoff_flag_set() {
        let d = PromptComposer::confidence_disclaimer(0.9, true).unwrap();
        assert!(d.contains("SUGERENCIA"));
    }

    #[test]
    fn disclaimer_absent_when_confident_and_not_suggesting() {
        assert!(PromptComposer::confidence_disclaimer(0.9, false).is_none());
    }

    #[test]
    fn compose_full_prompt_includes_kb_context_when_present() {
        let config = AgentConfiguration::default_for("biz-1");
        let mut state = state();
        state.retrieved_docs = Some(vec!["doc one".to_string(), "doc two".to_string()]);
        let prompt = PromptComposer::compose_full_prompt(&config, &state, None, now());
        assert!(prompt.contains("Base de Conocimiento"));
        assert!(prompt.contains("doc one"));
    }

    #[test]
    fn compose_full_prompt_skips_kb_layer_when_no_docs() {
        let config = AgentConfiguration::default_for("biz-1");
        let prompt = PromptComposer::compose_full_prompt(&config, &state(), None, now());
        assert!(!prompt.contains("Base de Conocimiento"));
    }

    #[test]
    fn unresolved_custom_placeholder_is_left_intact() {
        let mut config = AgentConfiguration::default_for("biz-1");
        config.system_prompt = "Hello {unknown_var}".to_string();
        let prompt = PromptComposer::compose_system_layer(&config, &state(), None, now());
        assert_eq!(prompt, "Hello {unknown_var}");
    }

    #[test]
    fn custom_variable_is_interpolated() {
        let mut config = AgentConfiguration::default_for("biz-1");
        config.system_prompt = "Tienda: {shop_name}".to_string();
        config.custom_variables.insert("shop_name".to_string(), "El Sol".to_string());
        let prompt = PromptComposer::compose_system_layer(&config, &state(), None, now());
        assert_eq!(prompt, "Tienda: El Sol");
    }

    #[test]
    fn guardrail_prefixed_prompt_leads_with_the_critical_instruction() {
        let config = AgentConfiguration::default_for("biz-1");
        let prompt = PromptComposer::compose_guardrail_prefixed_prompt(&config, &state(), None, now());
        assert!(prompt.starts_with("⚠️ CRÍTICO"));
        assert!(prompt.contains(&config.system_prompt));
    }

    #[test]
    fn memory_layer_truncates_to_300_chars() {
        let config = AgentConfiguration::default_for("biz-1");
        let long_summary = "x".repeat(400);
        let prompt = PromptComposer::compose_system_layer(
            &config,
            &state(),
            Some(MemoryContext { summary_text: &long_summary }),
            now(),
        );
        let injected = prompt.split("Previa ---\n").nth(1).unwrap();
        assert_eq!(injected.trim_end().len(), 300);
    }
}
