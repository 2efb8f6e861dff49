//! Static per-model pricing table and cost computation.
//!
//! Pricing per 1,000,000 tokens (Standard Tier), OpenAI and Groq as of early 2026.
//! Unknown models fall back to `gpt-5-mini` pricing.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Price per 1M tokens for a model. `cached_input` is `None` for models that
/// don't support prompt caching discounts.
#[derive(Clone, Copy, Debug)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
    pub cached_input: Option<f64>,
}

const DEFAULT_PRICE: ModelPrice = ModelPrice {
    input: 0.25,
    output: 2.00,
    cached_input: Some(0.025),
};

static PRICING: Lazy<HashMap<&'static str, ModelPrice>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(
        "gpt-5.1",
        ModelPrice { input: 1.25, output: 10.00, cached_input: Some(0.125) },
    );
    m.insert(
        "gpt-5",
        ModelPrice { input: 1.25, output: 10.00, cached_input: Some(0.125) },
    );
    m.insert("gpt-5-mini", DEFAULT_PRICE);
    m.insert(
        "gpt-5-nano",
        ModelPrice { input: 0.05, output: 0.40, cached_input: Some(0.005) },
    );
    m.insert(
        "gpt-5-chat-latest",
        ModelPrice { input: 1.25, output: 10.00, cached_input: Some(0.125) },
    );
    m.insert(
        "gpt-5.1-chat-latest",
        ModelPrice { input: 1.25, output: 10.00, cached_input: Some(0.125) },
    );
    m.insert(
        "gpt-5-codex",
        ModelPrice { input: 1.25, output: 10.00, cached_input: Some(0.125) },
    );
    m.insert(
        "gpt-5.1-codex",
        ModelPrice { input: 1.25, output: 10.00, cached_input: Some(0.125) },
    );
    m.insert(
        "gpt-5-pro",
        ModelPrice { input: 15.00, output: 120.00, cached_input: None },
    );
    m.insert(
        "gpt-4.1",
        ModelPrice { input: 2.00, output: 8.00, cached_input: Some(0.50) },
    );
    m.insert(
        "gpt-4.1-mini",
        ModelPrice { input: 0.40, output: 1.60, cached_input: Some(0.10) },
    );
    m.insert(
        "gpt-4.1-nano",
        ModelPrice { input: 0.10, output: 0.40, cached_input: Some(0.025) },
    );
    m.insert(
        "gpt-4o",
        ModelPrice { input: 2.50, output: 10.00, cached_input: Some(1.25) },
    );
    m.insert(
        "gpt-4o-mini",
        ModelPrice { input: 0.15, output: 0.60, cached_input: Some(0.075) },
    );
    m.insert(
        "o1",
        ModelPrice { input: 15.00, output: 60.00, cached_input: Some(7.50) },
    );
    m.insert(
        "o3",
        ModelPrice { input: 2.00, output: 8.00, cached_input: Some(0.50) },
    );
    m.insert(
        "o4-mini",
        ModelPrice { input: 1.10, output: 4.40, cached_input: Some(0.275) },
    );
    m.insert(
        "o3-mini",
        ModelPrice { input: 1.10, output: 4.40, cached_input: Some(0.55) },
    );
    m.insert(
        "text-embedding-3-small",
        ModelPrice { input: 0.02, output: 0.0, cached_input: None },
    );
    m.insert(
        "text-embedding-3-large",
        ModelPrice { input: 0.13, output: 0.0, cached_input: None },
    );
    m.insert(
        "text-embedding-ada-002",
        ModelPrice { input: 0.10, output: 0.0, cached_input: None },
    );
    m.insert(
        "openai/gpt-oss-120b",
        ModelPrice { input: 0.15, output: 0.60, cached_input: Some(0.075) },
    );
    m.insert(
        "gpt-3.5-turbo",
        ModelPrice { input: 0.50, output: 1.50, cached_input: None },
    );
    m
});

/// Looks up a model's pricing, falling back to `gpt-5-mini` pricing for
/// unknown identifiers.
pub fn model_price(model: &str) -> ModelPrice {
    PRICING.get(model).copied().unwrap_or(DEFAULT_PRICE)
}

/// Cost breakdown for one LLM call, each field rounded to 8 decimals.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub cached_cost: f64,
    pub total_cost: f64,
}

fn round8(v: f64) -> f64 {
    (v * 1e8).round() / 1e8
}

/// Computes the cost of one LLM call from token counts, using the model's
/// price per 1,000,000 tokens. `cached_tokens` only contributes a cost when
/// the model supports cached-input pricing.
pub fn calculate_cost(
    model: &str,
    input_tokens: u32,
    output_tokens: u32,
    cached_tokens: u32,
) -> CostBreakdown {
    let price = model_price(model);

    let input_cost = (input_tokens as f64 / 1_000_000.0) * price.input;
    let output_cost = (output_tokens as f64 / 1_000_000.0) * price.output;
    let cached_cost = match price.cached_input {
        Some(p) if cached_tokens > 0 => (cached_tokens as f64 / 1_000_000.0) * p,
        _ => 0.0,
    };

    CostBreakdown {
        input_cost: round8(input_cost),
        output_cost: round8(output_cost),
        cached_cost: round8(cached_cost),
        total_cost: round8(input_cost + output_cost + cached_cost),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calculate_cost_known_model_without_cache() {
        let c = calculate_cost("gpt-5-mini", 1000, 500, 0);
        assert_eq!(c.input_cost, 0.00025);
        assert_eq!(c.output_cost, 0.001);
        assert_eq!(c.cached_cost, 0.0);
        assert_eq!(c.total_cost, 0.00125);
    }

    #[test]
    fn calculate_cost_with_cached_tokens() {
        let c = calculate_cost("gpt-5-mini", 1000, 500, 2000);
        assert_eq!(c.cached_cost, 0.00005);
        assert_eq!(c.total_cost, 0.0013);
    }

    #[test]
    fn calculate_cost_unknown_model_falls_back_to_default() {
        let known = calculate_cost("gpt-5-mini", 1000, 500, 0);
        let unknown = calculate_cost("not-a-real-model", 1000, 500, 0);
        assert_eq!(known, unknown);
    }

    #[test]
    fn calculate_cost_no_cached_cost_when_model_has_no_cached_pricing() {
        let c = calculate_cost("gpt-5-pro", 1000, 500, 2000);
        assert_eq!(c.cached_cost, 0.0);
    }

    #[test]
    fn total_tokens_identity_holds() {
        let input_tokens = 123u32;
        let output_tokens = 456u32;
        assert_eq!(input_tokens + output_tokens, 579);
    }
}
