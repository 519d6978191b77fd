use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    /// User-defined provider definitions, merged over the built-in
    /// registry (anthropic / openai / google / ollama).
    #[serde(default)]
    pub definitions: Vec<ProviderDefinition>,
    /// Per-model pricing for cost accounting (key = model name).
    #[serde(default)]
    pub pricing: HashMap<String, ModelPricing>,
    /// Pricing applied to models absent from the table.
    #[serde(default)]
    pub fallback_pricing: ModelPricing,
}

/// Which wire dialect a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKind {
    Anthropic,
    OpenaiCompat,
    Google,
    Ollama,
}

/// Metadata describing one LLM provider endpoint.  Data only — adding a
/// provider is adding config, never adding code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDefinition {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub api_type: ApiKind,
    /// Endpoint base URL.  Built-in definitions carry their public default.
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub default_model: Option<String>,
}

/// How a provider's API key is resolved.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Plaintext key in config (discouraged; a warning is logged).
    #[serde(default)]
    pub key: Option<String>,
    /// Environment variable holding the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Named credential reference resolved through the credential port
    /// (vault / OS keychain).
    #[serde(default)]
    pub credential: Option<String>,
    /// Header carrying the key (dialect default when unset).
    #[serde(default)]
    pub header: Option<String>,
    /// Prefix prepended to the key inside the header (e.g. `"Bearer "`).
    #[serde(default)]
    pub prefix: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pricing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pricing per million tokens for a specific model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ModelPricing {
    /// Dollars per 1 million input (prompt) tokens.
    pub input_per_1m: f64,
    /// Dollars per 1 million output (completion) tokens.
    pub output_per_1m: f64,
}

impl ModelPricing {
    /// Estimated cost in USD for the given token counts.
    pub fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 * self.input_per_1m + output_tokens as f64 * self.output_per_1m)
            / 1_000_000.0
    }
}

impl ProvidersConfig {
    /// Pricing for a model, falling back to the configured default.
    pub fn pricing_for(&self, model: Option<&str>) -> ModelPricing {
        model
            .and_then(|m| self.pricing.get(m).copied())
            .unwrap_or(self.fallback_pricing)
    }
}
