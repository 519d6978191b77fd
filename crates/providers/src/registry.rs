//! Provider registry — built-in definitions plus user extensions.
//!
//! Data-driven: adding a provider is adding a [`ProviderDefinition`] to
//! config, never adding code.  One resolution function implements the
//! fallback rule: an unknown id with a supplied base URL defaults to the
//! openai-compatible dialect.

use std::collections::HashMap;

use parking_lot::RwLock;

use fm_domain::config::{ApiKind, AuthConfig, ProviderDefinition};
use fm_domain::error::{Error, Result};

/// Registry of known provider definitions.
pub struct ProviderRegistry {
    defs: RwLock<HashMap<String, ProviderDefinition>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Create a registry seeded with the four built-in dialects.
    pub fn new() -> Self {
        let mut defs = HashMap::new();
        for def in builtin_definitions() {
            defs.insert(def.id.clone(), def);
        }
        Self {
            defs: RwLock::new(defs),
        }
    }

    /// Merge user-defined definitions over the built-ins (same id wins).
    pub fn extend(&self, definitions: impl IntoIterator<Item = ProviderDefinition>) {
        let mut defs = self.defs.write();
        for def in definitions {
            defs.insert(def.id.clone(), def);
        }
    }

    /// Resolve a provider id to its definition.
    ///
    /// Unknown ids with a supplied `base_url` default to the
    /// openai-compatible dialect; unknown ids without one are an error.
    pub fn resolve(&self, id: &str, base_url: Option<&str>) -> Result<ProviderDefinition> {
        if let Some(def) = self.defs.read().get(id) {
            return Ok(def.clone());
        }
        if let Some(base_url) = base_url {
            tracing::debug!(provider = %id, "unknown provider id; defaulting to openai-compatible");
            return Ok(ProviderDefinition {
                id: id.to_string(),
                display_name: None,
                api_type: ApiKind::OpenaiCompat,
                base_url: base_url.to_string(),
                auth: AuthConfig::default(),
                default_model: None,
            });
        }
        Err(Error::Config(format!(
            "unknown provider '{id}' and no base_url supplied"
        )))
    }

    /// All currently registered definitions, sorted by id.
    pub fn list(&self) -> Vec<ProviderDefinition> {
        let mut defs: Vec<_> = self.defs.read().values().cloned().collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }
}

fn builtin_definitions() -> Vec<ProviderDefinition> {
    vec![
        ProviderDefinition {
            id: "anthropic".into(),
            display_name: Some("Anthropic".into()),
            api_type: ApiKind::Anthropic,
            base_url: "https://api.anthropic.com".into(),
            auth: AuthConfig {
                env: Some("ANTHROPIC_API_KEY".into()),
                ..Default::default()
            },
            default_model: Some("claude-sonnet-4-20250514".into()),
        },
        ProviderDefinition {
            id: "openai".into(),
            display_name: Some("OpenAI".into()),
            api_type: ApiKind::OpenaiCompat,
            base_url: "https://api.openai.com/v1".into(),
            auth: AuthConfig {
                env: Some("OPENAI_API_KEY".into()),
                ..Default::default()
            },
            default_model: Some("gpt-4o".into()),
        },
        ProviderDefinition {
            id: "google".into(),
            display_name: Some("Google Gemini".into()),
            api_type: ApiKind::Google,
            base_url: "https://generativelanguage.googleapis.com".into(),
            auth: AuthConfig {
                env: Some("GEMINI_API_KEY".into()),
                ..Default::default()
            },
            default_model: Some("gemini-2.0-flash".into()),
        },
        ProviderDefinition {
            id: "ollama".into(),
            display_name: Some("Ollama".into()),
            api_type: ApiKind::Ollama,
            base_url: "http://localhost:11434".into(),
            auth: AuthConfig::default(),
            default_model: Some("llama3.2".into()),
        },
    ]
}
