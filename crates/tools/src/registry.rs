//! Tool handlers and the layered catalog.
//!
//! An agent's effective catalog is built-in tools ∪ enabled skill-adapter
//! bundles ∪ per-agent overrides, narrowed by the session's allow-list at
//! request-assembly time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fm_domain::config::SideEffect;
use fm_domain::journal::JournalEntry;
use fm_domain::message::ToolDefinition;

use crate::context::ExecContext;

/// Handler-level output: a JSON payload or an error string the executor
/// wraps into the failure taxonomy.
pub type ToolOutput = std::result::Result<serde_json::Value, String>;

/// One named callable exposed to the LLM.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Name, description, and argument JSON schema.
    fn definition(&self) -> ToolDefinition;

    /// Risk level 0-3; profiles cap the maximum and set the approval bar.
    fn risk_level(&self) -> u8 {
        0
    }

    fn side_effects(&self) -> &[SideEffect] {
        &[]
    }

    /// Mutating handlers serialize with each other within a session.
    fn mutates(&self) -> bool {
        false
    }

    /// Per-tool deadline override (executor default otherwise).
    fn deadline(&self) -> Option<Duration> {
        None
    }

    fn reversible(&self) -> bool {
        false
    }

    /// Pre-execution snapshot for the journal (reversible tools).
    async fn snapshot(&self, _arguments: &serde_json::Value, _ctx: &ExecContext) -> Option<serde_json::Value> {
        None
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: &ExecContext) -> ToolOutput;

    /// Inverse operation for rollback.  Only called when `reversible()`.
    async fn undo(
        &self,
        _entry: &JournalEntry,
        _ctx: &ExecContext,
    ) -> std::result::Result<(), String> {
        Err("tool declares no inverse".into())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Layered tool catalog.  Resolution order (most specific wins):
/// per-agent override → skill adapter → built-in.
#[derive(Default)]
pub struct ToolCatalog {
    builtin: HashMap<String, Arc<dyn ToolHandler>>,
    /// Skill-adapter bundles: bundle name → tools.
    adapters: HashMap<String, HashMap<String, Arc<dyn ToolHandler>>>,
    /// Per-agent overrides: agent id → tools.
    overrides: HashMap<String, HashMap<String, Arc<dyn ToolHandler>>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_builtin(&mut self, handler: Arc<dyn ToolHandler>) {
        self.builtin.insert(handler.definition().name, handler);
    }

    /// Register a skill adapter: a bundle of related tools for one
    /// external system behind the uniform handler interface.
    pub fn register_adapter(&mut self, bundle: &str, handlers: Vec<Arc<dyn ToolHandler>>) {
        let entry = self.adapters.entry(bundle.to_owned()).or_default();
        for handler in handlers {
            entry.insert(handler.definition().name, handler);
        }
    }

    pub fn register_override(&mut self, agent_id: &str, handler: Arc<dyn ToolHandler>) {
        self.overrides
            .entry(agent_id.to_owned())
            .or_default()
            .insert(handler.definition().name, handler);
    }

    /// Resolve a tool for an agent.
    pub fn resolve(&self, agent_id: &str, name: &str) -> Option<Arc<dyn ToolHandler>> {
        if let Some(handler) = self
            .overrides
            .get(agent_id)
            .and_then(|tools| tools.get(name))
        {
            return Some(handler.clone());
        }
        for tools in self.adapters.values() {
            if let Some(handler) = tools.get(name) {
                return Some(handler.clone());
            }
        }
        self.builtin.get(name).cloned()
    }

    /// Tool declarations visible to a session, filtered by its allow-list.
    pub fn definitions_for(
        &self,
        agent_id: &str,
        allowlist: Option<&[String]>,
    ) -> Vec<ToolDefinition> {
        let mut defs: HashMap<String, ToolDefinition> = HashMap::new();
        for handler in self.builtin.values() {
            let def = handler.definition();
            defs.insert(def.name.clone(), def);
        }
        for tools in self.adapters.values() {
            for handler in tools.values() {
                let def = handler.definition();
                defs.insert(def.name.clone(), def);
            }
        }
        if let Some(tools) = self.overrides.get(agent_id) {
            for handler in tools.values() {
                let def = handler.definition();
                defs.insert(def.name.clone(), def);
            }
        }

        let mut defs: Vec<ToolDefinition> = defs
            .into_values()
            .filter(|def| {
                allowlist
                    .map(|allowed| allowed.iter().any(|a| a == &def.name))
                    .unwrap_or(true)
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::EchoTool;

    struct NamedTool(&'static str, &'static str);

    #[async_trait::async_trait]
    impl ToolHandler for NamedTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.0.into(),
                description: self.1.into(),
                parameters: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(&self, _args: serde_json::Value, _ctx: &ExecContext) -> ToolOutput {
            Ok(serde_json::json!(self.1))
        }
    }

    #[test]
    fn resolution_order_override_adapter_builtin() {
        let mut catalog = ToolCatalog::new();
        catalog.register_builtin(Arc::new(NamedTool("echo", "builtin")));
        catalog.register_adapter("slack", vec![Arc::new(NamedTool("echo", "adapter"))]);
        catalog.register_override("a1", Arc::new(NamedTool("echo", "override")));

        let resolved = catalog.resolve("a1", "echo").unwrap();
        assert_eq!(resolved.definition().description, "override");

        let resolved = catalog.resolve("other", "echo").unwrap();
        assert_eq!(resolved.definition().description, "adapter");
    }

    #[test]
    fn unknown_tool_is_none() {
        let catalog = ToolCatalog::new();
        assert!(catalog.resolve("a1", "ghost").is_none());
    }

    #[test]
    fn definitions_respect_allowlist() {
        let mut catalog = ToolCatalog::new();
        catalog.register_builtin(Arc::new(EchoTool));
        catalog.register_builtin(Arc::new(NamedTool("other", "x")));

        let all = catalog.definitions_for("a1", None);
        assert_eq!(all.len(), 2);

        let filtered = catalog.definitions_for("a1", Some(&["echo".to_string()]));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "echo");
    }
}
