//! Tool-argument validation against each handler's declared JSON schema.
//!
//! Validators are compiled once per tool and cached; a schema that fails
//! to compile rejects every call to that tool rather than panicking.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Cache of compiled validators keyed by tool name.
#[derive(Default)]
pub struct SchemaCache {
    validators: Mutex<HashMap<String, Option<jsonschema::Validator>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `arguments` against `schema`.  Returns the first
    /// validation error as a string.
    pub fn validate(
        &self,
        tool: &str,
        schema: &serde_json::Value,
        arguments: &serde_json::Value,
    ) -> std::result::Result<(), String> {
        let mut validators = self.validators.lock();
        let compiled = validators.entry(tool.to_owned()).or_insert_with(|| {
            match jsonschema::validator_for(schema) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(tool, error = %e, "tool schema failed to compile");
                    None
                }
            }
        });

        match compiled {
            Some(validator) => validator
                .validate(arguments)
                .map_err(|e| format!("arguments do not match schema: {e}")),
            None => Err("tool schema is invalid".into()),
        }
    }
}
