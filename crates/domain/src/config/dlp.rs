use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Data-loss-prevention rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DlpConfig {
    #[serde(default)]
    pub rules: Vec<DlpRule>,
}

/// One pattern rule scanned over tool arguments and write payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlpRule {
    pub name: String,
    /// Regex matched against the serialized arguments.
    pub pattern: String,
    pub action: DlpAction,
    /// Replacement text used by `redact` (defaults to `[REDACTED]`).
    #[serde(default = "d_replacement")]
    pub replacement: String,
}

fn d_replacement() -> String {
    "[REDACTED]".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DlpAction {
    /// Deny the call outright.
    Block,
    /// Rewrite the matching spans and continue.
    Redact,
    /// Record a violation but permit execution.
    Alert,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_from_toml() {
        let rule: DlpRule = toml::from_str(
            r#"
            name = "ssn"
            pattern = '\d{3}-\d{2}-\d{4}'
            action = "redact"
        "#,
        )
        .unwrap();
        assert_eq!(rule.action, DlpAction::Redact);
        assert_eq!(rule.replacement, "[REDACTED]");
    }
}
