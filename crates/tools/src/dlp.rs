//! Data-loss-prevention scanning over tool arguments and write payloads.
//!
//! Rules are regexes with one of three actions: `block` denies the call,
//! `redact` rewrites matching spans and continues, `alert` records a
//! violation but permits execution.

use regex::Regex;

use fm_domain::config::{DlpAction, DlpConfig};

/// Result of scanning one argument payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DlpOutcome {
    /// Nothing matched, or only alert rules matched.
    Allow,
    /// Redact rules matched; use the rewritten text.
    Redacted { rewritten: String },
    /// A block rule matched.
    Blocked { rule: String },
}

struct CompiledRule {
    name: String,
    regex: Regex,
    action: DlpAction,
    replacement: String,
}

#[derive(Default)]
pub struct DlpEngine {
    rules: Vec<CompiledRule>,
}

impl DlpEngine {
    /// Compile the rule set, skipping invalid patterns with a warning.
    pub fn new(config: &DlpConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .filter_map(|rule| match Regex::new(&rule.pattern) {
                Ok(regex) => Some(CompiledRule {
                    name: rule.name.clone(),
                    regex,
                    action: rule.action,
                    replacement: rule.replacement.clone(),
                }),
                Err(e) => {
                    tracing::warn!(rule = %rule.name, error = %e, "invalid DLP pattern; rule skipped");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    /// Scan text.  Block short-circuits; redactions accumulate; alerts
    /// log a violation and continue.
    pub fn scan(&self, agent_id: &str, text: &str) -> DlpOutcome {
        let mut current = text.to_owned();
        let mut redacted = false;

        for rule in &self.rules {
            if !rule.regex.is_match(&current) {
                continue;
            }
            match rule.action {
                DlpAction::Block => {
                    tracing::warn!(agent_id, rule = %rule.name, "DLP rule blocked tool call");
                    return DlpOutcome::Blocked {
                        rule: rule.name.clone(),
                    };
                }
                DlpAction::Redact => {
                    current = rule
                        .regex
                        .replace_all(&current, rule.replacement.as_str())
                        .into_owned();
                    redacted = true;
                }
                DlpAction::Alert => {
                    tracing::warn!(agent_id, rule = %rule.name, "DLP violation recorded");
                }
            }
        }

        if redacted {
            DlpOutcome::Redacted { rewritten: current }
        } else {
            DlpOutcome::Allow
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fm_domain::config::DlpRule;

    fn engine(rules: Vec<(&str, &str, DlpAction)>) -> DlpEngine {
        DlpEngine::new(&DlpConfig {
            rules: rules
                .into_iter()
                .map(|(name, pattern, action)| DlpRule {
                    name: name.into(),
                    pattern: pattern.into(),
                    action,
                    replacement: "[REDACTED]".into(),
                })
                .collect(),
        })
    }

    #[test]
    fn clean_text_allowed() {
        let e = engine(vec![("ssn", r"\d{3}-\d{2}-\d{4}", DlpAction::Block)]);
        assert_eq!(e.scan("a1", "hello world"), DlpOutcome::Allow);
    }

    #[test]
    fn block_rule_short_circuits() {
        let e = engine(vec![("ssn", r"\d{3}-\d{2}-\d{4}", DlpAction::Block)]);
        assert_eq!(
            e.scan("a1", "ssn is 123-45-6789"),
            DlpOutcome::Blocked { rule: "ssn".into() }
        );
    }

    #[test]
    fn redact_rewrites_all_matches() {
        let e = engine(vec![("card", r"\b\d{16}\b", DlpAction::Redact)]);
        match e.scan("a1", "cards 4111111111111111 and 5500005555555559") {
            DlpOutcome::Redacted { rewritten } => {
                assert_eq!(rewritten, "cards [REDACTED] and [REDACTED]");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn alert_permits_execution() {
        let e = engine(vec![("email", r"\S+@\S+", DlpAction::Alert)]);
        assert_eq!(e.scan("a1", "mail bob@example.com"), DlpOutcome::Allow);
    }

    #[test]
    fn block_wins_over_redact_when_ordered_first() {
        let e = engine(vec![
            ("key", "sk-[a-z0-9]+", DlpAction::Block),
            ("any", "secret", DlpAction::Redact),
        ]);
        assert!(matches!(
            e.scan("a1", "the secret is sk-abc123"),
            DlpOutcome::Blocked { .. }
        ));
    }
}
