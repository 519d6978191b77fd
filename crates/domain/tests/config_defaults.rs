//! Verify the whole config tree deserializes from sparse TOML with sane
//! defaults — an empty file must yield a usable runtime configuration.

use fm_domain::config::{
    ApprovalPolicy, CommandMode, GuardrailAction, RuntimeConfig, StaleAction, TimeoutAction,
};

#[test]
fn empty_toml_yields_full_defaults() {
    let cfg = RuntimeConfig::from_toml("").unwrap();

    assert_eq!(cfg.retry.base_delay_ms, 1_000);
    assert_eq!(cfg.retry.max_delay_ms, 60_000);
    assert_eq!(cfg.retry.window_secs, 3_600);
    assert_eq!(cfg.retry.max_attempts, 200);

    assert_eq!(cfg.limits.breaker.failure_threshold, 5);
    assert_eq!(cfg.limits.breaker.cooldown_secs, 30);

    assert_eq!(cfg.sessions.stale_threshold_secs, 60);
    assert_eq!(cfg.sessions.sweep_interval_secs, 30);
    assert_eq!(cfg.sessions.on_stale, StaleAction::Resume);

    assert_eq!(cfg.tools.default_deadline_secs, 30);
    assert_eq!(cfg.tools.max_output_bytes, 64 * 1024);

    assert_eq!(cfg.approvals.policy, ApprovalPolicy::Any);
    assert_eq!(cfg.approvals.on_timeout, TimeoutAction::Reject);

    assert_eq!(cfg.sandbox.command_mode, CommandMode::Blocklist);
    assert!(cfg.budget.default_cap_usd.is_none());
    assert!(cfg.dlp.rules.is_empty());
    assert!(cfg.guardrails.rules.is_empty());
}

#[test]
fn partial_toml_overrides_one_section() {
    let cfg = RuntimeConfig::from_toml(
        r#"
        [retry]
        max_attempts = 10

        [budget]
        default_cap_usd = 5.0

        [[guardrails.rules]]
        name = "late-shift"
        action = "alert"
        trigger = { kind = "off_duty", start_hour = 8, end_hour = 18 }
    "#,
    )
    .unwrap();

    assert_eq!(cfg.retry.max_attempts, 10);
    // Untouched fields keep their defaults.
    assert_eq!(cfg.retry.base_delay_ms, 1_000);
    assert_eq!(cfg.budget.default_cap_usd, Some(5.0));
    assert_eq!(cfg.guardrails.rules.len(), 1);
    assert_eq!(cfg.guardrails.rules[0].action, GuardrailAction::Alert);
}

#[test]
fn provider_definitions_parse() {
    let cfg = RuntimeConfig::from_toml(
        r#"
        [[providers.definitions]]
        id = "local"
        api_type = "ollama"
        base_url = "http://localhost:11434"

        [providers.pricing."claude-sonnet-4"]
        input_per_1m = 3.0
        output_per_1m = 15.0
    "#,
    )
    .unwrap();

    assert_eq!(cfg.providers.definitions.len(), 1);
    let p = cfg.providers.pricing_for(Some("claude-sonnet-4"));
    assert_eq!(p.output_per_1m, 15.0);
}
