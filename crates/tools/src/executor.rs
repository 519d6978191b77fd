//! The tool executor: resolution, policy gates, deadline-bound execution,
//! output truncation, and journaling.
//!
//! Gates run in a fixed order and the first failure short-circuits:
//! permission profile → path sandbox → network sandbox → command
//! sanitizer → DLP → rate limit → circuit breaker → approval.  Failures
//! of any kind come back as `tool_result` payloads for the LLM, never as
//! errors.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use fm_domain::config::{SideEffect, ToolsConfig};
use fm_domain::journal::JournalEntry;
use fm_domain::message::ToolCall;
use fm_governance::{ApprovalBroker, ApprovalDecision, BreakerMap, Journal, RateLimiter};

use crate::context::ExecContext;
use crate::dlp::{DlpEngine, DlpOutcome};
use crate::registry::{ToolCatalog, ToolHandler};
use crate::sandbox;
use crate::schema::SchemaCache;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The outcome of one dispatched call, ready to append as a tool_result.
#[derive(Debug, Clone)]
pub struct ExecutedTool {
    pub call_id: String,
    pub tool_name: String,
    pub payload: Value,
    pub is_error: bool,
}

impl ExecutedTool {
    fn failure(call: &ToolCall, kind: &str, detail: impl Into<String>) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            payload: json!({"error": kind, "detail": detail.into()}),
            is_error: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolExecutor {
    catalog: Arc<ToolCatalog>,
    config: ToolsConfig,
    schemas: SchemaCache,
    dlp: DlpEngine,
    limiter: Arc<RateLimiter>,
    breakers: Arc<BreakerMap>,
    journal: Journal,
    approvals: Arc<ApprovalBroker>,
}

impl ToolExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<ToolCatalog>,
        config: ToolsConfig,
        dlp: DlpEngine,
        limiter: Arc<RateLimiter>,
        breakers: Arc<BreakerMap>,
        journal: Journal,
        approvals: Arc<ApprovalBroker>,
    ) -> Self {
        Self {
            catalog,
            config,
            schemas: SchemaCache::new(),
            dlp,
            limiter,
            breakers,
            journal,
            approvals,
        }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Whether this call will hit the approval gate: the tool's risk is
    /// at or above the profile's threshold, or it declares a side effect
    /// the profile always gates.  The loop uses this to suspend the
    /// session before dispatch.
    pub fn approval_required(&self, agent_id: &str, tool_name: &str) -> bool {
        let Some(handler) = self.catalog.resolve(agent_id, tool_name) else {
            return false;
        };
        let profile = self.config.profile_for(agent_id);
        handler.risk_level() >= profile.approval_threshold
            || handler
                .side_effects()
                .iter()
                .any(|se| profile.requires_approval.contains(se))
    }

    /// Whether the handler mutates (serialization constraint in the loop).
    pub fn mutates(&self, agent_id: &str, tool_name: &str) -> bool {
        self.catalog
            .resolve(agent_id, tool_name)
            .map(|h| h.mutates())
            .unwrap_or(false)
    }

    /// Dispatch one tool call through the full gate sequence.
    pub async fn execute(&self, call: &ToolCall, ctx: &ExecContext) -> ExecutedTool {
        // 1. Resolution.
        let Some(handler) = self.catalog.resolve(&ctx.agent_id, &call.tool_name) else {
            return ExecutedTool::failure(
                call,
                "not_found",
                format!("unknown tool: {}", call.tool_name),
            );
        };

        // 2. Schema validation.
        let definition = handler.definition();
        if let Err(detail) =
            self.schemas
                .validate(&call.tool_name, &definition.parameters, &call.arguments)
        {
            return ExecutedTool::failure(call, "schema_invalid", detail);
        }

        let mut arguments = call.arguments.clone();
        let side_effects = handler.side_effects();

        // 3. Permission profile.
        let profile = self.config.profile_for(&ctx.agent_id);
        if handler.risk_level() > profile.max_risk_level {
            return ExecutedTool::failure(
                call,
                "policy_denied",
                format!(
                    "tool risk {} exceeds profile maximum {}",
                    handler.risk_level(),
                    profile.max_risk_level
                ),
            );
        }
        if let Some(blocked) = side_effects
            .iter()
            .find(|se| profile.blocked_side_effects.contains(se))
        {
            return ExecutedTool::failure(
                call,
                "policy_denied",
                format!("side effect {blocked:?} is blocked by the profile"),
            );
        }

        // 4. Path sandbox.
        if side_effects.contains(&SideEffect::FsRead)
            || side_effects.contains(&SideEffect::FsWrite)
        {
            for path in path_arguments(&arguments) {
                if let Err(detail) =
                    sandbox::validate_path(&ctx.workspace_root, &ctx.sandbox, &path)
                {
                    return ExecutedTool::failure(call, "policy_denied", detail);
                }
            }
        }

        // 5. Network sandbox.
        for url in url_arguments(&arguments) {
            if let Err(detail) = sandbox::validate_url(&ctx.sandbox, &url) {
                return ExecutedTool::failure(call, "policy_denied", detail);
            }
        }

        // 6. Command sanitizer.
        if side_effects.contains(&SideEffect::Process) {
            if let Some(command) = arguments.get("command").and_then(|v| v.as_str()) {
                if let Err(detail) = sandbox::validate_command(&ctx.sandbox, command) {
                    return ExecutedTool::failure(call, "policy_denied", detail);
                }
            }
        }

        // 7. DLP scan (string leaves; redaction rewrites in place).
        match scan_arguments(&self.dlp, &ctx.agent_id, &mut arguments) {
            DlpOutcome::Blocked { rule } => {
                return ExecutedTool::failure(
                    call,
                    "dlp_blocked",
                    format!("blocked by DLP rule '{rule}'"),
                );
            }
            DlpOutcome::Redacted { .. } | DlpOutcome::Allow => {}
        }

        // 8. Rate limit.
        if let Err(limited) = self
            .limiter
            .try_acquire(&ctx.agent_id, Some(&call.tool_name))
        {
            let mut result = ExecutedTool::failure(call, "rate_limited", "rate limit exhausted");
            result.payload["retry_after_ms"] = json!(limited.retry_after_ms);
            return result;
        }

        // 9. Circuit breaker.
        if let Err(open) = self.breakers.check(&ctx.agent_id, &call.tool_name) {
            let mut result =
                ExecutedTool::failure(call, "circuit_open", "circuit breaker is open");
            result.payload["retry_after_ms"] = json!(open.retry_after_ms);
            return result;
        }

        // 10. Approval gate.
        if self.approval_required(&ctx.agent_id, &call.tool_name) {
            let (request_id, rx) = self.approvals.submit(&ctx.session_id, call.clone());
            match self.approvals.await_decision(&request_id, rx).await {
                ApprovalDecision::Approved => {}
                ApprovalDecision::Rejected { reason } => {
                    return ExecutedTool::failure(
                        call,
                        "approval_rejected",
                        reason.unwrap_or_else(|| "rejected".into()),
                    );
                }
            }
        }

        // 11. Execution under deadline.
        let deadline = self
            .config
            .deadline_for(&call.tool_name)
            .map(Duration::from_secs)
            .or_else(|| handler.deadline())
            .unwrap_or(Duration::from_secs(self.config.default_deadline_secs));

        let before = handler.snapshot(&arguments, ctx).await;

        let started = tokio::time::Instant::now();
        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => Err("cancelled".to_string()),
            result = tokio::time::timeout(deadline, handler.execute(arguments.clone(), ctx)) => {
                match result {
                    Ok(output) => output,
                    Err(_) => Err(format!("deadline of {}s exceeded", deadline.as_secs())),
                }
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = match output {
            Ok(payload) => {
                self.breakers.record_success(&ctx.agent_id, &call.tool_name);
                ExecutedTool {
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    payload: truncate_payload(payload, self.config.max_output_bytes),
                    is_error: false,
                }
            }
            Err(detail) => {
                self.breakers.record_failure(&ctx.agent_id, &call.tool_name);
                let kind = if detail.starts_with("deadline of") {
                    "timeout"
                } else {
                    "handler_failed"
                };
                ExecutedTool::failure(call, kind, detail)
            }
        };

        tracing::debug!(
            tool = %call.tool_name,
            agent = %ctx.agent_id,
            elapsed_ms,
            is_error = result.is_error,
            "tool call finished"
        );

        // 12. Journal every completed call.
        let mut entry = JournalEntry::invocation(&ctx.session_id, &ctx.agent_id, &call.tool_name);
        entry.before = before;
        entry.after = Some(result.payload.clone());
        entry.reversible = handler.reversible() && !result.is_error;
        if let Err(e) = self.journal.record(entry).await {
            tracing::warn!(error = %e, "journal write failed");
        }

        result
    }

    /// Run a journal rollback through the owning handler's inverse.
    pub async fn rollback(
        &self,
        entry_id: &uuid::Uuid,
        actor: &str,
        ctx: &ExecContext,
    ) -> fm_domain::error::Result<fm_governance::RollbackOutcome> {
        let catalog = self.catalog.clone();
        let agent_id = ctx.agent_id.clone();
        self.journal
            .rollback(entry_id, actor, |entry| async move {
                match catalog.resolve(&agent_id, &entry.tool_name) {
                    Some(handler) => handler.undo(&entry, ctx).await,
                    None => Err(format!("unknown tool: {}", entry.tool_name)),
                }
            })
            .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Argument scanning helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const PATH_KEYS: &[&str] = &["path", "source", "destination", "file", "dir"];

/// String values under path-like keys, top level only.
fn path_arguments(arguments: &Value) -> Vec<String> {
    let mut paths = Vec::new();
    if let Some(obj) = arguments.as_object() {
        for key in PATH_KEYS {
            if let Some(v) = obj.get(*key).and_then(|v| v.as_str()) {
                paths.push(v.to_owned());
            }
        }
    }
    paths
}

/// Any http(s) URL string anywhere in the argument tree.
fn url_arguments(arguments: &Value) -> Vec<String> {
    let mut urls = Vec::new();
    collect_urls(arguments, &mut urls);
    urls
}

fn collect_urls(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if s.starts_with("http://") || s.starts_with("https://") {
                out.push(s.clone());
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_urls(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_urls(v, out)),
        _ => {}
    }
}

/// Scan every string leaf; redactions rewrite the argument tree in place.
fn scan_arguments(dlp: &DlpEngine, agent_id: &str, arguments: &mut Value) -> DlpOutcome {
    let mut any_redacted = false;
    let outcome = scan_value(dlp, agent_id, arguments, &mut any_redacted);
    match outcome {
        Some(blocked) => blocked,
        None if any_redacted => DlpOutcome::Redacted {
            rewritten: arguments.to_string(),
        },
        None => DlpOutcome::Allow,
    }
}

fn scan_value(
    dlp: &DlpEngine,
    agent_id: &str,
    value: &mut Value,
    any_redacted: &mut bool,
) -> Option<DlpOutcome> {
    match value {
        Value::String(s) => match dlp.scan(agent_id, s) {
            DlpOutcome::Blocked { rule } => return Some(DlpOutcome::Blocked { rule }),
            DlpOutcome::Redacted { rewritten } => {
                *s = rewritten;
                *any_redacted = true;
            }
            DlpOutcome::Allow => {}
        },
        Value::Array(items) => {
            for item in items {
                if let Some(blocked) = scan_value(dlp, agent_id, item, any_redacted) {
                    return Some(blocked);
                }
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                if let Some(blocked) = scan_value(dlp, agent_id, item, any_redacted) {
                    return Some(blocked);
                }
            }
        }
        _ => {}
    }
    None
}

/// Cap a payload's serialized size, marking the cut.
fn truncate_payload(payload: Value, max_bytes: usize) -> Value {
    let serialized = payload.to_string();
    if serialized.len() <= max_bytes {
        return payload;
    }
    let mut cut = max_bytes;
    while cut > 0 && !serialized.is_char_boundary(cut) {
        cut -= 1;
    }
    json!({
        "truncated": true,
        "original_bytes": serialized.len(),
        "content": &serialized[..cut],
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
