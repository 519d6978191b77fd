//! The Reasoning Loop — one session's step-by-step advance.
//!
//! Per step: governance preflight → assemble context → call the LLM
//! Gateway → persist the assistant delta → dispatch tools → persist
//! results → next step.  Step N's persistence completes before step N+1
//! begins; the step counter only advances once a step is fully persisted,
//! so an interrupted step is replayed on resume.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Timelike;
use futures_util::future::join_all;

use fm_domain::cancel::CancelToken;
use fm_domain::config::{GuardrailAction, RuntimeConfig};
use fm_domain::credentials::CredentialResolver;
use fm_domain::error::{Error, Result};
use fm_domain::message::{ContentBlock, Message, ToolCall};
use fm_domain::session::{Session, SessionState};
use fm_domain::stream::{StopReason, StreamEvent, Usage};
use fm_governance::{BreakerMap, BudgetLedger, BudgetVerdict, GuardrailEngine, RateLimiter, StepSnapshot};
use fm_providers::{ChatRequest, LlmGateway, RetryPolicy};
use fm_sessions::{MessageDelta, SessionStore};
use fm_tools::{ExecContext, ExecutedTool, ToolExecutor};

use crate::context;
use crate::events::EventHub;

/// Breaker key for LLM transport failures (cannot collide with tool
/// names, which never start with '@').
const LLM_CIRCUIT: &str = "@llm";

/// Attempts for persistence operations before the session fails.
const PERSIST_ATTEMPTS: u32 = 3;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime dependencies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the loop composes: the ports, the gateway, the executor,
/// and the governance layer.  Shared by all sessions.
pub struct Runtime {
    pub store: Arc<dyn SessionStore>,
    pub gateway: Arc<LlmGateway>,
    pub executor: Arc<ToolExecutor>,
    pub budget: Arc<BudgetLedger>,
    pub limiter: Arc<RateLimiter>,
    pub breakers: Arc<BreakerMap>,
    pub guardrails: Arc<GuardrailEngine>,
    pub hub: Arc<EventHub>,
    pub credentials: Arc<dyn CredentialResolver>,
    pub config: RuntimeConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loop entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Advance one session until a terminal stop condition (or pause).
///
/// Returns `Err` only for failures the loop cannot translate into a
/// session state itself (persistence loss); the Supervisor turns those
/// into `failed` + a terminal frame.
pub(crate) async fn drive_session(
    rt: Arc<Runtime>,
    session_id: String,
    cancel: CancelToken,
    pause: Arc<AtomicBool>,
) -> Result<()> {
    let Some(mut session) = rt.store.load_session(&session_id).await? else {
        return Err(Error::Persistence(format!("session '{session_id}' not found")));
    };

    // Precondition: only these states may (re-)enter the loop.
    if !matches!(
        session.state,
        SessionState::Pending | SessionState::Running | SessionState::AwaitingTool
    ) {
        tracing::debug!(session_id = %session_id, state = ?session.state, "session not runnable; skipping");
        return Ok(());
    }

    tracing::info!(
        session_id = %session_id,
        agent_id = %session.agent_id,
        step = session.step,
        "reasoning loop starting"
    );

    loop {
        // ── Suspension-point checks ─────────────────────────────────
        if cancel.is_cancelled() {
            finish(&rt, &mut session, SessionState::Cancelled, StopReason::Cancelled, None).await?;
            return Ok(());
        }
        if pause.load(Ordering::Acquire) {
            finish(
                &rt,
                &mut session,
                SessionState::Paused,
                StopReason::Paused,
                Some("pause requested".into()),
            )
            .await?;
            return Ok(());
        }
        if session.step >= session.config.max_steps {
            let ceiling_msg = format!("step ceiling of {} reached", session.config.max_steps);
            finish(
                &rt,
                &mut session,
                SessionState::Failed,
                StopReason::Error,
                Some(ceiling_msg),
            )
            .await?;
            return Ok(());
        }

        // ── Load history; detect an interrupted step to replay ──────
        let deltas = rt.store.load_messages(&session.session_id, 0).await?;
        let messages = context::assemble(&deltas, session.config.context_token_ceiling);
        let mut pending_calls = unresolved_calls(&messages);
        let replaying = !pending_calls.is_empty();

        if !replaying {
            // ── Governance preflight ────────────────────────────────
            let tool_defs = rt.executor.catalog().definitions_for(
                &session.agent_id,
                session.config.tool_allowlist.as_deref(),
            );
            let estimated_input =
                fm_providers::estimate::estimate_request(&messages, &tool_defs);
            let pricing = rt
                .config
                .providers
                .pricing_for(session.config.model.as_deref());
            let worst_case_usd =
                pricing.estimate_cost(estimated_input, session.config.max_output_tokens);

            match rt.budget.preflight(&session.agent_id, worst_case_usd).await? {
                BudgetVerdict::Ok => {}
                BudgetVerdict::Exhausted { spent_usd, cap_usd } => {
                    tracing::warn!(
                        session_id = %session.session_id,
                        spent_usd,
                        cap_usd,
                        "budget exhausted; pausing session"
                    );
                    finish(
                        &rt,
                        &mut session,
                        SessionState::Paused,
                        StopReason::Paused,
                        Some("budget_exhausted".into()),
                    )
                    .await?;
                    return Ok(());
                }
            }

            // Per-agent global rate limit: wait, cancellably.
            while let Err(limited) = rt.limiter.try_acquire(&session.agent_id, None) {
                tracing::debug!(
                    session_id = %session.session_id,
                    retry_after_ms = limited.retry_after_ms,
                    "rate limited; waiting"
                );
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(limited.retry_after_ms.max(50))) => {}
                    _ = cancel.cancelled() => {
                        finish(&rt, &mut session, SessionState::Cancelled, StopReason::Cancelled, None).await?;
                        return Ok(());
                    }
                }
            }

            // LLM transport breaker.
            if rt.breakers.check(&session.agent_id, LLM_CIRCUIT).is_err() {
                finish(
                    &rt,
                    &mut session,
                    SessionState::Paused,
                    StopReason::Paused,
                    Some("llm_circuit_open".into()),
                )
                .await?;
                return Ok(());
            }

            // ── Call the LLM ────────────────────────────────────────
            session.state = SessionState::Running;
            persist_session(&rt, &session).await?;

            let req = ChatRequest {
                messages,
                tools: tool_defs,
                temperature: session.config.temperature,
                max_output_tokens: Some(session.config.max_output_tokens),
                reasoning: session.config.reasoning,
                model: session.config.model.clone(),
            };
            let policy = RetryPolicy::from(&session.config.retry);
            let sid = session.session_id.clone();
            let hub = rt.hub.clone();

            let outcome = rt
                .gateway
                .stream_step(&session.config.provider_id, &req, &policy, &cancel, move |e| {
                    hub.publish(&sid, &e)
                })
                .await;

            let outcome = match outcome {
                Ok(outcome) => {
                    rt.breakers.record_success(&session.agent_id, LLM_CIRCUIT);
                    outcome
                }
                Err(Error::Cancelled) => {
                    finish(&rt, &mut session, SessionState::Cancelled, StopReason::Cancelled, None)
                        .await?;
                    return Ok(());
                }
                Err(e) => {
                    rt.breakers.record_failure(&session.agent_id, LLM_CIRCUIT);
                    tracing::warn!(
                        session_id = %session.session_id,
                        error = %e,
                        "LLM step failed after retries"
                    );
                    finish(
                        &rt,
                        &mut session,
                        SessionState::Failed,
                        StopReason::Error,
                        Some(e.to_string()),
                    )
                    .await?;
                    return Ok(());
                }
            };

            // ── Post-LLM bookkeeping ────────────────────────────────
            let step_cost =
                pricing.estimate_cost(outcome.usage.input_tokens, outcome.usage.output_tokens);
            rt.budget.record(&session.agent_id, step_cost).await?;
            session.input_tokens += outcome.usage.input_tokens as u64;
            session.output_tokens += outcome.usage.output_tokens as u64;
            session.cost_usd += step_cost;

            let assistant =
                Message::assistant_step(&outcome.text, &outcome.reasoning, &outcome.tool_calls);
            append_with_retry(
                &rt,
                &session.session_id,
                &MessageDelta {
                    step: session.step,
                    message: assistant,
                },
            )
            .await?;

            // ── Guardrails at the step boundary ─────────────────────
            let hour = chrono::Local::now().hour() as u8;
            let triggered = rt.guardrails.evaluate(
                &session.agent_id,
                &StepSnapshot {
                    output_text: &outcome.text,
                    step_cost_usd: step_cost,
                    local_hour: hour,
                },
            );
            for hit in &triggered {
                match hit.action {
                    GuardrailAction::Log | GuardrailAction::Alert => {
                        // The engine already traced the violation.
                    }
                    GuardrailAction::PauseSession => {
                        session.step += 1;
                        finish(
                            &rt,
                            &mut session,
                            SessionState::Paused,
                            StopReason::Paused,
                            Some(format!("guardrail:{}", hit.rule)),
                        )
                        .await?;
                        return Ok(());
                    }
                    GuardrailAction::StopAgent => {
                        session.step += 1;
                        finish(
                            &rt,
                            &mut session,
                            SessionState::Failed,
                            StopReason::Error,
                            Some(format!("guardrail:{}", hit.rule)),
                        )
                        .await?;
                        return Ok(());
                    }
                }
            }

            // ── Branch on stop reason ───────────────────────────────
            match outcome.stop_reason {
                StopReason::EndTurn | StopReason::StopSequence => {
                    session.step += 1;
                    session.heartbeat();
                    session.finish(SessionState::Completed, None);
                    persist_session(&rt, &session).await?;
                    // The provider's step_end is the closing frame.
                    rt.hub.close(&session.session_id);
                    tracing::info!(session_id = %session.session_id, "session completed");
                    return Ok(());
                }
                StopReason::MaxTokens => {
                    session.step += 1;
                    session.heartbeat();
                    session.finish(SessionState::Failed, Some("max_tokens".into()));
                    persist_session(&rt, &session).await?;
                    rt.hub.close(&session.session_id);
                    return Ok(());
                }
                StopReason::ToolUse => {
                    pending_calls = outcome.tool_calls;
                }
                StopReason::Cancelled | StopReason::Paused | StopReason::Error => {
                    // Runtime-produced reasons never come from a provider.
                    finish(
                        &rt,
                        &mut session,
                        SessionState::Failed,
                        StopReason::Error,
                        Some(format!("unexpected stop reason {:?}", outcome.stop_reason)),
                    )
                    .await?;
                    return Ok(());
                }
            }
        } else {
            tracing::info!(
                session_id = %session.session_id,
                calls = pending_calls.len(),
                "replaying interrupted tool dispatch"
            );
        }

        // ── Tool dispatch ───────────────────────────────────────────
        session.state = SessionState::AwaitingTool;
        persist_session(&rt, &session).await?;

        let results =
            dispatch_tools(&rt, &mut session, &pending_calls, &cancel).await?;

        if cancel.is_cancelled() {
            finish(&rt, &mut session, SessionState::Cancelled, StopReason::Cancelled, None).await?;
            return Ok(());
        }

        for result in results {
            rt.hub.publish(
                &session.session_id,
                &StreamEvent::ToolResult {
                    call_id: result.call_id.clone(),
                    ok: !result.is_error,
                    payload: result.payload.clone(),
                },
            );
            append_with_retry(
                &rt,
                &session.session_id,
                &MessageDelta {
                    step: session.step,
                    message: Message::tool_result(
                        result.call_id,
                        result.payload,
                        result.is_error,
                    ),
                },
            )
            .await?;
        }

        // Step fully persisted: advance the counter and heartbeat.
        session.step += 1;
        session.heartbeat();
        persist_session(&rt, &session).await?;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Dispatch one step's tool calls.
///
/// Non-mutating, non-gated calls run concurrently; mutating calls
/// serialize with each other; approval-gated calls run last, each
/// suspending the session to `awaiting_approval` until resolved.
async fn dispatch_tools(
    rt: &Arc<Runtime>,
    session: &mut Session,
    calls: &[ToolCall],
    cancel: &CancelToken,
) -> Result<Vec<ExecutedTool>> {
    let ctx = ExecContext {
        agent_id: session.agent_id.clone(),
        org_id: session.org_id.clone(),
        session_id: session.session_id.clone(),
        credentials: rt.credentials.clone(),
        cancel: cancel.clone(),
        sandbox: rt.config.sandbox.clone(),
        workspace_root: rt.config.sandbox.workspace_root.clone(),
    };

    let mut parallel: Vec<&ToolCall> = Vec::new();
    let mut serial: Vec<&ToolCall> = Vec::new();
    let mut gated: Vec<&ToolCall> = Vec::new();

    for call in calls {
        rt.hub.publish(
            &session.session_id,
            &StreamEvent::ToolCallStart {
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
            },
        );
        if rt
            .executor
            .approval_required(&session.agent_id, &call.tool_name)
        {
            gated.push(call);
        } else if rt.executor.mutates(&session.agent_id, &call.tool_name) {
            serial.push(call);
        } else {
            parallel.push(call);
        }
    }

    let mut results: Vec<ExecutedTool> = Vec::new();

    // Independent calls run concurrently; join_all preserves order.
    let futures: Vec<_> = parallel
        .iter()
        .map(|call| rt.executor.execute(call, &ctx))
        .collect();
    results.extend(join_all(futures).await);

    // Mutating calls are totally ordered within the session.
    for call in serial {
        if cancel.is_cancelled() {
            return Ok(results);
        }
        results.push(rt.executor.execute(call, &ctx).await);
    }

    // Approval-gated calls suspend the session, one at a time.
    for call in gated {
        if cancel.is_cancelled() {
            return Ok(results);
        }
        session.state = SessionState::AwaitingApproval;
        persist_session(rt, session).await?;

        let result = rt.executor.execute(call, &ctx).await;

        session.state = SessionState::AwaitingTool;
        persist_session(rt, session).await?;
        results.push(result);
    }

    Ok(results)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tool invocations in the history that still lack a result — either the
/// normal in-step dispatch set or an interrupted step found on resume.
fn unresolved_calls(messages: &[Message]) -> Vec<ToolCall> {
    let unresolved = fm_domain::message::unresolved_invocations(messages);
    let mut calls = Vec::new();
    for msg in messages {
        for block in msg.content.blocks() {
            if let ContentBlock::ToolInvocation {
                id,
                name,
                arguments,
            } = block
            {
                if unresolved.contains(id) {
                    calls.push(ToolCall {
                        call_id: id.clone(),
                        tool_name: name.clone(),
                        arguments: arguments.clone(),
                    });
                }
            }
        }
    }
    calls
}

/// Transition into a terminal/paused state, persist it, and emit the
/// closing `step_end` frame.
async fn finish(
    rt: &Arc<Runtime>,
    session: &mut Session,
    state: SessionState,
    stop_reason: StopReason,
    detail: Option<String>,
) -> Result<()> {
    session.heartbeat();
    session.finish(state, detail.clone());
    persist_session(rt, session).await?;

    rt.hub.publish(
        &session.session_id,
        &StreamEvent::StepEnd {
            stop_reason,
            usage: Usage {
                input_tokens: session.input_tokens.min(u32::MAX as u64) as u32,
                output_tokens: session.output_tokens.min(u32::MAX as u64) as u32,
            },
            error: detail,
        },
    );
    rt.hub.close(&session.session_id);

    tracing::info!(
        session_id = %session.session_id,
        state = ?session.state,
        "session left the loop"
    );
    Ok(())
}

async fn persist_session(rt: &Arc<Runtime>, session: &Session) -> Result<()> {
    with_persist_retry(|| rt.store.save_session(session)).await
}

async fn append_with_retry(
    rt: &Arc<Runtime>,
    session_id: &str,
    delta: &MessageDelta,
) -> Result<()> {
    with_persist_retry(|| rt.store.append_message(session_id, delta)).await
}

/// Bounded retry for persistence writes; exhausting it surfaces as a
/// session failure in the Supervisor.
async fn with_persist_retry<F, Fut>(mut op: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let mut last = None;
    for attempt in 1..=PERSIST_ATTEMPTS {
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "persistence write failed");
                last = Some(e);
                tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
            }
        }
    }
    Err(Error::Persistence(
        last.map(|e| e.to_string())
            .unwrap_or_else(|| "unknown persistence failure".into()),
    ))
}
