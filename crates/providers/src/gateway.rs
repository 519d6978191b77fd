//! The LLM Gateway: one entry point for running a step against any
//! provider, with retry and event forwarding.
//!
//! [`LlmGateway::stream_step`] resolves the provider, opens the stream,
//! forwards every event to the caller's sink, and collects the stream
//! into a [`StepOutcome`].  Failed attempts (including mid-stream
//! disconnects) discard their partial state and are retried under the
//! session's policy, so the collected outcome always reflects a single
//! clean attempt.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::RwLock;

use fm_domain::cancel::CancelToken;
use fm_domain::config::ApiKind;
use fm_domain::credentials::CredentialResolver;
use fm_domain::error::{Error, Result};
use fm_domain::message::ToolCall;
use fm_domain::stream::{StopReason, StreamEvent, Usage};

use crate::anthropic::AnthropicProvider;
use crate::estimate;
use crate::google::GoogleProvider;
use crate::ollama::OllamaProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::registry::ProviderRegistry;
use crate::retry::{run_with_retry, RetryPolicy};
use crate::traits::{ChatRequest, LlmProvider};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Step outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The finalization record of one successful LLM call.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub text: String,
    pub reasoning: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared gateway over all configured providers.  Adapters are built
/// lazily from their definitions and cached; the HTTP client inside each
/// adapter is shared across sessions while every request carries its own
/// cancellation signal.
pub struct LlmGateway {
    registry: ProviderRegistry,
    resolver: Arc<dyn CredentialResolver>,
    providers: RwLock<HashMap<String, Arc<dyn LlmProvider>>>,
}

impl LlmGateway {
    pub fn new(registry: ProviderRegistry, resolver: Arc<dyn CredentialResolver>) -> Self {
        Self {
            registry,
            resolver,
            providers: RwLock::new(HashMap::new()),
        }
    }

    /// Build a gateway whose registry carries the user-defined provider
    /// definitions on top of the built-ins.
    pub fn from_config(
        config: &fm_domain::config::ProvidersConfig,
        resolver: Arc<dyn CredentialResolver>,
    ) -> Self {
        let registry = ProviderRegistry::new();
        registry.extend(config.definitions.iter().cloned());
        Self::new(registry, resolver)
    }

    /// Register a pre-built provider instance under its id.  Used for
    /// tests and for embedding custom adapters.
    pub fn register_provider(&self, provider: Arc<dyn LlmProvider>) {
        self.providers
            .write()
            .insert(provider.provider_id().to_string(), provider);
    }

    fn provider_for(&self, id: &str, base_url: Option<&str>) -> Result<Arc<dyn LlmProvider>> {
        if let Some(p) = self.providers.read().get(id) {
            return Ok(p.clone());
        }

        let def = self.registry.resolve(id, base_url)?;
        let provider: Arc<dyn LlmProvider> = match def.api_type {
            ApiKind::Anthropic => {
                Arc::new(AnthropicProvider::from_definition(&def, self.resolver.as_ref())?)
            }
            ApiKind::OpenaiCompat => {
                Arc::new(OpenAiCompatProvider::from_definition(&def, self.resolver.as_ref())?)
            }
            ApiKind::Google => {
                Arc::new(GoogleProvider::from_definition(&def, self.resolver.as_ref())?)
            }
            ApiKind::Ollama => Arc::new(OllamaProvider::from_definition(&def)?),
        };

        self.providers
            .write()
            .insert(id.to_string(), provider.clone());
        Ok(provider)
    }

    /// Run one step against a provider under the retry policy.
    ///
    /// Every stream event — including per-attempt `retry` events — is
    /// forwarded to `on_event` as it happens.  Returns the collected
    /// outcome of the successful attempt.
    pub async fn stream_step<F>(
        &self,
        provider_id: &str,
        req: &ChatRequest,
        policy: &RetryPolicy,
        cancel: &CancelToken,
        on_event: F,
    ) -> Result<StepOutcome>
    where
        F: Fn(StreamEvent) + Send + Sync,
    {
        let provider = self.provider_for(provider_id, None)?;

        run_with_retry(
            policy,
            cancel,
            |attempt, delay_ms, reason| {
                on_event(StreamEvent::Retry {
                    attempt,
                    delay_ms,
                    reason,
                });
            },
            || collect_attempt(provider.clone(), req, cancel, &on_event),
        )
        .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Attempt collection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drain one provider stream into a [`StepOutcome`], forwarding events.
///
/// A mid-stream error aborts the attempt; the accumulated partial text is
/// discarded so a retried attempt reassembles from scratch.
async fn collect_attempt<F>(
    provider: Arc<dyn LlmProvider>,
    req: &ChatRequest,
    cancel: &CancelToken,
    on_event: &F,
) -> Result<StepOutcome>
where
    F: Fn(StreamEvent) + Send + Sync,
{
    let mut stream = provider.chat_stream(req).await?;

    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut stop_reason = StopReason::EndTurn;
    let mut usage = Usage::default();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            next = stream.next() => next,
        };

        let Some(event) = next else { break };
        let event = event?;

        match &event {
            StreamEvent::TextDelta { text: t } => text.push_str(t),
            StreamEvent::ReasoningDelta { text: t } => reasoning.push_str(t),
            StreamEvent::ToolCallEnd {
                call_id,
                tool_name,
                arguments,
            } => {
                tool_calls.push(ToolCall {
                    call_id: call_id.clone(),
                    tool_name: tool_name.clone(),
                    arguments: arguments.clone(),
                });
            }
            StreamEvent::StepEnd {
                stop_reason: reason,
                usage: u,
                ..
            } => {
                stop_reason = *reason;
                usage = *u;
            }
            _ => {}
        }

        on_event(event);
    }

    // Some dialects omit usage; approximate so budget accounting always
    // has something to work with.
    if usage.input_tokens == 0 {
        usage.input_tokens = estimate::estimate_request(&req.messages, &req.tools);
    }
    if usage.output_tokens == 0 {
        let out_chars = text.len()
            + reasoning.len()
            + tool_calls
                .iter()
                .map(|c| c.arguments.to_string().len())
                .sum::<usize>();
        usage.output_tokens = estimate::tokens_for_chars(out_chars);
    }

    // A tool_use stop reason with no assembled calls means the stream was
    // cut short; treat it as a clean end of turn.
    if stop_reason == StopReason::ToolUse && tool_calls.is_empty() {
        stop_reason = StopReason::EndTurn;
    }

    Ok(StepOutcome {
        text,
        reasoning,
        tool_calls,
        stop_reason,
        usage,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
