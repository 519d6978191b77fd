//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Azure-style gateways, vLLM, LM Studio, Together,
//! and any other endpoint that follows the chat completions contract.
//! Tool results travel as dedicated `tool` role messages keyed by
//! `tool_call_id`; streamed tool-call arguments arrive as concatenated
//! JSON fragments per index.

use crate::credentials::resolve_api_key;
use crate::traits::{ChatRequest, LlmProvider};
use crate::util::{from_reqwest, status_error};
use fm_domain::config::ProviderDefinition;
use fm_domain::credentials::CredentialResolver;
use fm_domain::error::{Error, Result};
use fm_domain::message::{ContentBlock, Message, MessageContent, Role, ToolDefinition};
use fm_domain::stream::{BoxStream, StopReason, StreamEvent, Usage};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM adapter for any OpenAI-compatible chat completions endpoint.
pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    auth_header: String,
    auth_prefix: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn from_definition(
        def: &ProviderDefinition,
        resolver: &dyn CredentialResolver,
    ) -> Result<Self> {
        let api_key = resolve_api_key(&def.auth, resolver)?;
        let auth_header = def
            .auth
            .header
            .clone()
            .unwrap_or_else(|| "Authorization".into());
        let auth_prefix = def.auth.prefix.clone().unwrap_or_else(|| "Bearer ".into());
        let default_model = def.default_model.clone().unwrap_or_else(|| "gpt-4o".into());

        let client = reqwest::Client::builder()
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: def.id.clone(),
            base_url: def.base_url.trim_end_matches('/').to_string(),
            api_key,
            auth_header,
            auth_prefix,
            default_model,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let header_value = format!("{}{}", self.auth_prefix, self.api_key);
        self.client
            .post(url)
            .header(&self.auth_header, header_value)
            .header("Content-Type", "application/json")
    }

    fn build_chat_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().flat_map(msg_to_openai).collect();
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_output_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Convert one internal message into one or more wire messages.
///
/// A user message carrying several tool results expands into one `tool`
/// role message per result (the contract requires one per `tool_call_id`).
fn msg_to_openai(msg: &Message) -> Vec<Value> {
    match msg.role {
        Role::System => vec![serde_json::json!({
            "role": "system",
            "content": msg.content.extract_all_text(),
        })],
        Role::Assistant => vec![assistant_to_openai(msg)],
        Role::User => {
            let mut out = Vec::new();
            let mut text_parts: Vec<&str> = Vec::new();
            for block in msg.content.blocks() {
                match block {
                    ContentBlock::Text { text } => text_parts.push(text),
                    ContentBlock::ToolResult {
                        ref_id, payload, ..
                    } => {
                        out.push(serde_json::json!({
                            "role": "tool",
                            "tool_call_id": ref_id,
                            "content": payload_to_string(payload),
                        }));
                    }
                    _ => {}
                }
            }
            if let MessageContent::Text(t) = &msg.content {
                text_parts.push(t);
            }
            if !text_parts.is_empty() {
                out.push(serde_json::json!({
                    "role": "user",
                    "content": text_parts.join("\n"),
                }));
            }
            out
        }
    }
}

fn assistant_to_openai(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t.clone()),
        MessageContent::Blocks(blocks) => {
            for block in blocks {
                match block {
                    ContentBlock::Text { text } => text_parts.push(text.clone()),
                    ContentBlock::ToolInvocation {
                        id,
                        name,
                        arguments,
                    } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": arguments.to_string(),
                            }
                        }));
                    }
                    _ => {}
                }
            }
        }
    }

    if text_parts.is_empty() {
        obj["content"] = Value::Null;
    } else {
        obj["content"] = Value::String(text_parts.join("\n"));
    }
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn payload_to_string(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn map_finish_reason(s: &str) -> StopReason {
    match s {
        "stop" => StopReason::EndTurn,
        "tool_calls" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-call assembly state: tool-call fragments arrive keyed by index.
struct StreamState {
    /// index → (call_id, name, args_buffer)
    tool_calls: std::collections::BTreeMap<u64, (String, String, String)>,
    usage: Usage,
    finish_reason: Option<StopReason>,
    end_emitted: bool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            tool_calls: std::collections::BTreeMap::new(),
            usage: Usage::default(),
            finish_reason: None,
            end_emitted: false,
        }
    }

    /// Flush assembled tool calls as `tool_call_end` events, in index order.
    fn flush_tool_calls(&mut self) -> Vec<Result<StreamEvent>> {
        let mut events = Vec::new();
        for (_, (call_id, name, args)) in std::mem::take(&mut self.tool_calls) {
            let arguments: Value = if args.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&args).unwrap_or_else(|e| {
                    tracing::warn!(
                        call_id = %call_id,
                        tool = %name,
                        error = %e,
                        "tool call arguments are not valid JSON; defaulting to empty object"
                    );
                    Value::Object(Default::default())
                })
            };
            events.push(Ok(StreamEvent::ToolCallEnd {
                call_id,
                tool_name: name,
                arguments,
            }));
        }
        events
    }
}

/// Parse one `data:` chunk of an OpenAI-compatible stream.
fn parse_openai_chunk(data: &str, state: &mut StreamState) -> Vec<Result<StreamEvent>> {
    let mut events = Vec::new();

    if data == "[DONE]" {
        if !state.end_emitted {
            events.extend(state.flush_tool_calls());
            state.end_emitted = true;
            events.push(Ok(StreamEvent::StepEnd {
                stop_reason: state.finish_reason.unwrap_or(StopReason::EndTurn),
                usage: state.usage,
                error: None,
            }));
        }
        return events;
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            events.push(Err(Error::Json(e)));
            return events;
        }
    };

    // The final usage-only chunk has an empty choices array.
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        if let Some(p) = usage.get("prompt_tokens").and_then(|v| v.as_u64()) {
            state.usage.input_tokens = p as u32;
        }
        if let Some(c) = usage.get("completion_tokens").and_then(|v| v.as_u64()) {
            state.usage.output_tokens = c as u32;
        }
    }

    let Some(choice) = v.get("choices").and_then(|c| c.get(0)) else {
        return events;
    };

    if let Some(delta) = choice.get("delta") {
        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::TextDelta {
                    text: text.to_string(),
                }));
            }
        }
        // DeepSeek-style reasoning channel.
        if let Some(text) = delta.get("reasoning_content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::ReasoningDelta {
                    text: text.to_string(),
                }));
            }
        }
        if let Some(tool_calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for tc in tool_calls {
                let idx = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                let entry = state
                    .tool_calls
                    .entry(idx)
                    .or_insert_with(|| (String::new(), String::new(), String::new()));

                if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                    entry.0 = id.to_string();
                }
                if let Some(name) = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                {
                    let first_sight = entry.1.is_empty();
                    entry.1 = name.to_string();
                    if first_sight {
                        events.push(Ok(StreamEvent::ToolCallStart {
                            call_id: entry.0.clone(),
                            tool_name: entry.1.clone(),
                        }));
                    }
                }
                if let Some(fragment) = tc
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(|v| v.as_str())
                {
                    if !fragment.is_empty() {
                        entry.2.push_str(fragment);
                        events.push(Ok(StreamEvent::ToolCallDelta {
                            call_id: entry.0.clone(),
                            delta: fragment.to_string(),
                        }));
                    }
                }
            }
        }
    }

    if let Some(reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
        state.finish_reason = Some(map_finish_reason(reason));
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req);

        tracing::debug!(provider = %self.id, url = %url, "openai-compat stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let mut state = StreamState::new();
        Ok(crate::sse::sse_response_stream(resp, move |data| {
            parse_openai_chunk(data, &mut state)
        }))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
