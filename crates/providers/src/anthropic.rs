//! Anthropic Messages adapter.
//!
//! Implements the Messages API including tool use, extended thinking, and
//! streaming.  System messages go in a separate top-level `system` field;
//! tool results are sent as user messages containing `tool_result` content
//! blocks.

use crate::credentials::resolve_api_key;
use crate::traits::{ChatRequest, LlmProvider};
use crate::util::{from_reqwest, status_error};
use fm_domain::config::ProviderDefinition;
use fm_domain::credentials::CredentialResolver;
use fm_domain::error::{Error, Result};
use fm_domain::message::{ContentBlock, Message, MessageContent, Role, ToolDefinition};
use fm_domain::session::ReasoningLevel;
use fm_domain::stream::{BoxStream, StopReason, StreamEvent, Usage};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Thinking-budget tokens per reasoning level.
fn thinking_budget(level: ReasoningLevel) -> Option<u32> {
    match level {
        ReasoningLevel::Off => None,
        ReasoningLevel::Low => Some(1_024),
        ReasoningLevel::Medium => Some(4_096),
        ReasoningLevel::High => Some(16_384),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM adapter for the Anthropic Messages API.
pub struct AnthropicProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn from_definition(
        def: &ProviderDefinition,
        resolver: &dyn CredentialResolver,
    ) -> Result<Self> {
        let api_key = resolve_api_key(&def.auth, resolver)?;
        let default_model = def
            .default_model
            .clone()
            .unwrap_or_else(|| "claude-sonnet-4-20250514".into());

        let client = reqwest::Client::builder()
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: def.id.clone(),
            base_url: def.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model,
            client,
        })
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    fn build_messages_body(&self, req: &ChatRequest) -> Value {
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        // Separate out system messages.
        let mut system_parts: Vec<String> = Vec::new();
        let mut api_messages: Vec<Value> = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => {
                    system_parts.push(msg.content.extract_all_text());
                }
                Role::User => {
                    api_messages.push(user_to_anthropic(msg));
                }
                Role::Assistant => {
                    api_messages.push(assistant_to_anthropic(msg));
                }
            }
        }

        let mut body = serde_json::json!({
            "model": model,
            "messages": api_messages,
            "stream": true,
        });

        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_anthropic).collect();
            body["tools"] = Value::Array(tools);
        }

        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        let max_tokens = req.max_output_tokens.unwrap_or(4096);
        body["max_tokens"] = serde_json::json!(max_tokens);

        if let Some(budget) = thinking_budget(req.reasoning) {
            // The thinking budget must stay below max_tokens.
            let budget = budget.min(max_tokens.saturating_sub(1));
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": budget,
            });
        }

        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn user_to_anthropic(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Text(t) => serde_json::json!({
            "role": "user",
            "content": t,
        }),
        MessageContent::Blocks(blocks) => {
            // User messages carrying tool results become tool_result blocks.
            let content: Vec<Value> = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(serde_json::json!({
                        "type": "text",
                        "text": text,
                    })),
                    ContentBlock::ToolResult {
                        ref_id,
                        payload,
                        is_error,
                    } => Some(serde_json::json!({
                        "type": "tool_result",
                        "tool_use_id": ref_id,
                        "content": payload_to_string(payload),
                        "is_error": is_error,
                    })),
                    _ => None,
                })
                .collect();
            serde_json::json!({
                "role": "user",
                "content": content,
            })
        }
    }
}

fn assistant_to_anthropic(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Text(t) => serde_json::json!({
            "role": "assistant",
            "content": [{"type": "text", "text": t}],
        }),
        MessageContent::Blocks(blocks) => {
            let content: Vec<Value> = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(serde_json::json!({
                        "type": "text",
                        "text": text,
                    })),
                    // Replaying reasoning requires the original signature;
                    // send it as plain thinking-less history instead.
                    ContentBlock::Reasoning { .. } => None,
                    ContentBlock::ToolInvocation {
                        id,
                        name,
                        arguments,
                    } => Some(serde_json::json!({
                        "type": "tool_use",
                        "id": id,
                        "name": name,
                        "input": arguments,
                    })),
                    ContentBlock::ToolResult { .. } => None,
                })
                .collect();
            serde_json::json!({
                "role": "assistant",
                "content": content,
            })
        }
    }
}

fn tool_to_anthropic(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

fn payload_to_string(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn map_stop_reason(s: &str) -> StopReason {
    match s {
        "end_turn" => StopReason::EndTurn,
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming SSE state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-call state for assembling tool calls from streamed content blocks.
/// Confined to the stream closure's stack; never shared across sessions.
struct StreamState {
    /// Active tool call per block index: (call_id, name, args_buffer).
    active_tool_calls: std::collections::HashMap<u64, (String, String, String)>,
    usage: Usage,
    end_emitted: bool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            active_tool_calls: std::collections::HashMap::new(),
            usage: Usage::default(),
            end_emitted: false,
        }
    }
}

/// Parse a single Anthropic SSE data payload into zero or more events.
fn parse_anthropic_sse(data: &str, state: &mut StreamState) -> Vec<Result<StreamEvent>> {
    let mut events = Vec::new();

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            events.push(Err(Error::Json(e)));
            return events;
        }
    };

    let event_type = v.get("type").and_then(|v| v.as_str()).unwrap_or("");

    match event_type {
        "message_start" => {
            if let Some(usage) = v.get("message").and_then(|m| m.get("usage")) {
                if let Some(input) = usage.get("input_tokens").and_then(|v| v.as_u64()) {
                    state.usage.input_tokens = input as u32;
                }
            }
        }

        "content_block_start" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(block) = v.get("content_block") {
                if block.get("type").and_then(|v| v.as_str()) == Some("tool_use") {
                    let call_id = block
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();
                    let name = block
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();
                    events.push(Ok(StreamEvent::ToolCallStart {
                        call_id: call_id.clone(),
                        tool_name: name.clone(),
                    }));
                    state
                        .active_tool_calls
                        .insert(idx, (call_id, name, String::new()));
                }
            }
        }

        "content_block_delta" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(delta) = v.get("delta") {
                match delta.get("type").and_then(|v| v.as_str()).unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                            if !text.is_empty() {
                                events.push(Ok(StreamEvent::TextDelta {
                                    text: text.to_string(),
                                }));
                            }
                        }
                    }
                    "thinking_delta" => {
                        if let Some(text) = delta.get("thinking").and_then(|v| v.as_str()) {
                            if !text.is_empty() {
                                events.push(Ok(StreamEvent::ReasoningDelta {
                                    text: text.to_string(),
                                }));
                            }
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) = delta.get("partial_json").and_then(|v| v.as_str()) {
                            if let Some(tc) = state.active_tool_calls.get_mut(&idx) {
                                tc.2.push_str(partial);
                                events.push(Ok(StreamEvent::ToolCallDelta {
                                    call_id: tc.0.clone(),
                                    delta: partial.to_string(),
                                }));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        "content_block_stop" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some((call_id, tool_name, args_str)) = state.active_tool_calls.remove(&idx) {
                let arguments: Value =
                    serde_json::from_str(&args_str).unwrap_or(Value::Object(Default::default()));
                events.push(Ok(StreamEvent::ToolCallEnd {
                    call_id,
                    tool_name,
                    arguments,
                }));
            }
        }

        "message_delta" => {
            if let Some(output) = v
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(|v| v.as_u64())
            {
                state.usage.output_tokens = output as u32;
            }
            let stop_reason = v
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(|v| v.as_str());
            if let Some(reason) = stop_reason {
                state.end_emitted = true;
                events.push(Ok(StreamEvent::StepEnd {
                    stop_reason: map_stop_reason(reason),
                    usage: state.usage,
                    error: None,
                }));
            }
        }

        "message_stop" => {
            if !state.end_emitted {
                state.end_emitted = true;
                events.push(Ok(StreamEvent::StepEnd {
                    stop_reason: StopReason::EndTurn,
                    usage: state.usage,
                    error: None,
                }));
            }
        }

        "error" => {
            let msg = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            events.push(Err(Error::Http(msg.to_string())));
        }

        _ => {
            // ping or unknown event types — ignore.
        }
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_messages_body(req);

        tracing::debug!(provider = %self.id, url = %url, "anthropic stream request");

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
            parse_anthropic_sse(data, &mut state)
        }))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use fm_domain::message::ToolCall;

    fn collect(data: &[&str]) -> (Vec<StreamEvent>, StreamState) {
        let mut state = StreamState::new();
        let mut events = Vec::new();
        for d in data {
            for e in parse_anthropic_sse(d, &mut state) {
                events.push(e.unwrap());
            }
        }
        (events, state)
    }

    #[test]
    fn text_stream_with_usage() {
        let (events, _) = collect(&[
            r#"{"type":"message_start","message":{"usage":{"input_tokens":12,"output_tokens":1}}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"4"}}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":5}}"#,
        ]);

        assert!(matches!(&events[0], StreamEvent::TextDelta { text } if text == "4"));
        match &events[1] {
            StreamEvent::StepEnd {
                stop_reason, usage, ..
            } => {
                assert_eq!(*stop_reason, StopReason::EndTurn);
                assert_eq!(usage.input_tokens, 12);
                assert_eq!(usage.output_tokens, 5);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn tool_use_assembly() {
        let (events, state) = collect(&[
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_01","name":"echo"}}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"text\":"}}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"hi\"}"}}"#,
            r#"{"type":"content_block_stop","index":1}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":9}}"#,
        ]);

        assert!(matches!(&events[0], StreamEvent::ToolCallStart { tool_name, .. } if tool_name == "echo"));
        match &events[3] {
            StreamEvent::ToolCallEnd {
                call_id,
                tool_name,
                arguments,
            } => {
                assert_eq!(call_id, "toolu_01");
                assert_eq!(tool_name, "echo");
                assert_eq!(arguments["text"], "hi");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            events.last().unwrap(),
            StreamEvent::StepEnd {
                stop_reason: StopReason::ToolUse,
                ..
            }
        ));
        assert!(state.active_tool_calls.is_empty());
    }

    #[test]
    fn thinking_delta_becomes_reasoning() {
        let (events, _) = collect(&[
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"hmm"}}"#,
        ]);
        assert!(matches!(&events[0], StreamEvent::ReasoningDelta { text } if text == "hmm"));
    }

    #[test]
    fn body_extracts_system_and_tool_results() {
        let provider = AnthropicProvider {
            id: "anthropic".into(),
            base_url: "https://api.anthropic.com".into(),
            api_key: "k".into(),
            default_model: "claude-sonnet-4-20250514".into(),
            client: reqwest::Client::new(),
        };
        let req = ChatRequest {
            messages: vec![
                Message::system("You are helpful"),
                Message::user("2+2?"),
                Message::assistant_step(
                    "",
                    "",
                    &[ToolCall {
                        call_id: "c1".into(),
                        tool_name: "echo".into(),
                        arguments: serde_json::json!({"text": "hi"}),
                    }],
                ),
                Message::tool_result("c1", serde_json::json!("hi"), false),
            ],
            tools: vec![ToolDefinition {
                name: "echo".into(),
                description: "echo".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            max_output_tokens: Some(1024),
            ..Default::default()
        };

        let body = provider.build_messages_body(&req);
        assert_eq!(body["system"], "You are helpful");
        assert_eq!(body["max_tokens"], 1024);
        // System message is not in the messages array.
        assert_eq!(body["messages"].as_array().unwrap().len(), 3);
        // Tool result rides in a user message as a tool_result block.
        let last = &body["messages"][2];
        assert_eq!(last["role"], "user");
        assert_eq!(last["content"][0]["type"], "tool_result");
        assert_eq!(last["content"][0]["tool_use_id"], "c1");
        // Assistant tool_use block preserved.
        assert_eq!(body["messages"][1]["content"][0]["type"], "tool_use");
        assert!(body.get("thinking").is_none());
    }

    #[test]
    fn reasoning_level_enables_thinking() {
        let provider = AnthropicProvider {
            id: "anthropic".into(),
            base_url: "https://api.anthropic.com".into(),
            api_key: "k".into(),
            default_model: "m".into(),
            client: reqwest::Client::new(),
        };
        let req = ChatRequest {
            messages: vec![Message::user("hi")],
            reasoning: ReasoningLevel::Medium,
            max_output_tokens: Some(8192),
            ..Default::default()
        };
        let body = provider.build_messages_body(&req);
        assert_eq!(body["thinking"]["type"], "enabled");
        assert_eq!(body["thinking"]["budget_tokens"], 4096);
    }
}
