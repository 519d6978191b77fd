//! Ollama adapter.
//!
//! Speaks the native `/api/chat` endpoint: newline-delimited JSON with a
//! final record carrying `done: true` plus eval counts.  Tool calls
//! arrive as whole structured objects, never as fragments.  Ollama has
//! no explicit tool-use stop reason; it is inferred from the presence of
//! tool calls.

use crate::traits::{ChatRequest, LlmProvider};
use crate::util::{from_reqwest, status_error};
use fm_domain::config::ProviderDefinition;
use fm_domain::error::{Error, Result};
use fm_domain::message::{ContentBlock, Message, MessageContent, Role, ToolDefinition};
use fm_domain::stream::{BoxStream, StopReason, StreamEvent, Usage};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM adapter for a local or remote Ollama daemon.  No auth.
pub struct OllamaProvider {
    id: String,
    base_url: String,
    default_model: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn from_definition(def: &ProviderDefinition) -> Result<Self> {
        let default_model = def
            .default_model
            .clone()
            .unwrap_or_else(|| "llama3.2".into());

        let client = reqwest::Client::builder()
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: def.id.clone(),
            base_url: def.base_url.trim_end_matches('/').to_string(),
            default_model,
            client,
        })
    }

    fn build_chat_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().flat_map(msg_to_ollama).collect();
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": true,
        });

        if !req.tools.is_empty() {
            // Mirrors the openai-compatible tools shape.
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }

        let mut options = serde_json::json!({});
        if let Some(temp) = req.temperature {
            options["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_output_tokens {
            options["num_predict"] = serde_json::json!(max);
        }
        if options.as_object().is_some_and(|o| !o.is_empty()) {
            body["options"] = options;
        }

        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ollama has a dedicated `tool` role; a user message carrying several
/// tool results expands into one wire message per result.
fn msg_to_ollama(msg: &Message) -> Vec<Value> {
    match msg.role {
        Role::System => vec![serde_json::json!({
            "role": "system",
            "content": msg.content.extract_all_text(),
        })],
        Role::Assistant => vec![assistant_to_ollama(msg)],
        Role::User => {
            let mut out = Vec::new();
            let mut text_parts: Vec<&str> = Vec::new();
            for block in msg.content.blocks() {
                match block {
                    ContentBlock::Text { text } => text_parts.push(text),
                    ContentBlock::ToolResult { payload, .. } => {
                        out.push(serde_json::json!({
                            "role": "tool",
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

fn assistant_to_ollama(msg: &Message) -> Value {
    let mut tool_calls: Vec<Value> = Vec::new();
    let mut text_parts: Vec<String> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t.clone()),
        MessageContent::Blocks(blocks) => {
            for block in blocks {
                match block {
                    ContentBlock::Text { text } => text_parts.push(text.clone()),
                    ContentBlock::ToolInvocation {
                        name, arguments, ..
                    } => {
                        tool_calls.push(serde_json::json!({
                            "function": {"name": name, "arguments": arguments}
                        }));
                    }
                    _ => {}
                }
            }
        }
    }

    let mut obj = serde_json::json!({
        "role": "assistant",
        "content": text_parts.join("\n"),
    });
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn payload_to_string(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct StreamState {
    call_seq: u32,
    saw_tool_calls: bool,
    end_emitted: bool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            call_seq: 0,
            saw_tool_calls: false,
            end_emitted: false,
        }
    }
}

/// Parse one NDJSON line from an Ollama chat stream.
fn parse_ollama_line(line: &str, state: &mut StreamState) -> Vec<Result<StreamEvent>> {
    let mut events = Vec::new();

    let v: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            events.push(Err(Error::Json(e)));
            return events;
        }
    };

    if let Some(err) = v.get("error").and_then(|v| v.as_str()) {
        events.push(Err(Error::Http(err.to_string())));
        return events;
    }

    if let Some(message) = v.get("message") {
        if let Some(text) = message.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::TextDelta {
                    text: text.to_string(),
                }));
            }
        }
        // Reasoning models expose a separate thinking channel.
        if let Some(text) = message.get("thinking").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::ReasoningDelta {
                    text: text.to_string(),
                }));
            }
        }
        if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
            for call in calls {
                let name = call
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let arguments = call
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .cloned()
                    .unwrap_or(Value::Object(Default::default()));
                state.call_seq += 1;
                state.saw_tool_calls = true;
                let call_id = format!("{}:{}", name, state.call_seq);
                events.push(Ok(StreamEvent::ToolCallStart {
                    call_id: call_id.clone(),
                    tool_name: name.clone(),
                }));
                events.push(Ok(StreamEvent::ToolCallEnd {
                    call_id,
                    tool_name: name,
                    arguments,
                }));
            }
        }
    }

    if v.get("done").and_then(|v| v.as_bool()) == Some(true) && !state.end_emitted {
        let usage = Usage {
            input_tokens: v
                .get("prompt_eval_count")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            output_tokens: v.get("eval_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        };
        // Ollama reports "stop" even when tool calls are present; the
        // presence of tool calls takes precedence.
        let stop_reason = if state.saw_tool_calls {
            StopReason::ToolUse
        } else {
            match v.get("done_reason").and_then(|v| v.as_str()) {
                Some("length") => StopReason::MaxTokens,
                _ => StopReason::EndTurn,
            }
        };
        state.end_emitted = true;
        events.push(Ok(StreamEvent::StepEnd {
            stop_reason,
            usage,
            error: None,
        }));
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OllamaProvider {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.build_chat_body(req);

        tracing::debug!(provider = %self.id, url = %url, "ollama stream request");

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let mut state = StreamState::new();
        Ok(crate::ndjson::ndjson_response_stream(resp, move |line| {
            parse_ollama_line(line, &mut state)
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

    fn collect(lines: &[&str]) -> Vec<StreamEvent> {
        let mut state = StreamState::new();
        let mut events = Vec::new();
        for l in lines {
            for e in parse_ollama_line(l, &mut state) {
                events.push(e.unwrap());
            }
        }
        events
    }

    #[test]
    fn text_then_done_with_usage() {
        let events = collect(&[
            r#"{"message":{"role":"assistant","content":"4"},"done":false}"#,
            r#"{"message":{"role":"assistant","content":""},"done":true,"done_reason":"stop","prompt_eval_count":11,"eval_count":3}"#,
        ]);

        assert!(matches!(&events[0], StreamEvent::TextDelta { text } if text == "4"));
        match events.last().unwrap() {
            StreamEvent::StepEnd {
                stop_reason, usage, ..
            } => {
                assert_eq!(*stop_reason, StopReason::EndTurn);
                assert_eq!(usage.input_tokens, 11);
                assert_eq!(usage.output_tokens, 3);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn tool_calls_override_stop_reason() {
        let events = collect(&[
            r#"{"message":{"role":"assistant","content":"","tool_calls":[{"function":{"name":"echo","arguments":{"text":"hi"}}}]},"done":false}"#,
            r#"{"message":{"role":"assistant","content":""},"done":true,"done_reason":"stop"}"#,
        ]);

        assert!(matches!(&events[0], StreamEvent::ToolCallStart { tool_name, .. } if tool_name == "echo"));
        match &events[1] {
            StreamEvent::ToolCallEnd { arguments, .. } => {
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
    }

    #[test]
    fn length_done_reason_maps_to_max_tokens() {
        let events = collect(&[r#"{"done":true,"done_reason":"length","eval_count":99}"#]);
        assert!(matches!(
            events.last().unwrap(),
            StreamEvent::StepEnd {
                stop_reason: StopReason::MaxTokens,
                ..
            }
        ));
    }

    #[test]
    fn error_line_surfaces() {
        let mut state = StreamState::new();
        let events = parse_ollama_line(r#"{"error":"model not found"}"#, &mut state);
        assert!(events[0].is_err());
    }

    #[test]
    fn tool_role_messages_on_wire() {
        let msg = Message::tool_result("echo:1", serde_json::json!("hi"), false);
        let wire = msg_to_ollama(&msg);
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[0]["content"], "hi");
    }
}
