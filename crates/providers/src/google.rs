//! Google Gemini adapter.
//!
//! Implements the `streamGenerateContent?alt=sse` API.  System prompts go
//! to a top-level `systemInstruction`; roles are `user`/`model`; tool
//! calls are `functionCall` parts and tool results `functionResponse`
//! parts.  Auth is an API key query parameter.

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

/// An LLM adapter for the Google Gemini API.
pub struct GoogleProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn from_definition(
        def: &ProviderDefinition,
        resolver: &dyn CredentialResolver,
    ) -> Result<Self> {
        let api_key = resolve_api_key(&def.auth, resolver)?;
        let default_model = def
            .default_model
            .clone()
            .unwrap_or_else(|| "gemini-2.0-flash".into());

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

    fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, model, self.api_key
        )
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let mut contents: Vec<Value> = Vec::new();
        let mut system_instruction: Option<Value> = None;

        for msg in &req.messages {
            match msg.role {
                Role::System => {
                    system_instruction = Some(serde_json::json!({
                        "parts": [{"text": msg.content.extract_all_text()}]
                    }));
                }
                Role::User => contents.push(user_to_gemini(msg)),
                Role::Assistant => contents.push(assistant_to_gemini(msg)),
            }
        }

        let mut body = serde_json::json!({
            "contents": contents,
        });

        if let Some(si) = system_instruction {
            body["systemInstruction"] = si;
        }

        if !req.tools.is_empty() {
            let declarations: Vec<Value> = req.tools.iter().map(tool_to_gemini).collect();
            body["tools"] = serde_json::json!([{
                "functionDeclarations": declarations,
            }]);
        }

        let mut gen_config = serde_json::json!({});
        if let Some(temp) = req.temperature {
            gen_config["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_output_tokens {
            gen_config["maxOutputTokens"] = serde_json::json!(max);
        }
        if gen_config.as_object().is_some_and(|o| !o.is_empty()) {
            body["generationConfig"] = gen_config;
        }

        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn user_to_gemini(msg: &Message) -> Value {
    let mut parts: Vec<Value> = Vec::new();
    match &msg.content {
        MessageContent::Text(t) => parts.push(serde_json::json!({"text": t})),
        MessageContent::Blocks(blocks) => {
            for block in blocks {
                match block {
                    ContentBlock::Text { text } => {
                        parts.push(serde_json::json!({"text": text}));
                    }
                    ContentBlock::ToolResult {
                        ref_id, payload, ..
                    } => {
                        // Gemini keys function responses by invocation id
                        // (we synthesize ids as "{name}:{seq}" on the way out,
                        // so the name prefix is recoverable).
                        parts.push(serde_json::json!({
                            "functionResponse": {
                                "name": name_from_ref(ref_id),
                                "response": {"content": payload},
                            }
                        }));
                    }
                    _ => {}
                }
            }
        }
    }
    serde_json::json!({"role": "user", "parts": parts})
}

fn assistant_to_gemini(msg: &Message) -> Value {
    let mut parts: Vec<Value> = Vec::new();
    match &msg.content {
        MessageContent::Text(t) => parts.push(serde_json::json!({"text": t})),
        MessageContent::Blocks(blocks) => {
            for block in blocks {
                match block {
                    ContentBlock::Text { text } => {
                        parts.push(serde_json::json!({"text": text}));
                    }
                    ContentBlock::ToolInvocation {
                        name, arguments, ..
                    } => {
                        parts.push(serde_json::json!({
                            "functionCall": {"name": name, "args": arguments}
                        }));
                    }
                    _ => {}
                }
            }
        }
    }
    serde_json::json!({"role": "model", "parts": parts})
}

fn tool_to_gemini(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": tool.parameters,
    })
}

/// Recover the function name from a synthesized call id (`"{name}:{seq}"`).
fn name_from_ref(ref_id: &str) -> &str {
    ref_id.split(':').next().unwrap_or(ref_id)
}

fn map_finish_reason(s: &str, saw_function_call: bool) -> StopReason {
    match s {
        "STOP" if saw_function_call => StopReason::ToolUse,
        "STOP" => StopReason::EndTurn,
        "TOOL_USE" => StopReason::ToolUse,
        "MAX_TOKENS" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct StreamState {
    usage: Usage,
    call_seq: u32,
    saw_function_call: bool,
    end_emitted: bool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            usage: Usage::default(),
            call_seq: 0,
            saw_function_call: false,
            end_emitted: false,
        }
    }
}

/// Parse one SSE JSON body from a Gemini stream.
fn parse_gemini_chunk(data: &str, state: &mut StreamState) -> Vec<Result<StreamEvent>> {
    let mut events = Vec::new();

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            events.push(Err(Error::Json(e)));
            return events;
        }
    };

    if let Some(meta) = v.get("usageMetadata") {
        if let Some(p) = meta.get("promptTokenCount").and_then(|v| v.as_u64()) {
            state.usage.input_tokens = p as u32;
        }
        if let Some(c) = meta.get("candidatesTokenCount").and_then(|v| v.as_u64()) {
            state.usage.output_tokens = c as u32;
        }
    }

    let Some(candidate) = v.get("candidates").and_then(|c| c.get(0)) else {
        return events;
    };

    if let Some(parts) = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
    {
        for part in parts {
            if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                if !text.is_empty() {
                    events.push(Ok(StreamEvent::TextDelta {
                        text: text.to_string(),
                    }));
                }
            }
            if let Some(call) = part.get("functionCall") {
                let name = call
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let arguments = call
                    .get("args")
                    .cloned()
                    .unwrap_or(Value::Object(Default::default()));
                // Gemini sends whole calls; ids are synthesized so results
                // can be routed back by name.
                state.call_seq += 1;
                state.saw_function_call = true;
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

    if let Some(reason) = candidate.get("finishReason").and_then(|v| v.as_str()) {
        if !state.end_emitted {
            state.end_emitted = true;
            events.push(Ok(StreamEvent::StepEnd {
                stop_reason: map_finish_reason(reason, state.saw_function_call),
                usage: state.usage,
                error: None,
            }));
        }
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for GoogleProvider {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let url = self.stream_url(&model);
        let body = self.build_body(req);

        tracing::debug!(provider = %self.id, model = %model, "gemini stream request");

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
        Ok(crate::sse::sse_response_stream(resp, move |data| {
            parse_gemini_chunk(data, &mut state)
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

    fn collect(data: &[&str]) -> Vec<StreamEvent> {
        let mut state = StreamState::new();
        let mut events = Vec::new();
        for d in data {
            for e in parse_gemini_chunk(d, &mut state) {
                events.push(e.unwrap());
            }
        }
        events
    }

    #[test]
    fn text_stream_finishes() {
        let events = collect(&[
            r#"{"candidates":[{"content":{"parts":[{"text":"2+2 is "}]}}]}"#,
            r#"{"candidates":[{"content":{"parts":[{"text":"4"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":8,"candidatesTokenCount":4}}"#,
        ]);

        assert!(matches!(&events[0], StreamEvent::TextDelta { text } if text == "2+2 is "));
        match events.last().unwrap() {
            StreamEvent::StepEnd {
                stop_reason, usage, ..
            } => {
                assert_eq!(*stop_reason, StopReason::EndTurn);
                assert_eq!(usage.input_tokens, 8);
                assert_eq!(usage.output_tokens, 4);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn function_call_infers_tool_use() {
        let events = collect(&[
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"echo","args":{"text":"hi"}}}]},"finishReason":"STOP"}]}"#,
        ]);

        assert!(matches!(&events[0], StreamEvent::ToolCallStart { tool_name, .. } if tool_name == "echo"));
        match &events[1] {
            StreamEvent::ToolCallEnd {
                call_id, arguments, ..
            } => {
                assert_eq!(call_id, "echo:1");
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
    fn body_shapes() {
        let provider = GoogleProvider {
            id: "google".into(),
            base_url: "https://generativelanguage.googleapis.com".into(),
            api_key: "k".into(),
            default_model: "gemini-2.0-flash".into(),
            client: reqwest::Client::new(),
        };
        let req = ChatRequest {
            messages: vec![
                Message::system("be brief"),
                Message::user("hello"),
                Message::tool_result("echo:1", serde_json::json!("hi"), false),
            ],
            tools: vec![ToolDefinition {
                name: "echo".into(),
                description: "d".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            max_output_tokens: Some(256),
            ..Default::default()
        };
        let body = provider.build_body(&req);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "echo");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
        // Tool result becomes a functionResponse part named by the function.
        let parts = body["contents"][1]["parts"].as_array().unwrap();
        assert_eq!(parts[0]["functionResponse"]["name"], "echo");
    }

    #[test]
    fn name_recovered_from_synthesized_ref() {
        assert_eq!(name_from_ref("echo:3"), "echo");
        assert_eq!(name_from_ref("bare"), "bare");
    }
}
