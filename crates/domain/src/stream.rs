use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted while a session advances (provider-agnostic).
///
/// The same enum is yielded by the dialect adapters and fanned out to
/// session subscribers, so a dashboard sees exactly what the loop sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// Incremental assistant text.
    #[serde(rename = "text_delta")]
    TextDelta { text: String },

    /// Incremental internal reasoning (dialects that expose it).
    #[serde(rename = "reasoning_delta")]
    ReasoningDelta { text: String },

    /// The model started emitting a tool call.
    #[serde(rename = "tool_call_start")]
    ToolCallStart { call_id: String, tool_name: String },

    /// Incremental tool-call argument data (raw JSON fragment).
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta { call_id: String, delta: String },

    /// A tool call is complete with fully assembled arguments.
    #[serde(rename = "tool_call_end")]
    ToolCallEnd {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// A dispatched tool finished (success or captured failure).
    #[serde(rename = "tool_result")]
    ToolResult {
        call_id: String,
        ok: bool,
        payload: serde_json::Value,
    },

    /// The gateway is about to retry a failed LLM attempt.
    #[serde(rename = "retry")]
    Retry {
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },

    /// A step (or the whole session) finished.  Every terminal state emits
    /// one of these so subscribers always observe a closing frame.
    #[serde(rename = "step_end")]
    StepEnd {
        stop_reason: StopReason,
        usage: Usage,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Terminal notice sent to a subscriber that fell too far behind and
    /// was dropped rather than back-pressuring the loop.
    #[serde(rename = "lag")]
    Lag { dropped: u64 },
}

/// Why a step (or session) stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    Cancelled,
    Paused,
    Error,
}

/// Token usage for one LLM call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}
