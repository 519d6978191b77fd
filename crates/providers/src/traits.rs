use fm_domain::error::Result;
use fm_domain::message::{Message, ToolDefinition};
use fm_domain::session::ReasoningLevel;
use fm_domain::stream::{BoxStream, StreamEvent};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic streaming chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The ordered conversation to send.
    pub messages: Vec<Message>,
    /// Tool declarations the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature.  `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response.  `None` lets the provider choose.
    pub max_output_tokens: Option<u32>,
    /// Requested internal-reasoning depth (dialects that support it).
    pub reasoning: ReasoningLevel,
    /// Model identifier override.  `None` uses the provider default.
    pub model: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every dialect adapter implements.
///
/// Adapters translate between the internal types and the wire format of
/// each provider's HTTP API.  The stream always terminates with a
/// `step_end` event carrying the stop reason and usage; the gateway
/// collects the stream into a [`crate::gateway::StepOutcome`].
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Open a streaming chat completion.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
