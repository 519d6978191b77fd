//! Token estimation for dialects that omit usage and for budget preflight.
//!
//! The approximation is ~4 characters per token over the serialized
//! messages, tool declarations, and tool arguments.  Good enough for
//! context-ceiling checks and worst-case budget math; never used for
//! billing.

use fm_domain::message::{ContentBlock, Message, MessageContent, ToolDefinition};

const CHARS_PER_TOKEN: usize = 4;

/// Estimate tokens for a character count.
pub fn tokens_for_chars(chars: usize) -> u32 {
    chars.div_ceil(CHARS_PER_TOKEN) as u32
}

/// Estimate tokens for one message.
pub fn estimate_message(msg: &Message) -> u32 {
    let chars = match &msg.content {
        MessageContent::Text(t) => t.len(),
        MessageContent::Blocks(blocks) => blocks.iter().map(block_chars).sum(),
    };
    tokens_for_chars(chars)
}

fn block_chars(block: &ContentBlock) -> usize {
    match block {
        ContentBlock::Text { text } | ContentBlock::Reasoning { text } => text.len(),
        ContentBlock::ToolInvocation {
            id,
            name,
            arguments,
        } => id.len() + name.len() + arguments.to_string().len(),
        ContentBlock::ToolResult {
            ref_id, payload, ..
        } => ref_id.len() + payload.to_string().len(),
    }
}

/// Estimate total input tokens for a request: messages plus tool
/// declarations (schemas are sent with every call).
pub fn estimate_request(messages: &[Message], tools: &[ToolDefinition]) -> u32 {
    let message_tokens: u32 = messages.iter().map(estimate_message).sum();
    let tool_chars: usize = tools
        .iter()
        .map(|t| t.name.len() + t.description.len() + t.parameters.to_string().len())
        .sum();
    message_tokens + tokens_for_chars(tool_chars)
}
