//! Request assembly: turn persisted deltas into the ordered message list,
//! capped at the session's context-token ceiling.
//!
//! Truncation is oldest-first but never drops the system prompt or any
//! `tool_invocation` lacking its `tool_result`.  Dropping an assistant
//! message also drops the tool results that referenced it, so no orphan
//! `tool_result` ever reaches a wire adapter.

use std::collections::HashSet;

use fm_domain::message::{unresolved_invocations, ContentBlock, Message, Role};
use fm_providers::estimate;
use fm_sessions::MessageDelta;

/// Assemble the conversation for one LLM call.
pub fn assemble(deltas: &[MessageDelta], token_ceiling: u32) -> Vec<Message> {
    let mut messages: Vec<Message> = deltas.iter().map(|d| d.message.clone()).collect();

    let unresolved: HashSet<String> = unresolved_invocations(&messages).into_iter().collect();

    loop {
        let estimated: u32 = messages.iter().map(estimate::estimate_message).sum();
        if estimated <= token_ceiling {
            break;
        }

        let Some(victim_idx) = messages.iter().position(|m| droppable(m, &unresolved)) else {
            // Nothing left to drop without breaking invariants.
            tracing::warn!(
                estimated,
                token_ceiling,
                "context exceeds ceiling but no message is droppable"
            );
            break;
        };

        let victim = messages.remove(victim_idx);
        let orphaned: HashSet<String> = invocation_ids(&victim).into_iter().collect();
        if !orphaned.is_empty() {
            messages.retain(|m| !resolves_any(m, &orphaned));
        }
    }

    messages
}

fn droppable(msg: &Message, unresolved: &HashSet<String>) -> bool {
    if msg.role == Role::System {
        return false;
    }
    !invocation_ids(msg).iter().any(|id| unresolved.contains(id))
}

fn invocation_ids(msg: &Message) -> Vec<String> {
    msg.content
        .blocks()
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolInvocation { id, .. } => Some(id.clone()),
            _ => None,
        })
        .collect()
}

/// Whether a message contains a tool_result referencing any of `ids`.
fn resolves_any(msg: &Message, ids: &HashSet<String>) -> bool {
    msg.content.blocks().iter().any(|b| match b {
        ContentBlock::ToolResult { ref_id, .. } => ids.contains(ref_id),
        _ => false,
    })
}
