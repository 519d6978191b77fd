use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A pending tool invocation emitted by the LLM (provider-agnostic).
/// Every dialect adapter converts provider-specific tool calls to/from this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool declaration exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: serde_json::Value,
}

/// A message in a session's conversation (provider-agnostic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// One typed element of a message body.  Exhaustively matched everywhere;
/// there is no string-typed dispatch on block kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    /// Internal reasoning emitted by dialects that expose it.
    #[serde(rename = "reasoning")]
    Reasoning { text: String },

    #[serde(rename = "tool_invocation")]
    ToolInvocation {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        ref_id: String,
        payload: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Build the assistant message for one step: reasoning + text +
    /// tool invocations, in that order, skipping empty parts.
    pub fn assistant_step(text: &str, reasoning: &str, calls: &[ToolCall]) -> Self {
        let mut blocks = Vec::new();
        if !reasoning.is_empty() {
            blocks.push(ContentBlock::Reasoning {
                text: reasoning.to_owned(),
            });
        }
        if !text.is_empty() {
            blocks.push(ContentBlock::Text {
                text: text.to_owned(),
            });
        }
        for call in calls {
            blocks.push(ContentBlock::ToolInvocation {
                id: call.call_id.clone(),
                name: call.tool_name.clone(),
                arguments: call.arguments.clone(),
            });
        }
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Build a user message carrying one tool result block.
    pub fn tool_result(
        ref_id: impl Into<String>,
        payload: serde_json::Value,
        is_error: bool,
    ) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                ref_id: ref_id.into(),
                payload,
                is_error,
            }]),
        }
    }
}

impl MessageContent {
    /// Extract and join all plain-text content.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            MessageContent::Text(_) => &[],
            MessageContent::Blocks(blocks) => blocks,
        }
    }
}

/// Collect the ids of `tool_invocation` blocks that have no later
/// `tool_result` with a matching `ref_id`.
///
/// An empty result means the conversation is balanced; a non-empty result
/// means the session is mid-dispatch (`awaiting_tool` / `awaiting_approval`).
pub fn unresolved_invocations(messages: &[Message]) -> Vec<String> {
    let mut pending: Vec<String> = Vec::new();
    let mut resolved: HashSet<String> = HashSet::new();

    for msg in messages {
        for block in msg.content.blocks() {
            match block {
                ContentBlock::ToolInvocation { id, .. } => pending.push(id.clone()),
                ContentBlock::ToolResult { ref_id, .. } => {
                    resolved.insert(ref_id.clone());
                }
                _ => {}
            }
        }
    }

    pending.retain(|id| !resolved.contains(id));
    pending
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_all_text_from_text_variant() {
        let content = MessageContent::Text("hello world".into());
        assert_eq!(content.extract_all_text(), "hello world");
    }

    #[test]
    fn extract_all_text_skips_non_text_blocks() {
        let content = MessageContent::Blocks(vec![
            ContentBlock::Reasoning {
                text: "thinking".into(),
            },
            ContentBlock::Text {
                text: "line one".into(),
            },
            ContentBlock::ToolInvocation {
                id: "c1".into(),
                name: "echo".into(),
                arguments: serde_json::json!({}),
            },
            ContentBlock::Text {
                text: "line two".into(),
            },
        ]);
        assert_eq!(content.extract_all_text(), "line one\nline two");
    }

    #[test]
    fn assistant_step_block_order() {
        let calls = vec![ToolCall {
            call_id: "c1".into(),
            tool_name: "echo".into(),
            arguments: serde_json::json!({"text": "hi"}),
        }];
        let msg = Message::assistant_step("answer", "because", &calls);
        let blocks = msg.content.blocks();
        assert!(matches!(blocks[0], ContentBlock::Reasoning { .. }));
        assert!(matches!(blocks[1], ContentBlock::Text { .. }));
        assert!(matches!(blocks[2], ContentBlock::ToolInvocation { .. }));
    }

    #[test]
    fn unresolved_invocations_balanced() {
        let messages = vec![
            Message::assistant_step(
                "",
                "",
                &[ToolCall {
                    call_id: "c1".into(),
                    tool_name: "echo".into(),
                    arguments: serde_json::json!({}),
                }],
            ),
            Message::tool_result("c1", serde_json::json!("ok"), false),
        ];
        assert!(unresolved_invocations(&messages).is_empty());
    }

    #[test]
    fn unresolved_invocations_pending() {
        let messages = vec![Message::assistant_step(
            "",
            "",
            &[
                ToolCall {
                    call_id: "c1".into(),
                    tool_name: "echo".into(),
                    arguments: serde_json::json!({}),
                },
                ToolCall {
                    call_id: "c2".into(),
                    tool_name: "echo".into(),
                    arguments: serde_json::json!({}),
                },
            ],
        )];
        assert_eq!(unresolved_invocations(&messages), vec!["c1", "c2"]);
    }

    #[test]
    fn content_block_serde_tags() {
        let block = ContentBlock::ToolResult {
            ref_id: "c9".into(),
            payload: serde_json::json!({"ok": true}),
            is_error: false,
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_result");
        assert_eq!(json["ref_id"], "c9");
    }
}
