//! # Message Model and Conversation
//!
//! Defines the immutable message types that make up a conversation with a
//! model provider, and the validation rules that keep a conversation
//! well-formed across tool-calling turns.
//!
//! ## Design Philosophy
//!
//! Messages are plain data — once constructed they are never mutated in
//! place. A `Conversation` grows by appending, and every append returns a
//! new `Conversation` value rather than mutating the receiver. This mirrors
//! the rest of the crate's "immutable state, recorded steps" approach (see
//! [`crate::agent`]) and keeps conversation history safe to share across
//! concurrent tool executions without locking.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// A single call the model has asked the runtime to make against a
/// registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque identifier assigned by the provider. Must be unique within
    /// the conversation and is echoed back on the matching `Tool` message.
    pub id: String,
    /// Name of the tool being invoked, matched against the tool registry.
    pub name: String,
    /// Arguments the model supplied, as parsed JSON.
    pub arguments: Value,
}

/// One turn in a conversation.
///
/// Content or tool calls: an `Assistant` message must carry at least one of
/// `content` or a non-empty `tool_calls` list (checked by
/// [`validate_conversation`], not by construction, so partially-built
/// messages can still be inspected before validation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant {
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System { content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User { content: content.into() }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Message::Assistant { content: Some(content.into()), tool_calls: Vec::new() }
    }

    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant { content, tool_calls }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Tool { tool_call_id: tool_call_id.into(), content: content.into() }
    }

    /// Role tag used by [`crate::cache`] key extraction and by deterministic
    /// summarization in [`crate::context`].
    pub fn role_tag(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::Tool { .. } => "tool",
        }
    }

    /// Best-effort text content for logging, summarization, and the cache
    /// key. Tool calls are not rendered here; callers that need them should
    /// match on the variant directly.
    pub fn text(&self) -> &str {
        match self {
            Message::System { content } => content,
            Message::User { content } => content,
            Message::Assistant { content, .. } => content.as_deref().unwrap_or(""),
            Message::Tool { content, .. } => content,
        }
    }

    pub fn is_pinned_system(&self) -> bool {
        matches!(self, Message::System { .. })
    }

    pub fn is_history_summary(&self) -> bool {
        matches!(self, Message::System { content } if content.starts_with("[HISTORY_SUMMARY]"))
    }
}

/// A field-level validation failure. Non-recoverable per the error taxonomy
/// (maps to [`crate::Error::Validation`]).
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Ordered sequence of messages exchanged during one agent run.
///
/// Identity is by object, not content: two conversations with identical
/// messages are still distinct runs. Appending never mutates an existing
/// `Conversation` in place from the caller's point of view — `push` takes
/// `&mut self` for the common in-loop case, while [`Conversation::with_message`]
/// returns a fresh value for callers that prefer a persistent style.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self { messages: Vec::new() }
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Returns a new conversation with `message` appended, leaving `self`
    /// untouched. Prefer this at call sites that treat the conversation as
    /// a persistent value (e.g. the agent controller's step loop).
    pub fn with_message(&self, message: Message) -> Self {
        let mut messages = self.messages.clone();
        messages.push(message);
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_conversation(&self.messages)
    }
}

impl std::ops::Index<usize> for Conversation {
    type Output = Message;
    fn index(&self, index: usize) -> &Message {
        &self.messages[index]
    }
}

/// Checks the well-formedness invariant from the data model: every `Tool`
/// message answers a preceding, uniquely-identified `ToolCall`, and every
/// `ToolCall` an assistant message emits is answered by exactly one `Tool`
/// message before the next assistant turn (or the conversation ends there,
/// which is the `WaitingForTools` state mid-run).
pub fn validate_conversation(messages: &[Message]) -> Result<(), ValidationError> {
    let mut seen_ids: HashSet<&str> = HashSet::new();
    let mut outstanding: HashSet<&str> = HashSet::new();

    for (idx, message) in messages.iter().enumerate() {
        match message {
            Message::Assistant { content, tool_calls } => {
                if content.is_none() && tool_calls.is_empty() {
                    return Err(ValidationError {
                        field: format!("messages[{idx}]"),
                        reason: "assistant message must have content or tool_calls".into(),
                    });
                }
                for call in tool_calls {
                    if !seen_ids.insert(call.id.as_str()) {
                        return Err(ValidationError {
                            field: format!("messages[{idx}].tool_calls"),
                            reason: format!("duplicate tool_call id '{}'", call.id),
                        });
                    }
                    outstanding.insert(call.id.as_str());
                }
            }
            Message::Tool { tool_call_id, content } => {
                if content.is_empty() {
                    return Err(ValidationError {
                        field: format!("messages[{idx}].content"),
                        reason: "tool message content must be non-empty".into(),
                    });
                }
                if !outstanding.remove(tool_call_id.as_str()) {
                    return Err(ValidationError {
                        field: format!("messages[{idx}].tool_call_id"),
                        reason: format!(
                            "tool_call_id '{tool_call_id}' does not match an outstanding call"
                        ),
                    });
                }
            }
            Message::System { .. } | Message::User { .. } => {
                if !outstanding.is_empty() {
                    return Err(ValidationError {
                        field: format!("messages[{idx}]"),
                        reason: "new turn started with unanswered tool calls outstanding".into(),
                    });
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_conversation_is_valid() {
        assert!(validate_conversation(&[]).is_ok());
    }

    #[test]
    fn assistant_without_content_or_tool_calls_is_invalid() {
        let msgs = vec![Message::Assistant { content: None, tool_calls: vec![] }];
        assert!(validate_conversation(&msgs).is_err());
    }

    #[test]
    fn tool_call_answered_by_matching_tool_message_is_valid() {
        let call = ToolCall { id: "c1".into(), name: "calc".into(), arguments: serde_json::json!({}) };
        let msgs = vec![
            Message::user("2+2?"),
            Message::assistant_tool_calls(None, vec![call]),
            Message::tool("c1", "{\"result\":4}"),
        ];
        assert!(validate_conversation(&msgs).is_ok());
    }

    #[test]
    fn tool_message_with_unknown_id_is_invalid() {
        let msgs = vec![Message::tool("missing", "{}")];
        assert!(validate_conversation(&msgs).is_err());
    }

    #[test]
    fn duplicate_tool_call_ids_are_invalid() {
        let call_a = ToolCall { id: "dup".into(), name: "a".into(), arguments: serde_json::json!({}) };
        let call_b = ToolCall { id: "dup".into(), name: "b".into(), arguments: serde_json::json!({}) };
        let msgs = vec![Message::assistant_tool_calls(None, vec![call_a, call_b])];
        assert!(validate_conversation(&msgs).is_err());
    }

    #[test]
    fn new_turn_with_outstanding_tool_call_is_invalid() {
        let call = ToolCall { id: "c1".into(), name: "calc".into(), arguments: serde_json::json!({}) };
        let msgs = vec![
            Message::assistant_tool_calls(None, vec![call]),
            Message::user("next turn before tool answered"),
        ];
        assert!(validate_conversation(&msgs).is_err());
    }

    #[test]
    fn empty_tool_content_is_invalid() {
        let call = ToolCall { id: "c1".into(), name: "calc".into(), arguments: serde_json::json!({}) };
        let msgs = vec![
            Message::assistant_tool_calls(None, vec![call]),
            Message::tool("c1", ""),
        ];
        assert!(validate_conversation(&msgs).is_err());
    }

    #[test]
    fn conversation_with_message_does_not_mutate_original() {
        let base = Conversation::new();
        let next = base.with_message(Message::user("hi"));
        assert_eq!(base.len(), 0);
        assert_eq!(next.len(), 1);
    }

    #[test]
    fn history_summary_detection() {
        let m = Message::system("[HISTORY_SUMMARY] earlier turns discussed X");
        assert!(m.is_history_summary());
        assert!(!Message::system("plain system prompt").is_history_summary());
    }
}
