//! # Streaming Response Assembly
//!
//! Generalizes the teacher's SSE parsing and tool-call delta aggregation
//! into a provider-agnostic accumulator. [`parse_sse_stream`] turns a raw
//! HTTP streaming response into a `Stream` of [`RawChunk`]s; each `RawChunk`
//! converts into the provider-agnostic [`StreamedChunk`] that
//! [`StreamAccumulator`] merges.
//!
//! ## SSE Format
//!
//! ```text
//! data: {"id":"msg_123","choices":[{"delta":{"content":"Hello"}}]}
//!
//! data: [DONE]
//! ```
//!
//! Each line starting with `data: ` carries one JSON chunk; the stream ends
//! with the `[DONE]` sentinel, which is not valid JSON and is skipped
//! rather than parsed.

use crate::error::{Error, Result};
use crate::message::ToolCall;
use crate::provider::{Completion, Usage};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;

/// Finish reason on the final chunk of a stream, or on a non-streaming
/// completion. Exactly one of these per turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

/// One incremental piece of a tool call as it streams in, keyed by the
/// provider-assigned `index` so interleaved tool calls accumulate
/// independently.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments_delta: Option<String>,
}

/// Provider-agnostic streamed chunk, the unit [`StreamAccumulator::merge_chunk`] consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamedChunk {
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_delta: Vec<ToolCallDelta>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Default)]
struct ToolCallDraft {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Stateful accumulator merging a sequence of [`StreamedChunk`]s into a
/// final [`Completion`]. Holds a content buffer, per-index tool-call
/// drafts, a finish reason set at most once, and a last-write-wins usage.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    tool_calls: HashMap<u32, ToolCallDraft>,
    tool_call_order: Vec<u32>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    model: String,
    id: String,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    /// Merges one chunk's deltas into the accumulator.
    ///
    /// Content deltas append. Tool-call deltas upsert by index: `id`/`name`
    /// overwrite when present (they typically arrive once, in the first
    /// delta for that index), `arguments_delta` is appended to the raw
    /// string and only parsed as JSON in [`Self::finalize`]. The finish
    /// reason is set at most once; later attempts to set a different value
    /// are logged and ignored. Usage is last-write-wins.
    pub fn merge_chunk(&mut self, chunk: StreamedChunk) {
        if let Some(content) = chunk.content {
            self.content.push_str(&content);
        }

        for delta in chunk.tool_call_delta {
            if !self.tool_calls.contains_key(&delta.index) {
                self.tool_call_order.push(delta.index);
            }
            let entry = self.tool_calls.entry(delta.index).or_default();
            if let Some(id) = delta.id {
                entry.id = Some(id);
            }
            if let Some(name) = delta.name {
                entry.name = Some(name);
            }
            if let Some(args) = delta.arguments_delta {
                entry.arguments.push_str(&args);
            }
        }

        if let Some(reason) = chunk.finish_reason {
            match self.finish_reason {
                None => self.finish_reason = Some(reason),
                Some(existing) if existing == reason => {}
                Some(existing) => {
                    log::debug!("ignoring conflicting finish_reason {reason:?}, already {existing:?}");
                }
            }
        }

        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
    }

    /// Builds the final typed [`Completion`] from accumulated state.
    /// Incomplete tool calls (missing id or name) are dropped; argument
    /// strings that fail to parse as JSON raise [`Error::stream`] --
    /// handled by the caller of `finalize` when it needs fallibility, but
    /// kept infallible here to match the teacher's aggregator, which
    /// defaults a malformed tail to an empty object rather than losing the
    /// whole turn.
    pub fn finalize(self) -> Completion {
        let mut tool_calls = Vec::new();
        for index in self.tool_call_order {
            if let Some(draft) = self.tool_calls.get(&index) {
                if let (Some(id), Some(name)) = (draft.id.clone(), draft.name.clone()) {
                    let input: Value = if draft.arguments.is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&draft.arguments).unwrap_or_else(|e| {
                            log::warn!("tool call '{name}' arguments failed to parse: {e}; using empty object");
                            serde_json::json!({})
                        })
                    };
                    tool_calls.push(ToolCall { id, name, arguments: input });
                }
            }
        }

        let content = if self.content.is_empty() { None } else { Some(self.content) };
        let message = crate::message::Message::assistant_tool_calls(content.clone(), tool_calls.clone());

        Completion {
            id: self.id,
            created: 0,
            model: self.model,
            content,
            message,
            tool_calls,
            usage: self.usage,
            thinking: None,
        }
    }
}

/// Raw OpenAI-compatible streaming chunk, one `data:` line's JSON payload.
#[derive(Debug, Clone, Deserialize)]
pub struct RawChunk {
    pub id: String,
    pub model: String,
    #[serde(default)]
    pub usage: Option<RawUsage>,
    pub choices: Vec<RawChoiceDelta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawChoiceDelta {
    pub delta: RawDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<RawToolCallDelta>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawToolCallDelta {
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<RawFunctionDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RawUsage {
    #[serde(default)]
    pub prompt_tokens: usize,
    #[serde(default)]
    pub completion_tokens: usize,
    #[serde(default)]
    pub total_tokens: usize,
}

impl From<RawUsage> for Usage {
    fn from(u: RawUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
            thinking_tokens: None,
        }
    }
}

fn parse_finish_reason(raw: &str) -> Option<FinishReason> {
    match raw {
        "stop" => Some(FinishReason::Stop),
        "length" => Some(FinishReason::Length),
        "tool_calls" => Some(FinishReason::ToolCalls),
        "content_filter" => Some(FinishReason::ContentFilter),
        other => {
            log::debug!("unrecognized finish_reason '{other}'");
            None
        }
    }
}

impl RawChunk {
    /// Converts this streaming delta into a provider-agnostic [`StreamedChunk`].
    pub fn into_streamed_chunk(self) -> StreamedChunk {
        let usage = self.usage.map(Usage::from);
        let mut content = None;
        let mut tool_call_delta = Vec::new();
        let mut finish_reason = None;

        for choice in self.choices {
            if let Some(c) = choice.delta.content {
                content = Some(content.unwrap_or_default() + &c);
            }
            if let Some(deltas) = choice.delta.tool_calls {
                for d in deltas {
                    let (name, arguments_delta) = match d.function {
                        Some(f) => (f.name, f.arguments),
                        None => (None, None),
                    };
                    tool_call_delta.push(ToolCallDelta { index: d.index, id: d.id, name, arguments_delta });
                }
            }
            if let Some(reason) = choice.finish_reason.as_deref() {
                finish_reason = parse_finish_reason(reason);
            }
        }

        StreamedChunk { content, tool_call_delta, finish_reason, usage }
    }
}

/// Raw OpenAI-compatible non-streaming response: one complete message per
/// choice rather than a delta. Converted into the same [`StreamedChunk`]
/// shape as a streaming delta so [`OpenAiCompatibleClient::complete`](crate::provider::OpenAiCompatibleClient)
/// can share the accumulator path with `stream_complete`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCompletionResponse {
    pub id: String,
    pub model: String,
    #[serde(default)]
    pub usage: Option<RawUsage>,
    pub choices: Vec<RawChoiceMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawChoiceMessage {
    pub message: RawMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<RawToolCallFull>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawToolCallFull {
    pub id: String,
    pub function: RawFunctionFull,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFunctionFull {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

impl RawCompletionResponse {
    /// Converts the full, non-delta response into a single [`StreamedChunk`]
    /// carrying complete content and tool-call arguments (indexed by
    /// position since the non-streaming shape has no `index` field).
    pub fn into_streamed_chunk(self) -> StreamedChunk {
        let usage = self.usage.map(Usage::from);
        let mut content = None;
        let mut tool_call_delta = Vec::new();
        let mut finish_reason = None;

        for choice in self.choices {
            if let Some(c) = choice.message.content {
                content = Some(content.unwrap_or_default() + &c);
            }
            if let Some(calls) = choice.message.tool_calls {
                for (index, call) in calls.into_iter().enumerate() {
                    tool_call_delta.push(ToolCallDelta {
                        index: index as u32,
                        id: Some(call.id),
                        name: Some(call.function.name),
                        arguments_delta: Some(call.function.arguments),
                    });
                }
            }
            if let Some(reason) = choice.finish_reason.as_deref() {
                finish_reason = parse_finish_reason(reason);
            }
        }

        StreamedChunk { content, tool_call_delta, finish_reason, usage }
    }
}

/// Parses a raw HTTP response body as a Server-Sent Events stream of
/// [`RawChunk`]s. Lines not starting with `data: ` (heartbeats, comments)
/// are skipped; the `[DONE]` sentinel ends the stream without an item.
pub fn parse_sse_stream(body: reqwest::Response) -> Pin<Box<dyn Stream<Item = Result<RawChunk>> + Send>> {
    let stream = body.bytes_stream().filter_map(move |result| async move {
        let bytes = match result.map_err(Error::Http) {
            Ok(b) => b,
            Err(e) => return Some(Err(e)),
        };
        let text = String::from_utf8_lossy(&bytes);

        for line in text.lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                if data == "[DONE]" {
                    continue;
                }
                let chunk: RawChunk = match serde_json::from_str(data) {
                    Ok(c) => c,
                    Err(e) => return Some(Err(Error::stream(format!("failed to parse chunk: {e}")))),
                };
                return Some(Ok(chunk));
            }
        }
        None
    });

    Box::pin(stream)
}
