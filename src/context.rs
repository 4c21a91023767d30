//! # Context Window Pipeline
//!
//! Keeps a conversation's token count under a budget by applying a fixed,
//! ordered sequence of compression steps and stopping as soon as the
//! budget is met:
//!
//! 1. [`ToolDeterministicCompaction`](Step::ToolDeterministicCompaction) —
//!    externalize oversized tool outputs behind a compaction marker.
//! 2. [`HistoryCompression`](Step::HistoryCompression) — summarize the
//!    oldest contiguous prefix of turns into pinned `[HISTORY_SUMMARY]`
//!    messages.
//! 3. An optional one-shot LLM squeeze of the existing summary.
//! 4. [`FinalTokenTrim`](Step::FinalTokenTrim) — delete oldest non-pinned
//!    messages until the budget is met.
//!
//! The pipeline is a fixed list, not a DAG — its value is predictability:
//! tests assert exactly which steps ran for a given input. New behavior is
//! added as a new step appended to the list, never by reordering existing
//! steps.

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::message::{Conversation, Message};
use crate::provider::ProviderClient;
use crate::tokenizer::TokenCounter;
use std::collections::{hash_map::DefaultHasher, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Safety margin subtracted from the raw budget to absorb tokenizer error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Headroom {
    Light,
    Standard,
    Conservative,
}

impl Headroom {
    pub fn fraction(self) -> f64 {
        match self {
            Headroom::Light => 0.05,
            Headroom::Standard => 0.08,
            Headroom::Conservative => 0.15,
        }
    }

    /// Maps an arbitrary fraction to the nearest named tier, used when
    /// `RuntimeConfig` reads `CONTEXT_HEADROOM_PERCENT` from the
    /// environment rather than a caller picking a named tier directly.
    pub fn from_fraction(fraction: f64) -> Self {
        if fraction <= 0.065 {
            Headroom::Light
        } else if fraction <= 0.115 {
            Headroom::Standard
        } else {
            Headroom::Conservative
        }
    }
}

/// Which pipeline step ran, recorded in [`ContextWindowResult::steps_applied`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    ToolDeterministicCompaction,
    HistoryCompression,
    LlmSqueeze,
    FinalTokenTrim,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::ToolDeterministicCompaction => "ToolDeterministicCompaction",
            Step::HistoryCompression => "HistoryCompression",
            Step::LlmSqueeze => "LlmSqueeze",
            Step::FinalTokenTrim => "FinalTokenTrim",
        }
    }
}

/// Outcome of running the pipeline once.
#[derive(Debug, Clone)]
pub struct ContextWindowResult {
    pub conversation: Conversation,
    pub steps_applied: Vec<Step>,
    pub original_tokens: usize,
    pub final_tokens: usize,
    pub was_trimmed: bool,
    pub removed_message_count: usize,
}

impl ContextWindowResult {
    pub fn compression_ratio(&self) -> f64 {
        if self.original_tokens == 0 {
            1.0
        } else {
            self.final_tokens as f64 / self.original_tokens as f64
        }
    }
}

/// Caller-opaque store for full tool payloads externalized by
/// [`Step::ToolDeterministicCompaction`], so they can be rehydrated later.
/// An in-memory default is provided for tests and non-persistent callers.
pub trait ExternalPayloadStore: Send + Sync {
    fn put(&self, hash: u64, payload: serde_json::Value);
    fn get(&self, hash: u64) -> Option<serde_json::Value>;
}

#[derive(Default)]
pub struct InMemoryPayloadStore {
    inner: std::sync::Mutex<HashMap<u64, serde_json::Value>>,
}

impl InMemoryPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExternalPayloadStore for InMemoryPayloadStore {
    fn put(&self, hash: u64, payload: serde_json::Value) {
        self.inner.lock().expect("payload store mutex poisoned").insert(hash, payload);
    }

    fn get(&self, hash: u64) -> Option<serde_json::Value> {
        self.inner.lock().expect("payload store mutex poisoned").get(&hash).cloned()
    }
}

const TOOL_OUTPUT_THRESHOLD_BYTES: usize = 4000;
const COMPACTION_DIGEST_TOKENS: usize = 64;
const DEFAULT_HISTORY_WINDOW: usize = 4;

fn hash_payload(payload: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    payload.hash(&mut hasher);
    hasher.finish()
}

/// Replaces oversized tool message payloads with a compaction marker,
/// keeping the first/last `K` tokens and externalizing the full payload.
fn tool_deterministic_compaction(
    conversation: &Conversation,
    counter: &TokenCounter,
    store: &dyn ExternalPayloadStore,
) -> Conversation {
    let messages: Vec<Message> = conversation
        .messages()
        .iter()
        .map(|msg| match msg {
            Message::Tool { tool_call_id, content } if content.len() > TOOL_OUTPUT_THRESHOLD_BYTES => {
                let hash = hash_payload(content);
                if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(content) {
                    store.put(hash, parsed);
                } else {
                    store.put(hash, serde_json::Value::String(content.clone()));
                }

                let words: Vec<&str> = content.split_whitespace().collect();
                let head: String = words.iter().take(COMPACTION_DIGEST_TOKENS).copied().collect::<Vec<_>>().join(" ");
                let tail: String = words
                    .iter()
                    .rev()
                    .take(COMPACTION_DIGEST_TOKENS)
                    .copied()
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect::<Vec<_>>()
                    .join(" ");

                let marker = format!(
                    "[TOOL_OUTPUT_TRUNCATED #{hash:x} {bytes}] head: {head} ... tail: {tail}",
                    bytes = content.len(),
                );
                Message::Tool { tool_call_id: tool_call_id.clone(), content: marker }
            }
            other => other.clone(),
        })
        .collect();

    let _ = counter;
    Conversation::from_messages(messages)
}

/// Deterministic (non-LLM) summary: joins role-tagged lines from the
/// compressed prefix and truncates to a heuristic budget. Used when
/// `enable_llm_compression` is off or as the fallback if no provider is
/// supplied.
fn deterministic_summary(prefix: &[Message]) -> String {
    let lines: Vec<String> = prefix
        .iter()
        .map(|m| format!("{}: {}", m.role_tag(), m.text()))
        .collect();
    let joined = lines.join(" | ");
    let truncated: String = joined.chars().take(2000).collect();
    format!("[HISTORY_SUMMARY] {truncated}")
}

async fn llm_summary(
    prefix: &[Message],
    provider: &dyn ProviderClient,
    token_target: usize,
    call_timeout: std::time::Duration,
) -> Result<String> {
    let transcript = prefix
        .iter()
        .map(|m| format!("{}: {}", m.role_tag(), m.text()))
        .collect::<Vec<_>>()
        .join("\n");
    let mut conv = Conversation::new();
    conv.push(Message::system(
        "Summarize the following conversation history concisely, preserving facts and decisions.",
    ));
    conv.push(Message::user(transcript));

    let opts = crate::provider::CompletionOptions {
        temperature: Some(0.0),
        max_tokens: Some(token_target),
        ..Default::default()
    };
    let completion = match tokio::time::timeout(call_timeout, provider.complete(&conv, &opts)).await {
        Ok(result) => result?,
        Err(_) => return Err(Error::timeout(call_timeout)),
    };
    Ok(format!("[HISTORY_SUMMARY] {}", completion.content.unwrap_or_default()))
}

/// Runs the fixed-order pipeline against `conversation`, returning it
/// unchanged (no-op) if already within `budget`.
pub async fn manage(
    conversation: &Conversation,
    budget: usize,
    config: &RuntimeConfig,
    model_name: &str,
    provider: Option<&dyn ProviderClient>,
    store: &dyn ExternalPayloadStore,
) -> Result<ContextWindowResult> {
    let counter = TokenCounter::for_model(model_name);
    let original_tokens = counter.count_conversation(conversation);

    if original_tokens <= budget {
        return Ok(ContextWindowResult {
            conversation: conversation.clone(),
            steps_applied: Vec::new(),
            original_tokens,
            final_tokens: original_tokens,
            was_trimmed: false,
            removed_message_count: 0,
        });
    }

    let budget_effective = (budget as f64 * (1.0 - config.headroom.fraction())).floor() as usize;
    let mut steps_applied = Vec::new();
    let mut current = conversation.clone();

    // Step 1: tool output compaction.
    current = tool_deterministic_compaction(&current, &counter, store);
    steps_applied.push(Step::ToolDeterministicCompaction);
    let mut tokens = counter.count_conversation(&current);

    // Step 2: history compression. System messages are pinned (spec: only
    // assistant/user/tool turns fold into the summary) and are partitioned
    // out of the window split entirely, not sliced in by raw index — so
    // the agent's initial system prompt (or any earlier history summary)
    // is carried through untouched rather than silently dropped once it
    // falls outside the trailing window.
    if tokens > budget_effective {
        let window = DEFAULT_HISTORY_WINDOW;
        let all_messages = current.messages().to_vec();
        let (system_messages, foldable): (Vec<Message>, Vec<Message>) =
            all_messages.into_iter().partition(|m| matches!(m, Message::System { .. }));

        if foldable.len() > window {
            let split = foldable.len() - window;
            let (prefix, tail) = foldable.split_at(split);

            let summary_text = if config.enable_llm_compression {
                if let Some(provider) = provider {
                    llm_summary(prefix, provider, config.summary_token_target, config.context_llm_timeout).await?
                } else {
                    deterministic_summary(prefix)
                }
            } else if config.enable_deterministic_compression {
                deterministic_summary(prefix)
            } else {
                String::new()
            };

            if !summary_text.is_empty() {
                let mut rebuilt = system_messages;
                rebuilt.push(Message::system(summary_text));
                rebuilt.extend_from_slice(tail);
                current = Conversation::from_messages(rebuilt);
                steps_applied.push(Step::HistoryCompression);
                tokens = counter.count_conversation(&current);
            }
        }
    }

    // Step 3: one-shot LLM squeeze of the existing summary, if still over
    // budget. Resolved as one-shot per the open question in spec §9(a) —
    // a second pass always falls through to FinalTokenTrim instead of
    // re-summarizing.
    if tokens > budget_effective && config.enable_llm_compression {
        if let Some(provider) = provider {
            if let Some(summary_idx) = current.messages().iter().position(Message::is_history_summary) {
                let tighter_target = config.summary_token_target / 2;
                let mut messages = current.messages().to_vec();
                if let Message::System { content } = &messages[summary_idx] {
                    let squeeze_prompt = content.trim_start_matches("[HISTORY_SUMMARY]").to_string();
                    let mut conv = Conversation::new();
                    conv.push(Message::system("Shrink this summary further, keep only essentials."));
                    conv.push(Message::user(squeeze_prompt));
                    let opts = crate::provider::CompletionOptions {
                        temperature: Some(0.0),
                        max_tokens: Some(tighter_target.max(32)),
                        ..Default::default()
                    };
                    let squeeze_result = tokio::time::timeout(config.context_llm_timeout, provider.complete(&conv, &opts)).await;
                    if let Ok(Ok(completion)) = squeeze_result {
                        messages[summary_idx] =
                            Message::system(format!("[HISTORY_SUMMARY] {}", completion.content.unwrap_or_default()));
                        current = Conversation::from_messages(messages);
                        steps_applied.push(Step::LlmSqueeze);
                        tokens = counter.count_conversation(&current);
                    }
                }
            }
        }
    }

    // Step 4: final trim, oldest non-pinned messages removed one at a time.
    let mut removed_message_count = 0;
    if tokens > budget_effective {
        let mut messages = current.messages().to_vec();
        let mut idx = 0;
        while tokens > budget_effective && idx < messages.len() {
            let is_trailing_system = idx == messages.len() - 1 && messages[idx].is_pinned_system();
            if messages[idx].is_history_summary() || is_trailing_system {
                idx += 1;
                continue;
            }
            let removed = messages.remove(idx);
            removed_message_count += 1;
            tokens -= counter.count_message(&removed);
        }
        if removed_message_count > 0 {
            steps_applied.push(Step::FinalTokenTrim);
            current = Conversation::from_messages(messages);
        }
    }

    let final_tokens = counter.count_conversation(&current);
    if final_tokens > budget {
        return Err(Error::context("cannot fit within budget"));
    }

    Ok(ContextWindowResult {
        conversation: current,
        steps_applied,
        original_tokens,
        final_tokens,
        was_trimmed: removed_message_count > 0,
        removed_message_count,
    })
}
