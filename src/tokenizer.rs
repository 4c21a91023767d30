//! # Token Counter
//!
//! Selects a tokenizer for a given model name and counts tokens in strings,
//! messages, or whole conversations, including the per-message protocol
//! overhead providers charge for role and structural tokens.
//!
//! Tokenizer tables (`cl100k_base`, `o200k_base`, `r50k_base`) come from
//! [`tiktoken_rs`] and are built once per process via [`once_cell`], since
//! constructing a BPE table is not free and the context pipeline calls into
//! this module on every step.

use once_cell::sync::Lazy;
use tiktoken_rs::CoreBPE;

use crate::message::{Conversation, Message};

/// Which tokenizer backs a model's token counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerKind {
    O200k,
    Cl100k,
    R50k,
}

/// How trustworthy a tokenizer's counts are for the model it was selected
/// for. Non-OpenAI models reuse an OpenAI tokenizer as an approximation;
/// the context pipeline widens headroom accordingly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenizerAccuracy {
    Exact,
    Approximate(f32),
    Unknown,
}

static O200K: Lazy<CoreBPE> = Lazy::new(|| tiktoken_rs::o200k_base().expect("o200k_base table"));
static CL100K: Lazy<CoreBPE> = Lazy::new(|| tiktoken_rs::cl100k_base().expect("cl100k_base table"));
static R50K: Lazy<CoreBPE> = Lazy::new(|| tiktoken_rs::r50k_base().expect("r50k_base table"));

fn bpe_for(kind: TokenizerKind) -> &'static CoreBPE {
    match kind {
        TokenizerKind::O200k => &O200K,
        TokenizerKind::Cl100k => &CL100K,
        TokenizerKind::R50k => &R50K,
    }
}

/// Per-message protocol overhead, modeled after OpenAI's published
/// chat-completion accounting: every message costs a small fixed number of
/// structural tokens beyond its content, plus a few more if it names a
/// participant.
const TOKENS_PER_MESSAGE: usize = 3;
const TOKENS_PER_NAME: usize = 1;
const TOKENS_PER_REPLY_PRIMER: usize = 3;

/// Selects a tokenizer and its accuracy classification for `model_name`,
/// first match wins, case-insensitive, per the mapping table in spec §4.4.
pub fn select_tokenizer(model_name: &str) -> (TokenizerKind, TokenizerAccuracy) {
    let lower = model_name.to_lowercase();

    if let Some(inner) = lower.strip_prefix("azure/") {
        let (kind, _) = select_tokenizer(inner);
        return (kind, TokenizerAccuracy::Exact);
    }

    if lower.contains("gpt-4o") || lower.starts_with("o1-") {
        return (TokenizerKind::O200k, TokenizerAccuracy::Exact);
    }
    if lower.contains("gpt-4") {
        return (TokenizerKind::Cl100k, TokenizerAccuracy::Exact);
    }
    if lower.contains("gpt-3.5") {
        return (TokenizerKind::Cl100k, TokenizerAccuracy::Exact);
    }
    if lower.contains("gpt-3") {
        return (TokenizerKind::R50k, TokenizerAccuracy::Exact);
    }
    if lower.starts_with("anthropic/") || lower.contains("claude") {
        return (TokenizerKind::Cl100k, TokenizerAccuracy::Approximate(0.75));
    }
    if lower.starts_with("ollama/") {
        return (TokenizerKind::Cl100k, TokenizerAccuracy::Approximate(0.80));
    }

    (TokenizerKind::Cl100k, TokenizerAccuracy::Unknown)
}

/// A resolved counter for one model, reusable across a run.
pub struct TokenCounter {
    kind: TokenizerKind,
    accuracy: TokenizerAccuracy,
}

impl TokenCounter {
    pub fn for_model(model_name: &str) -> Self {
        let (kind, accuracy) = select_tokenizer(model_name);
        Self { kind, accuracy }
    }

    pub fn accuracy(&self) -> TokenizerAccuracy {
        self.accuracy
    }

    pub fn count_str(&self, text: &str) -> usize {
        bpe_for(self.kind).encode_with_special_tokens(text).len()
    }

    pub fn count_message(&self, message: &Message) -> usize {
        let mut count = TOKENS_PER_MESSAGE + self.count_str(message.text());
        if let Message::Assistant { tool_calls, .. } = message {
            for call in tool_calls {
                count += self.count_str(&call.name) + TOKENS_PER_NAME;
                count += self.count_str(&call.arguments.to_string());
            }
        }
        if let Message::Tool { tool_call_id, .. } = message {
            count += self.count_str(tool_call_id) + TOKENS_PER_NAME;
        }
        count
    }

    pub fn count_conversation(&self, conversation: &Conversation) -> usize {
        let body: usize = conversation.messages().iter().map(|m| self.count_message(m)).sum();
        body + TOKENS_PER_REPLY_PRIMER
    }
}
