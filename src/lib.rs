//! # agent-core
//!
//! A runtime for tool-using conversational agents: an immutable-state
//! agent loop, bounded-concurrency tool dispatch, a fixed-order
//! context-window compression pipeline, streaming response assembly, and
//! a semantic response cache, all built over a provider-agnostic
//! `ProviderClient` trait.
//!
//! ## Architecture
//!
//! - **message**: the `Message`/`Conversation` data model and validation.
//! - **schema**: algebraic JSON-schema type and structured parameter
//!   extraction errors.
//! - **tools**: tool registry and dispatch (sequential, parallel, bounded).
//! - **tokenizer**: per-model BPE token counting.
//! - **context**: the fixed compression pipeline keeping a conversation
//!   under a token budget.
//! - **provider**: the `ProviderClient` trait, `CompletionOptions`,
//!   `Completion`, a mock client for tests, and an OpenAI-compatible HTTP
//!   client.
//! - **stream**: SSE parsing and streaming response assembly.
//! - **cache**: the semantic response cache.
//! - **agent**: the agent controller driving the step loop.
//! - **config**: provider table and environment-driven `RuntimeConfig`.
//! - **retry**: exponential backoff with jitter.
//! - **trace**: observable trace events and sinks.
//! - **error**: the crate's single `Error` type.
//!
//! ## Example
//!
//! ```rust,no_run
//! use agent_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let provider = Arc::new(MockProviderClient::new());
//!     let agent = Agent::new(provider, "gpt-4o", RuntimeConfig::default());
//!     let tools = Arc::new(ToolRegistry::new());
//!     let state = agent.run("What's the capital of France?", tools, None, None, None).await?;
//!     println!("{:?}", state.status);
//!     Ok(())
//! }
//! ```

mod agent;
mod cache;
mod config;
mod context;
mod error;
mod message;
mod provider;
mod schema;
mod stream;
mod tokenizer;
mod tools;
mod trace;

pub mod retry;

pub use agent::{Agent, AgentState, AgentStatus};

pub use cache::{cache_key_text, options_hash, CacheLookup, Clock, EmbeddingClient, ManualClock, SemanticCache, SystemClock};

pub use config::{get_base_url, parse_llm_model, Provider, RuntimeConfig};

pub use context::{manage as manage_context, ContextWindowResult, ExternalPayloadStore, Headroom, InMemoryPayloadStore, Step};

pub use error::{Error, Result};

pub use message::{validate_conversation, Conversation, Message, ToolCall, ValidationError};

pub use provider::{Completion, CompletionOptions, MockProviderClient, OpenAiCompatibleClient, ProviderClient, ReasoningEffort, ToolChoice, Usage};

pub use schema::{extract_optional_path, extract_path, SchemaDef, ToolParameterError};

pub use stream::{FinishReason, StreamAccumulator, StreamedChunk, ToolCallDelta};

pub use tokenizer::{TokenCounter, TokenizerAccuracy, TokenizerKind};

pub use tools::{tool, ExecutionStrategy, Tool, ToolBuilder, ToolCallError, ToolRegistry, ToolRequest};

pub use trace::{CacheMissReason, NullSink, TraceEvent, TraceSink, VecSink};

/// Convenience module with the most commonly used types for typical usage.
pub mod prelude {
    pub use crate::{
        Agent, AgentState, AgentStatus, Completion, CompletionOptions, Conversation, Error,
        Message, MockProviderClient, ProviderClient, Result, RuntimeConfig, SchemaDef, Tool,
        ToolRegistry, ToolRequest, tool,
    };
}
