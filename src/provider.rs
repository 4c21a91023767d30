//! # Provider Client Abstraction
//!
//! `ProviderClient` is the seam between the agent controller and whatever
//! model server actually answers completions. [`OpenAiCompatibleClient`]
//! implements it against any OpenAI-compatible `/chat/completions`
//! endpoint (OpenAI, Azure, Ollama, OpenRouter, local llama.cpp/vLLM
//! servers); [`MockProviderClient`] implements it with a scriptable
//! response queue so the rest of the crate never needs a live network call
//! in tests.
//!
//! ## Design Philosophy
//!
//! Every other module that needs to talk to a model (the context pipeline's
//! LLM squeeze, the agent controller) depends only on `&dyn ProviderClient`,
//! never on `OpenAiCompatibleClient` directly. This keeps provider wire
//! formats out of the rest of the crate.

use crate::config::Provider;
use crate::context::Headroom;
use crate::error::{Error, Result};
use crate::message::{Conversation, Message, ToolCall};
use crate::stream::{FinishReason, StreamAccumulator, StreamedChunk};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Model's reasoning effort, mapped to a token budget unless the caller
/// overrides it with an explicit `budget_tokens`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    /// Default thinking-token budget for this effort level, used when the
    /// caller does not supply an explicit `budget_tokens`.
    pub fn default_budget_tokens(&self) -> usize {
        match self {
            ReasoningEffort::Low => 4096,
            ReasoningEffort::Medium => 16384,
            ReasoningEffort::High => 32768,
        }
    }
}

/// How the model should decide whether to call a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Named(String),
}

/// Per-request completion knobs. Every field is optional; `None` means "use
/// the provider's default." Reused verbatim for wire serialization to the
/// OpenAI-compatible request body and for [`crate::cache::options_hash`],
/// which hashes only the fields actually set here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

impl CompletionOptions {
    /// Resolves the effective thinking-token budget: an explicit
    /// `budget_tokens` wins, otherwise the `reasoning_effort` mapping,
    /// otherwise `None` (no extended thinking requested).
    pub fn effective_budget_tokens(&self) -> Option<usize> {
        self.budget_tokens
            .or_else(|| self.reasoning_effort.map(|e| e.default_budget_tokens()))
    }
}

/// Token accounting for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_tokens: Option<usize>,
}

/// A completed model turn, whether produced by [`ProviderClient::complete`]
/// or assembled from a stream by [`crate::stream::StreamAccumulator::finalize`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub id: String,
    pub created: u64,
    pub model: String,
    pub content: Option<String>,
    pub message: Message,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub thinking: Option<String>,
}

/// Client seam to a model provider. Every method needed by the context
/// pipeline's LLM squeeze and the agent controller lives here, never on a
/// concrete client type, so both can be exercised against
/// [`MockProviderClient`] without a network call.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn complete(&self, conv: &Conversation, opts: &CompletionOptions) -> Result<Completion>;

    async fn stream_complete(
        &self,
        conv: &Conversation,
        opts: &CompletionOptions,
        on_chunk: &mut (dyn FnMut(StreamedChunk) + Send),
    ) -> Result<Completion>;

    /// Total context window size, in tokens, for the underlying model.
    fn context_window(&self) -> usize;

    /// Tokens reserved for the completion itself, subtracted from
    /// `context_window` before headroom is applied.
    fn reserve_completion(&self) -> usize;

    /// Available tokens for conversation content: `context_window -
    /// reserve_completion - ceil(context_window * headroom)`.
    fn budget(&self, headroom: Headroom) -> usize {
        let reserved = self.reserve_completion();
        let window = self.context_window();
        let available = window.saturating_sub(reserved);
        let headroom_tokens = (window as f64 * headroom.fraction()).ceil() as usize;
        available.saturating_sub(headroom_tokens)
    }

    /// Checks the client is usable (credentials present, model known)
    /// without making a network call where avoidable.
    fn validate(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Scripted response queue, used across the test suite in place of a live
/// network call. Each call to `complete`/`stream_complete` pops the next
/// scripted `Result<Completion>`; `stream_complete` drives the chunks from
/// `scripted_chunks` (if any were set for that turn) through a
/// [`StreamAccumulator`] before invoking `on_chunk` for each one.
pub struct MockProviderClient {
    responses: std::sync::Mutex<std::collections::VecDeque<Result<Completion>>>,
    chunks: std::sync::Mutex<std::collections::VecDeque<Vec<StreamedChunk>>>,
    context_window: usize,
    reserve_completion: usize,
}

impl MockProviderClient {
    pub fn new() -> Self {
        Self {
            responses: std::sync::Mutex::new(std::collections::VecDeque::new()),
            chunks: std::sync::Mutex::new(std::collections::VecDeque::new()),
            context_window: 128_000,
            reserve_completion: 4096,
        }
    }

    pub fn with_context_window(mut self, window: usize, reserve: usize) -> Self {
        self.context_window = window;
        self.reserve_completion = reserve;
        self
    }

    /// Queues a successful completion for the next `complete`/`stream_complete` call.
    pub fn push_completion(&self, completion: Completion) {
        self.responses.lock().expect("mock provider mutex poisoned").push_back(Ok(completion));
    }

    /// Queues a failure for the next call.
    pub fn push_error(&self, err: Error) {
        self.responses.lock().expect("mock provider mutex poisoned").push_back(Err(err));
    }

    /// Queues the chunk sequence `stream_complete` should replay for the
    /// matching queued completion; only consulted by `stream_complete`.
    pub fn push_chunks(&self, chunks: Vec<StreamedChunk>) {
        self.chunks.lock().expect("mock provider mutex poisoned").push_back(chunks);
    }
}

impl Default for MockProviderClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderClient for MockProviderClient {
    async fn complete(&self, _conv: &Conversation, _opts: &CompletionOptions) -> Result<Completion> {
        self.responses
            .lock()
            .expect("mock provider mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(Error::other("MockProviderClient: no scripted response")))
    }

    async fn stream_complete(
        &self,
        conv: &Conversation,
        opts: &CompletionOptions,
        on_chunk: &mut (dyn FnMut(StreamedChunk) + Send),
    ) -> Result<Completion> {
        let scripted_chunks = self.chunks.lock().expect("mock provider mutex poisoned").pop_front();
        if let Some(chunks) = scripted_chunks {
            let mut acc = StreamAccumulator::new();
            for chunk in chunks {
                on_chunk(chunk.clone());
                acc.merge_chunk(chunk);
            }
            return Ok(acc.finalize());
        }
        self.complete(conv, opts).await
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    fn reserve_completion(&self) -> usize {
        self.reserve_completion
    }

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// HTTP client against any OpenAI-compatible `/chat/completions` endpoint.
/// Base URL, API key, and model resolution follow [`crate::config`]'s
/// provider table; streaming responses are parsed as Server-Sent Events
/// and assembled with [`StreamAccumulator`].
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    provider: Provider,
    context_window: usize,
    reserve_completion: usize,
    timeout: Duration,
}

impl OpenAiCompatibleClient {
    pub fn new(provider: Provider, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: std::env::var(provider.api_key_env_var()).ok(),
            model: model.into(),
            provider,
            context_window: 128_000,
            reserve_completion: 4096,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_context_window(mut self, window: usize, reserve: usize) -> Self {
        self.context_window = window;
        self.reserve_completion = reserve;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, conv: &Conversation, opts: &CompletionOptions, stream: bool) -> Value {
        let messages: Vec<Value> = conv
            .messages()
            .iter()
            .map(|m| serde_json::to_value(m).expect("Message always serializes"))
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        let obj = body.as_object_mut().expect("body is a JSON object");
        if let Some(t) = opts.temperature {
            obj.insert("temperature".into(), serde_json::json!(t));
        }
        if let Some(m) = opts.max_tokens {
            obj.insert("max_tokens".into(), serde_json::json!(m));
        }
        if let Some(p) = opts.top_p {
            obj.insert("top_p".into(), serde_json::json!(p));
        }
        if let Some(tools) = &opts.tools {
            obj.insert("tools".into(), serde_json::json!(tools));
        }
        if let Some(choice) = &opts.tool_choice {
            let value = match choice {
                ToolChoice::Auto => serde_json::json!("auto"),
                ToolChoice::None => serde_json::json!("none"),
                ToolChoice::Required => serde_json::json!("required"),
                ToolChoice::Named(name) => {
                    serde_json::json!({"type": "function", "function": {"name": name}})
                }
            };
            obj.insert("tool_choice".into(), value);
        }
        body
    }

    fn build_request(&self, body: Value) -> reqwest::RequestBuilder {
        let mut req = self.http.post(self.endpoint()).timeout(self.timeout).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    async fn send_for_status(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(self.timeout)
            } else if e.is_connect() {
                Error::network(self.endpoint(), Some(e.to_string()))
            } else {
                Error::Http(e)
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::authentication(format!("{:?}", self.provider)));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(Error::rate_limit(format!("{:?}", self.provider), retry_after));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(format!("{status}: {body}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatibleClient {
    async fn complete(&self, conv: &Conversation, opts: &CompletionOptions) -> Result<Completion> {
        let body = self.request_body(conv, opts, false);
        let response = self.send_for_status(self.build_request(body)).await?;
        let raw: crate::stream::RawCompletionResponse = response.json().await.map_err(Error::Http)?;
        let mut acc = StreamAccumulator::new();
        acc.merge_chunk(raw.into_streamed_chunk());
        Ok(acc.finalize())
    }

    async fn stream_complete(
        &self,
        conv: &Conversation,
        opts: &CompletionOptions,
        on_chunk: &mut (dyn FnMut(StreamedChunk) + Send),
    ) -> Result<Completion> {
        let body = self.request_body(conv, opts, true);
        let response = self.send_for_status(self.build_request(body)).await?;

        let mut sse_stream = crate::stream::parse_sse_stream(response);
        let mut acc = StreamAccumulator::new();
        use futures::StreamExt;
        while let Some(result) = sse_stream.next().await {
            let raw = result?;
            let chunk = raw.into_streamed_chunk();
            on_chunk(chunk.clone());
            acc.merge_chunk(chunk);
            if matches!(acc.finish_reason(), Some(FinishReason::Stop | FinishReason::Length | FinishReason::ToolCalls | FinishReason::ContentFilter))
            {
                break;
            }
        }
        Ok(acc.finalize())
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    fn reserve_completion(&self) -> usize {
        self.reserve_completion
    }

    fn validate(&self) -> Result<()> {
        if self.model.is_empty() {
            return Err(Error::config("model name must not be empty"));
        }
        if !matches!(self.provider, Provider::Ollama) && self.api_key.is_none() {
            return Err(Error::config(format!(
                "missing API key for provider {:?} ({})",
                self.provider,
                self.provider.api_key_env_var()
            )));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
