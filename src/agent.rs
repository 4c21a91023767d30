//! # Agent Controller
//!
//! Drives one user query through the step loop: context management,
//! completion, tool dispatch, repeat. `AgentState` is an immutable value —
//! every step produces a new state rather than mutating the previous one,
//! so callers can inspect (or retain) the state at any point in the run,
//! including a failed or cancelled one.
//!
//! ```text
//!            ┌──────────── run_step ──────────┐
//! (start)→ InProgress ──complete──▶ Assistant message
//!             │                          │
//!             │              (no tool_calls) ──▶ Complete
//!             │              (tool_calls)   ──▶ WaitingForTools
//!             ▼                          │
//!      WaitingForTools ◀── run_step ─────┘
//!        │ execute all tool_calls (strategy), append Tool messages
//!        └──▶ InProgress
//! ```

use crate::config::RuntimeConfig;
use crate::context::{self, ExternalPayloadStore, Headroom};
use crate::error::Result;
use crate::message::{Conversation, Message};
use crate::provider::{CompletionOptions, ProviderClient, ToolChoice};
use crate::retry::{retry, RetryPolicy};
use crate::tools::{ToolCallError, ToolRegistry, ToolRequest};
use crate::trace::{TraceEvent, TraceSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Terminal or in-flight state of an agent run.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentStatus {
    InProgress,
    WaitingForTools,
    Complete,
    Failed(String),
}

/// Immutable snapshot of a run. Every step produces a new `AgentState`;
/// nothing here is ever mutated in place.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub conversation: Conversation,
    pub user_query: String,
    pub status: AgentStatus,
    pub logs: Vec<String>,
}

impl AgentState {
    fn with(&self, conversation: Conversation, status: AgentStatus, log: impl Into<String>) -> Self {
        let mut logs = self.logs.clone();
        logs.push(log.into());
        Self { conversation, user_query: self.user_query.clone(), status, logs }
    }
}

/// Drives agent runs against a fixed provider, tool registry, and runtime
/// configuration. Cheap to share via `Arc`: the only interior state is the
/// read-only tool registry and configuration.
pub struct Agent {
    provider: Arc<dyn ProviderClient>,
    config: RuntimeConfig,
    payload_store: Arc<dyn ExternalPayloadStore>,
    retry_policy: RetryPolicy,
    model_name: String,
}

impl Agent {
    pub fn new(provider: Arc<dyn ProviderClient>, model_name: impl Into<String>, config: RuntimeConfig) -> Self {
        Self {
            provider,
            config,
            payload_store: Arc::new(context::InMemoryPayloadStore::new()),
            retry_policy: RetryPolicy::default(),
            model_name: model_name.into(),
        }
    }

    pub fn with_payload_store(mut self, store: Arc<dyn ExternalPayloadStore>) -> Self {
        self.payload_store = store;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Runs `query` to completion (or failure), dispatching tool calls
    /// against `tools` with the configured execution strategy. `max_steps`
    /// of `Some(0)` fails immediately with `Failed("step limit reached")`
    /// before any provider call is made. `cancel`, if supplied, is checked
    /// at each step boundary; a set flag ends the run with
    /// `Failed("cancelled")` and the conversation as of the last completed
    /// step.
    pub async fn run(
        &self,
        query: &str,
        tools: Arc<ToolRegistry>,
        max_steps: Option<usize>,
        trace_sink: Option<&dyn TraceSink>,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<AgentState> {
        let tools = Arc::new((*tools).clone().with_default_timeout(self.config.tool_default_timeout));

        let mut conversation = Conversation::new();
        conversation.push(Message::system("You are a helpful assistant."));
        conversation.push(Message::user(query));

        let mut state = AgentState {
            conversation,
            user_query: query.to_string(),
            status: AgentStatus::InProgress,
            logs: Vec::new(),
        };

        let mut step: usize = 0;
        loop {
            if let Some(limit) = max_steps {
                if step >= limit {
                    state = state.with(state.conversation.clone(), AgentStatus::Failed("step limit reached".into()), "step limit reached");
                    emit(trace_sink, TraceEvent::AgentStep { step, status: "Failed".into() });
                    return Ok(state);
                }
            }

            if matches!(state.status, AgentStatus::Complete) || matches!(state.status, AgentStatus::Failed(_)) {
                return Ok(state);
            }

            if is_cancelled(&cancel) {
                state = state.with(state.conversation.clone(), AgentStatus::Failed("cancelled".into()), "cancelled at step boundary");
                emit(trace_sink, TraceEvent::AgentStep { step, status: "Failed".into() });
                return Ok(state);
            }

            emit(trace_sink, TraceEvent::AgentStep { step, status: format!("{:?}", state.status) });

            // 3a: context pipeline.
            let budget = self.provider.budget(Headroom::Standard);
            let pipeline_result = context::manage(
                &state.conversation,
                budget,
                &self.config,
                &self.model_name,
                Some(self.provider.as_ref()),
                self.payload_store.as_ref(),
            )
            .await;

            let pipeline_result = match pipeline_result {
                Ok(r) => r,
                Err(e) => {
                    state = state.with(state.conversation.clone(), AgentStatus::Failed(e.to_string()), format!("context pipeline failed: {e}"));
                    emit(trace_sink, TraceEvent::Error { message: e.to_string() });
                    return Ok(state);
                }
            };
            state.conversation = pipeline_result.conversation;
            if !pipeline_result.steps_applied.is_empty() {
                emit(
                    trace_sink,
                    TraceEvent::ContextPipelineApplied {
                        steps: pipeline_result.steps_applied.iter().map(|s| s.name().to_string()).collect(),
                        compression_ratio: pipeline_result.compression_ratio(),
                    },
                );
            }

            match state.status {
                AgentStatus::InProgress => {
                    state = self.run_completion_step(state, tools.as_ref(), trace_sink, &cancel).await?;
                }
                AgentStatus::WaitingForTools => {
                    state = self.run_tool_step(state, tools.as_ref(), trace_sink).await;
                }
                AgentStatus::Complete | AgentStatus::Failed(_) => {}
            }

            step += 1;
        }
    }

    async fn run_completion_step(
        &self,
        state: AgentState,
        tools: &ToolRegistry,
        trace_sink: Option<&dyn TraceSink>,
        cancel: &Option<Arc<AtomicBool>>,
    ) -> Result<AgentState> {
        let opts = CompletionOptions {
            tools: if tools.is_empty() { None } else { Some(tools.definitions_json()) },
            tool_choice: if tools.is_empty() { None } else { Some(ToolChoice::Auto) },
            ..Default::default()
        };

        let conversation = state.conversation.clone();
        let provider = &self.provider;
        let started = Instant::now();

        let completion = retry(&self.retry_policy, || {
            let conversation = conversation.clone();
            let opts = opts.clone();
            async move { provider.complete(&conversation, &opts).await }
        });

        let completion_result = if let Some(flag) = cancel {
            tokio::select! {
                result = completion => result,
                _ = wait_for_cancel(flag.clone()) => {
                    return Ok(state.with(state.conversation.clone(), AgentStatus::Failed("cancelled".into()), "cancelled mid-completion"));
                }
            }
        } else {
            completion.await
        };

        let completion = match completion_result {
            Ok(completion) => completion,
            Err(e) => {
                emit(trace_sink, TraceEvent::Error { message: e.to_string() });
                return Ok(state.with(state.conversation.clone(), AgentStatus::Failed(e.to_string()), format!("provider call failed: {e}")));
            }
        };

        emit(
            trace_sink,
            TraceEvent::ProviderCall {
                model: self.model_name.clone(),
                latency: started.elapsed(),
                prompt_tokens: completion.usage.map(|u| u.prompt_tokens).unwrap_or(0),
                completion_tokens: completion.usage.map(|u| u.completion_tokens).unwrap_or(0),
            },
        );

        let next_conversation = state.conversation.with_message(completion.message.clone());
        let next_status = if completion.tool_calls.is_empty() { AgentStatus::Complete } else { AgentStatus::WaitingForTools };
        Ok(state.with(next_conversation, next_status, "completion received"))
    }

    async fn run_tool_step(&self, state: AgentState, tools: &ToolRegistry, trace_sink: Option<&dyn TraceSink>) -> AgentState {
        let tool_calls = match state.conversation.last() {
            Some(Message::Assistant { tool_calls, .. }) => tool_calls.clone(),
            _ => Vec::new(),
        };

        let requests: Vec<ToolRequest> = tool_calls
            .iter()
            .map(|c| ToolRequest { name: c.name.clone(), arguments: c.arguments.clone() })
            .collect();

        for call in &tool_calls {
            emit(trace_sink, TraceEvent::ToolCall { name: call.name.clone(), id: call.id.clone() });
        }

        let results = tools.execute_all(&requests, self.config.tool_execution_strategy).await;

        let mut conversation = state.conversation.clone();
        for (call, result) in tool_calls.iter().zip(results.into_iter()) {
            let (content, is_error) = match result {
                Ok(value) => (value.to_string(), false),
                Err(err) => (tool_error_content(&err, &call.name), true),
            };
            emit(trace_sink, TraceEvent::ToolResult { name: call.name.clone(), id: call.id.clone(), is_error });
            conversation.push(Message::tool(call.id.clone(), content));
        }

        state.with(conversation, AgentStatus::InProgress, "tool results appended")
    }
}

fn tool_error_content(err: &ToolCallError, tool_name: &str) -> String {
    err.to_json(tool_name).to_string()
}

fn is_cancelled(cancel: &Option<Arc<AtomicBool>>) -> bool {
    cancel.as_ref().is_some_and(|flag| flag.load(Ordering::SeqCst))
}

async fn wait_for_cancel(flag: Arc<AtomicBool>) {
    loop {
        if flag.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

fn emit(sink: Option<&dyn TraceSink>, event: TraceEvent) {
    if let Some(sink) = sink {
        sink.emit(event);
    }
}
