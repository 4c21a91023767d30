//! # Tool Registry and Dispatch
//!
//! A `Tool` pairs a JSON-schema-described parameter shape with an async
//! handler. The `ToolRegistry` maps tool names to tools and dispatches
//! requests from the model, sequentially, in parallel, or with bounded
//! concurrency, always returning results in the order they were requested.
//!
//! Tool failures are never fatal to an agent run — they are caught here and
//! serialized into a structured JSON payload that gets handed back to the
//! model as a `Tool` message, so the model has a chance to self-correct.

use crate::schema::{SchemaDef, ToolParameterError};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Applied to every dispatch when the registry carries no explicit override
/// (spec §5's tool-call default); `Agent::run` sets the configured value via
/// [`ToolRegistry::with_default_timeout`] before each run.
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Boxed async tool handler: takes the already-validated JSON arguments and
/// returns either a JSON result or a human-readable failure message.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value, String>> + Send>> + Send + Sync>;

/// A callable tool: name, description, parameter schema, and handler.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub schema: SchemaDef,
    handler: ToolHandler,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl Tool {
    /// Emits the stable `{"type":"function", "function": {...}}` shape
    /// expected by OpenAI-compatible providers (spec §6).
    pub fn to_definition_json(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.schema.to_json_schema(),
                "strict": false,
            }
        })
    }
}

/// Builder for a [`Tool`]; mirrors the `name().description().parameter(...)
/// .handler(...)` fluent style used across the crate's public API.
pub struct ToolBuilder {
    name: String,
    description: String,
    schema: Option<SchemaDef>,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), schema: None }
    }

    pub fn schema(mut self, schema: SchemaDef) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn handler<F, Fut>(self, f: F) -> Tool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        Tool {
            name: self.name,
            description: self.description,
            schema: self.schema.unwrap_or(SchemaDef::Obj(Vec::new())),
            handler: Arc::new(move |v| Box::pin(f(v))),
        }
    }
}

/// Convenience entry point: `tool("calculator", "adds two numbers")`.
pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder::new(name, description)
}

/// A single request to dispatch a tool call.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub name: String,
    pub arguments: Value,
}

/// Failure modes for a single tool dispatch. Non-fatal to the agent run —
/// see module docs.
#[derive(Debug, Clone)]
pub enum ToolCallError {
    UnknownFunction(String),
    NullArguments,
    InvalidArguments(ToolParameterError),
    HandlerError(String),
    ExecutionError(String),
}

impl std::fmt::Display for ToolCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolCallError::UnknownFunction(name) => write!(f, "unknown function '{name}'"),
            ToolCallError::NullArguments => write!(f, "arguments were null"),
            ToolCallError::InvalidArguments(e) => write!(f, "invalid arguments: {e:?}"),
            ToolCallError::HandlerError(msg) => write!(f, "handler error: {msg}"),
            ToolCallError::ExecutionError(cause) => write!(f, "execution error: {cause}"),
        }
    }
}

impl ToolCallError {
    fn kind_tag(&self) -> &'static str {
        match self {
            ToolCallError::UnknownFunction(_) => "unknown_function",
            ToolCallError::NullArguments => "null_arguments",
            ToolCallError::InvalidArguments(_) => "invalid_arguments",
            ToolCallError::HandlerError(_) => "handler_error",
            ToolCallError::ExecutionError(_) => "execution_error",
        }
    }

    /// Produces the stable `Tool.content` error payload from spec §4.3:
    /// `{isError, toolName, errorType, message, parameterErrors?, error}`.
    pub fn to_json(&self, tool_name: &str) -> Value {
        let message = self.to_string();
        let mut obj = serde_json::json!({
            "isError": true,
            "toolName": tool_name,
            "errorType": self.kind_tag(),
            "message": message,
            "error": message,
        });
        if let ToolCallError::InvalidArguments(param_error) = self {
            let flattened = param_error.clone().flatten();
            let parameter_errors: Vec<Value> = flattened
                .into_iter()
                .map(parameter_error_to_json)
                .collect();
            obj["parameterErrors"] = Value::Array(parameter_errors);
        }
        obj
    }
}

fn parameter_error_to_json(err: ToolParameterError) -> Value {
    match err {
        ToolParameterError::MissingParameter { path, expected, available_keys } => {
            serde_json::json!({
                "parameterName": path,
                "kind": "missing_parameter",
                "expectedType": expected,
                "availableParameters": available_keys,
            })
        }
        ToolParameterError::NullParameter { path, expected } => serde_json::json!({
            "parameterName": path,
            "kind": "null_parameter",
            "expectedType": expected,
        }),
        ToolParameterError::TypeMismatch { path, expected, actual } => serde_json::json!({
            "parameterName": path,
            "kind": "type_mismatch",
            "expectedType": expected,
            "actualType": actual,
        }),
        ToolParameterError::InvalidNesting { path, parent_path, parent_type } => serde_json::json!({
            "parameterName": path,
            "kind": "invalid_nesting",
            "parentPath": parent_path,
            "parentType": parent_type,
        }),
        ToolParameterError::MultipleErrors(_) => {
            unreachable!("flatten() removes nested MultipleErrors before this point")
        }
    }
}

/// How a batch of tool requests should be executed.
#[derive(Debug, Clone, Copy)]
pub enum ExecutionStrategy {
    Sequential,
    Parallel,
    ParallelWithLimit(usize),
}

/// Read-only, name-keyed collection of tools. Safe to share across
/// concurrent runs via `Arc` once built.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
    default_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self { tools: HashMap::new(), default_timeout: DEFAULT_TOOL_TIMEOUT }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("names", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Tool) {
        self.tools.insert(tool.name.clone(), tool);
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.register(tool);
        self
    }

    /// Overrides the per-call timeout applied by `execute_async` (default
    /// 30s, spec §5). `Agent::run` sets this from `RuntimeConfig` once per
    /// run before dispatching.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool-definition JSON for every registered tool, in the shape the
    /// provider client attaches to a completion request.
    pub fn definitions_json(&self) -> Vec<Value> {
        self.tools.values().map(Tool::to_definition_json).collect()
    }

    /// Dispatches a single request. Unknown tool names, null arguments, and
    /// handler failures are all captured here rather than propagated as a
    /// hard error — only `UnknownFunction`/`NullArguments`/`InvalidArguments`
    /// are detected before the handler runs; `HandlerError` and
    /// `ExecutionError` come from the handler itself.
    pub async fn execute_async(&self, request: &ToolRequest) -> Result<Value, ToolCallError> {
        let tool = self
            .tools
            .get(&request.name)
            .ok_or_else(|| ToolCallError::UnknownFunction(request.name.clone()))?;

        if request.arguments.is_null() {
            return Err(ToolCallError::NullArguments);
        }

        log::debug!("dispatching tool '{}'", request.name);
        let handler = tool.handler.clone();
        let args = request.arguments.clone();
        let spawned = tokio::spawn(async move { handler(args).await });

        let join_result = match tokio::time::timeout(self.default_timeout, spawned).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!("tool '{}' timed out after {:?}", request.name, self.default_timeout);
                return Err(ToolCallError::ExecutionError(format!(
                    "tool '{}' timed out after {:?}",
                    request.name, self.default_timeout
                )));
            }
        };

        match join_result {
            Ok(Ok(value)) => {
                log::debug!("tool '{}' completed", request.name);
                Ok(value)
            }
            Ok(Err(message)) => Err(ToolCallError::HandlerError(message)),
            Err(join_error) => {
                if join_error.is_panic() {
                    log::warn!("tool '{}' panicked", request.name);
                }
                Err(ToolCallError::ExecutionError(join_error.to_string()))
            }
        }
    }

    /// Blocking-style convenience wrapper around [`Self::execute_async`] for
    /// callers already inside a Tokio runtime context (it simply awaits).
    pub async fn execute(&self, request: &ToolRequest) -> Result<Value, ToolCallError> {
        self.execute_async(request).await
    }

    /// Dispatches a batch of requests under the given strategy. Regardless
    /// of strategy, `results[i]` always corresponds to `requests[i]`.
    pub async fn execute_all(
        &self,
        requests: &[ToolRequest],
        strategy: ExecutionStrategy,
    ) -> Vec<Result<Value, ToolCallError>> {
        match strategy {
            ExecutionStrategy::Sequential => {
                let mut results = Vec::with_capacity(requests.len());
                for request in requests {
                    results.push(self.execute_async(request).await);
                }
                results
            }
            ExecutionStrategy::Parallel => {
                self.execute_bounded(requests, requests.len().max(1)).await
            }
            ExecutionStrategy::ParallelWithLimit(n) => self.execute_bounded(requests, n).await,
        }
    }

    /// Shared-atomic-ticket bounded concurrency: `min(workers, len)` workers
    /// each claim the next index via a shared counter, avoiding the
    /// head-of-line blocking a fixed chunk split would cause when handlers
    /// have heterogeneous latencies (spec §4.3/§5).
    async fn execute_bounded(
        &self,
        requests: &[ToolRequest],
        workers: usize,
    ) -> Vec<Result<Value, ToolCallError>> {
        if requests.is_empty() {
            return Vec::new();
        }

        let worker_count = workers.min(requests.len()).max(1);
        let next_index = Arc::new(AtomicUsize::new(0));
        let results: Arc<tokio::sync::Mutex<Vec<Option<Result<Value, ToolCallError>>>>> =
            Arc::new(tokio::sync::Mutex::new((0..requests.len()).map(|_| None).collect()));

        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let registry = self.clone();
            let requests = requests.to_vec();
            let next_index = next_index.clone();
            let results = results.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let idx = next_index.fetch_add(1, Ordering::SeqCst);
                    if idx >= requests.len() {
                        break;
                    }
                    let outcome = registry.execute_async(&requests[idx]).await;
                    let mut guard = results.lock().await;
                    guard[idx] = Some(outcome);
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        let guard = results.lock().await;
        guard
            .iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.clone().unwrap_or_else(|| {
                    Err(ToolCallError::ExecutionError(format!("worker never completed index {idx}")))
                })
            })
            .collect()
    }
}
