//! Trace event stream emitted by the agent controller and response cache.
//!
//! A `TraceSink` is an optional caller-supplied collaborator; the default
//! [`NullSink`] discards everything, and [`VecSink`] records events for
//! tests and debugging.

use std::sync::Mutex;
use std::time::Duration;

/// Why a cache lookup missed, surfaced for observability.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheMissReason {
    LowSimilarity,
    OptionsMismatch,
    TtlExpired,
    CapacityReject,
}

/// One observable event in an agent run, in controller step order.
#[derive(Debug, Clone)]
pub enum TraceEvent {
    AgentStep { step: usize, status: String },
    ProviderCall { model: String, latency: Duration, prompt_tokens: usize, completion_tokens: usize },
    ToolCall { name: String, id: String },
    ToolResult { name: String, id: String, is_error: bool },
    CacheHit,
    CacheMiss { reason: CacheMissReason },
    ContextPipelineApplied { steps: Vec<String>, compression_ratio: f64 },
    Error { message: String },
}

/// Sink for trace events. Implementations must be cheap and non-blocking;
/// the controller calls this synchronously at step boundaries.
pub trait TraceSink: Send + Sync {
    fn emit(&self, event: TraceEvent);
}

/// Default sink: discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn emit(&self, _event: TraceEvent) {}
}

/// Records every event in order; used by tests to assert on the controller's
/// observable behavior.
#[derive(Default)]
pub struct VecSink {
    events: Mutex<Vec<TraceEvent>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().expect("trace sink mutex poisoned").clone()
    }
}

impl TraceSink for VecSink {
    fn emit(&self, event: TraceEvent) {
        self.events.lock().expect("trace sink mutex poisoned").push(event);
    }
}
