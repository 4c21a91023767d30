//! # Error Types for the Agent Runtime
//!
//! This module defines all error types used throughout the crate, providing
//! comprehensive error handling with detailed context for different failure
//! scenarios.
//!
//! ## Design Philosophy
//!
//! - **Explicit Error Handling**: every fallible operation returns
//!   `Result<T>`.
//! - **No Silent Failures**: errors are propagated explicitly to the
//!   caller.
//! - **Rich Context**: each variant carries the information a caller (or a
//!   retry policy) needs to act on it, including whether it is
//!   recoverable.
//! - **Easy Conversion**: automatic conversion from `reqwest` and
//!   `serde_json` errors via `#[from]`.
//!
//! ## Usage
//!
//! ```ignore
//! use agent_core::{Error, Result};
//!
//! fn example() -> Result<()> {
//!     if some_condition {
//!         return Err(Error::config("Invalid model name"));
//!     }
//!
//!     let response = http_client.get(url).send().await?; // Auto-converts reqwest::Error
//!     let json = serde_json::from_str(data)?; // Auto-converts serde_json::Error
//!
//!     Ok(())
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

/// Type alias for `Result<T, Error>` used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type covering all failure modes in the crate.
///
/// ## Error Categories
///
/// - **Http/Json**: transport and serialization failures from provider
///   calls.
/// - **Authentication/RateLimit/Network/Timeout**: provider-call failure
///   kinds with distinct recoverability ([`Error::is_recoverable`]).
/// - **Config**: invalid configuration supplied when building options.
/// - **Api**: an error response from the model server itself.
/// - **Stream**: failures parsing or assembling a streaming response.
/// - **Tool**: tool registration/execution failures not already captured
///   by [`crate::tools::ToolCallError`].
/// - **Validation**: conversation or argument validation failures (C2/C3).
/// - **Processing**: context-pipeline or extractor failures tied to a
///   named stage.
/// - **Context**: the context pipeline could not fit the conversation
///   within budget.
/// - **InvalidInput/Other**: catch-alls for user input and miscellaneous
///   failures.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed due to network issues, connection problems, or
    /// HTTP-level errors. Wraps `reqwest::Error` and is produced
    /// automatically via `?`.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration provided when building options or reading
    /// `RuntimeConfig` from the environment.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Error response received from the model server's API.
    #[error("API error: {0}")]
    Api(String),

    /// Error occurred while processing the streaming response.
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Tool execution or registration failed outside the structured
    /// [`crate::tools::ToolCallError`] path (e.g. duplicate tool name at
    /// registration).
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Structured tool-call failure, carried through unchanged so callers
    /// can inspect the original kind.
    #[error("Tool call failed: {0}")]
    ToolCall(#[from] crate::tools::ToolCallError),

    /// Invalid input provided by the user (e.g. an empty prompt).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Request exceeded the configured timeout duration.
    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    /// Authentication with the provider failed (HTTP 401 or equivalent).
    /// Not recoverable by retry.
    #[error("Authentication failed for provider '{0}'")]
    Authentication(String),

    /// Provider returned a rate-limit response (HTTP 429 or equivalent).
    /// Recoverable; `retry_after` is honored when present.
    #[error("Rate limited by provider '{provider}'{}", retry_after.map(|d| format!(" (retry after {d:?})")).unwrap_or_default())]
    RateLimit { provider: String, retry_after: Option<Duration> },

    /// Network-level failure reaching `endpoint` (connect refused, DNS,
    /// TLS). Recoverable.
    #[error("Network error reaching '{endpoint}': {}", cause.as_deref().unwrap_or("unknown cause"))]
    Network { endpoint: String, cause: Option<String> },

    /// Conversation or parameter validation failed. Not recoverable.
    #[error("Validation failed for '{field}': {}", violations.join(", "))]
    Validation { field: String, violations: Vec<String> },

    /// A named processing stage (context pipeline step, extractor) failed.
    /// Recoverability depends on the stage.
    #[error("Processing error in stage '{stage}': {message}")]
    Processing { stage: String, message: String },

    /// The context pipeline could not fit the conversation within budget
    /// after applying every configured step.
    #[error("Context error: {0}")]
    Context(String),

    /// Miscellaneous error that doesn't fit other categories.
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn timeout(duration: Duration) -> Self {
        Error::Timeout(duration)
    }

    pub fn authentication(provider: impl Into<String>) -> Self {
        Error::Authentication(provider.into())
    }

    pub fn rate_limit(provider: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Error::RateLimit { provider: provider.into(), retry_after }
    }

    pub fn network(endpoint: impl Into<String>, cause: Option<String>) -> Self {
        Error::Network { endpoint: endpoint.into(), cause }
    }

    pub fn validation(field: impl Into<String>, violations: Vec<String>) -> Self {
        Error::Validation { field: field.into(), violations }
    }

    pub fn processing(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Processing { stage: stage.into(), message: message.into() }
    }

    pub fn context(msg: impl Into<String>) -> Self {
        Error::Context(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Classifies whether the controller's retry policy should retry this
    /// error (network, rate-limit, 5xx-style API errors, timeouts) or
    /// propagate it immediately (auth, validation, config, tool, context).
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::RateLimit { .. } | Error::Network { .. } | Error::Timeout(_) => true,
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// `retry_after` hint, if the provider supplied one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_config() {
        let err = Error::config("Invalid model");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "Invalid configuration: Invalid model");
    }

    #[test]
    fn test_error_api() {
        let err = Error::api("500 Internal Server Error");
        assert!(matches!(err, Error::Api(_)));
        assert_eq!(err.to_string(), "API error: 500 Internal Server Error");
    }

    #[test]
    fn test_error_stream() {
        let err = Error::stream("Connection lost");
        assert!(matches!(err, Error::Stream(_)));
        assert_eq!(err.to_string(), "Streaming error: Connection lost");
    }

    #[test]
    fn test_error_tool() {
        let err = Error::tool("Tool not found");
        assert!(matches!(err, Error::Tool(_)));
        assert_eq!(err.to_string(), "Tool execution error: Tool not found");
    }

    #[test]
    fn test_error_invalid_input() {
        let err = Error::invalid_input("Missing parameter");
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(err.to_string(), "Invalid input: Missing parameter");
    }

    #[test]
    fn test_error_timeout() {
        let err = Error::timeout(Duration::from_secs(30));
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_error_other() {
        let err = Error::other("Something went wrong");
        assert!(matches!(err, Error::Other(_)));
        assert_eq!(err.to_string(), "Error: Something went wrong");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn _returns_result() -> Result<i32> {
            Ok(42)
        }

        fn _returns_error() -> Result<i32> {
            Err(Error::timeout(Duration::from_secs(1)))
        }
    }

    #[test]
    fn rate_limit_and_network_and_timeout_are_recoverable() {
        assert!(Error::rate_limit("openai", None).is_recoverable());
        assert!(Error::network("https://api.openai.com", None).is_recoverable());
        assert!(Error::timeout(Duration::from_secs(1)).is_recoverable());
    }

    #[test]
    fn auth_validation_config_tool_context_are_not_recoverable() {
        assert!(!Error::authentication("openai").is_recoverable());
        assert!(!Error::validation("model", vec!["missing".into()]).is_recoverable());
        assert!(!Error::config("bad").is_recoverable());
        assert!(!Error::tool("bad").is_recoverable());
        assert!(!Error::context("too big").is_recoverable());
    }

    #[test]
    fn rate_limit_carries_retry_after_hint() {
        let err = Error::rate_limit("openai", Some(Duration::from_secs(2)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }
}
