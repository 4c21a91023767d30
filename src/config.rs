//! Provider configuration and table-driven environment settings.
//!
//! `Provider` and the base-url/model helpers generalize the pattern used
//! across local-inference SDKs: environment variables take priority over
//! caller-supplied defaults. `RuntimeConfig` extends that pattern to the
//! context pipeline, tool dispatch, and response cache knobs enumerated in
//! the configuration table.

use crate::context::Headroom;
use crate::error::{Error, Result};
use crate::tools::ExecutionStrategy;
use std::time::Duration;

/// Supported LLM providers, used to resolve default base URLs and to pick
/// the API-key environment variable a given `LLM_MODEL` needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Anthropic,
    Azure,
    Ollama,
    OpenRouter,
    Gemini,
}

impl Provider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::Anthropic => "https://api.anthropic.com/v1",
            Provider::Azure => "https://YOUR-RESOURCE.openai.azure.com",
            Provider::Ollama => "http://localhost:11434/v1",
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }

    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Azure => "AZURE_OPENAI_API_KEY",
            Provider::Ollama => "OLLAMA_API_KEY",
            Provider::OpenRouter => "OPENROUTER_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
        }
    }
}

/// Parses an `<provider>/<model>` string from `LLM_MODEL` into a provider
/// and bare model name.
pub fn parse_llm_model(spec: &str) -> Result<(Provider, String)> {
    let (prefix, model) = spec
        .split_once('/')
        .ok_or_else(|| Error::config(format!("LLM_MODEL '{spec}' must be '<provider>/<model>'")))?;

    let provider = match prefix {
        "openai" => Provider::OpenAI,
        "anthropic" => Provider::Anthropic,
        "azure" => Provider::Azure,
        "ollama" => Provider::Ollama,
        "openrouter" => Provider::OpenRouter,
        "gemini" => Provider::Gemini,
        other => return Err(Error::config(format!("unknown provider '{other}'"))),
    };

    Ok((provider, model.to_string()))
}

/// Base URL for a provider: environment variable override, then the
/// provider default, then the caller's fallback.
pub fn get_base_url(provider: Provider, env_var: &str, fallback: Option<&str>) -> String {
    std::env::var(env_var)
        .ok()
        .or_else(|| fallback.map(str::to_string))
        .unwrap_or_else(|| provider.default_base_url().to_string())
}

fn env_flag(name: &str, default: bool) -> Result<bool> {
    match std::env::var(name) {
        Ok(v) => match v.to_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => Err(Error::config(format!("{name} must be true/false, got '{other}'"))),
        },
        Err(_) => Ok(default),
    }
}

fn env_usize(name: &str, default: usize) -> Result<usize> {
    match std::env::var(name) {
        Ok(v) => v.parse().map_err(|_| Error::config(format!("{name} must be an integer, got '{v}'"))),
        Err(_) => Ok(default),
    }
}

fn env_f64(name: &str, default: f64) -> Result<f64> {
    match std::env::var(name) {
        Ok(v) => v.parse().map_err(|_| Error::config(format!("{name} must be a number, got '{v}'"))),
        Err(_) => Ok(default),
    }
}

/// Ambient runtime knobs read from the environment, per the configuration
/// table: context headroom/compression flags, tool execution strategy and
/// timeout, and response-cache similarity/TTL/capacity.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub headroom: Headroom,
    pub enable_deterministic_compression: bool,
    pub enable_llm_compression: bool,
    pub summary_token_target: usize,
    pub tool_execution_strategy: ExecutionStrategy,
    pub tool_default_timeout: Duration,
    pub context_llm_timeout: Duration,
    pub cache_similarity_threshold: f64,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self> {
        let headroom_percent = env_f64("CONTEXT_HEADROOM_PERCENT", 8.0)?;
        if !(0.0..=50.0).contains(&headroom_percent) {
            return Err(Error::config("CONTEXT_HEADROOM_PERCENT must be within [0,50]"));
        }
        let headroom = Headroom::from_fraction(headroom_percent / 100.0);

        let strategy = match std::env::var("TOOL_EXECUTION_STRATEGY").ok().as_deref() {
            None => ExecutionStrategy::Sequential,
            Some("sequential") => ExecutionStrategy::Sequential,
            Some("parallel") => ExecutionStrategy::Parallel,
            Some(other) => {
                if let Some(n) = other.strip_prefix("parallel_limit:") {
                    let n: usize = n.parse().map_err(|_| {
                        Error::config(format!("invalid TOOL_EXECUTION_STRATEGY '{other}'"))
                    })?;
                    ExecutionStrategy::ParallelWithLimit(n)
                } else {
                    return Err(Error::config(format!("invalid TOOL_EXECUTION_STRATEGY '{other}'")));
                }
            }
        };

        let similarity = env_f64("CACHE_SIMILARITY_THRESHOLD", 0.9)?;
        if !(0.0..=1.0).contains(&similarity) {
            return Err(Error::config("CACHE_SIMILARITY_THRESHOLD must be within [0,1]"));
        }
        let ttl_ms = env_usize("CACHE_TTL_MS", 300_000)?;
        if ttl_ms == 0 {
            return Err(Error::config("CACHE_TTL_MS must be > 0"));
        }
        let max_entries = env_usize("CACHE_MAX_ENTRIES", 1000)?;
        if max_entries == 0 {
            return Err(Error::config("CACHE_MAX_ENTRIES must be > 0"));
        }

        Ok(Self {
            headroom,
            enable_deterministic_compression: env_flag("CONTEXT_ENABLE_DETERMINISTIC_COMPRESSION", true)?,
            enable_llm_compression: env_flag("CONTEXT_ENABLE_LLM_COMPRESSION", false)?,
            summary_token_target: env_usize("CONTEXT_SUMMARY_TOKEN_TARGET", 400)?,
            tool_execution_strategy: strategy,
            tool_default_timeout: Duration::from_millis(env_usize("TOOL_DEFAULT_TIMEOUT_MS", 30_000)? as u64),
            context_llm_timeout: Duration::from_millis(env_usize("CONTEXT_LLM_TIMEOUT_MS", 15_000)? as u64),
            cache_similarity_threshold: similarity,
            cache_ttl: Duration::from_millis(ttl_ms as u64),
            cache_max_entries: max_entries,
        })
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            headroom: Headroom::Standard,
            enable_deterministic_compression: true,
            enable_llm_compression: false,
            summary_token_target: 400,
            tool_execution_strategy: ExecutionStrategy::Sequential,
            tool_default_timeout: Duration::from_millis(30_000),
            context_llm_timeout: Duration::from_millis(15_000),
            cache_similarity_threshold: 0.9,
            cache_ttl: Duration::from_millis(300_000),
            cache_max_entries: 1000,
        }
    }
}
