//! # Semantic Response Cache
//!
//! Caches completions keyed by the semantic content of a conversation's
//! System/User turns, so paraphrased repeats of the same question can
//! reuse a prior answer without a round trip to the provider.
//!
//! ## Security Rule
//!
//! The cache key is built **only** from `System`/`User` message text.
//! Assistant content and tool outputs are never hashed or embedded here —
//! they can carry private data (tool results, prior model output derived
//! from user documents) and including them would both leak that data into
//! the embedding call and cause spurious cache misses on every turn.

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::message::{Conversation, Message};
use crate::provider::{Completion, CompletionOptions};
use crate::trace::CacheMissReason;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;

/// Caller-supplied embedding client, the cache's counterpart to
/// [`crate::provider::ProviderClient`] at the trait boundary.
#[async_trait::async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Injectable clock, so TTL expiry can be tested without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Test clock whose `now()` is set explicitly and never advances on its own.
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    pub fn new(now: SystemTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub async fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().await;
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        // try_lock is safe here: ManualClock is only driven by single-threaded tests.
        *self.now.try_lock().expect("ManualClock accessed concurrently")
    }
}

/// Outcome of a cache lookup.
pub enum CacheLookup {
    Hit(Completion),
    Miss(CacheMissReason),
}

struct CacheEntry {
    embedding: Vec<f32>,
    options_hash: u64,
    completion: Completion,
    inserted_at: SystemTime,
}

/// Concatenates `"{role}: {content}"` lines from only `System` and `User`
/// messages, in order. See the module-level security rule: this is the
/// one place in the crate that must never be handed Assistant or Tool
/// content.
pub fn cache_key_text(conv: &Conversation) -> String {
    conv.messages()
        .iter()
        .filter(|m| matches!(m, Message::System { .. } | Message::User { .. }))
        .map(|m| format!("{}: {}", m.role_tag(), m.text()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Stable hash over the non-default fields of `opts`, via a canonical
/// JSON serialization that already omits `None` fields
/// (`CompletionOptions` derives `Serialize` with
/// `skip_serializing_if = "Option::is_none"` throughout).
pub fn options_hash(opts: &CompletionOptions) -> u64 {
    let canonical = serde_json::to_string(opts).expect("CompletionOptions always serializes");
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    hasher.finish()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Semantic cache over completions, keyed by embedding similarity plus an
/// exact `options_hash` match. One internal map guarded by a single
/// `tokio::sync::Mutex`, matching the crate's general preference for
/// `tokio::sync` primitives in async-reachable code.
pub struct SemanticCache {
    entries: Mutex<HashMap<u64, CacheEntry>>,
    similarity_threshold: f64,
    ttl: Duration,
    max_entries: usize,
}

impl SemanticCache {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            similarity_threshold: config.cache_similarity_threshold,
            ttl: config.cache_ttl,
            max_entries: config.cache_max_entries,
        }
    }

    /// Looks up a cached completion for `conv`/`opts`. A hit requires both
    /// an exact `options_hash` match and cosine similarity at or above the
    /// configured threshold, checked against entries that have not expired
    /// per `clock.now()` (TTL is evaluated at lookup time, not insertion).
    pub async fn lookup(
        &self,
        conv: &Conversation,
        opts: &CompletionOptions,
        embedder: &dyn EmbeddingClient,
        clock: &dyn Clock,
    ) -> Result<CacheLookup> {
        let key_text = cache_key_text(conv);
        let query_embedding = embedder.embed(&key_text).await?;
        let hash = options_hash(opts);
        let now = clock.now();

        let entries = self.entries.lock().await;
        let mut best: Option<(f64, &CacheEntry)> = None;

        for entry in entries.values() {
            if entry.options_hash != hash {
                continue;
            }
            if now.duration_since(entry.inserted_at).unwrap_or_default() > self.ttl {
                continue;
            }
            let similarity = cosine_similarity(&query_embedding, &entry.embedding);
            if similarity >= self.similarity_threshold {
                match &best {
                    Some((best_sim, _)) if *best_sim >= similarity => {}
                    _ => best = Some((similarity, entry)),
                }
            }
        }

        if let Some((_, entry)) = best {
            return Ok(CacheLookup::Hit(entry.completion.clone()));
        }

        // Distinguish "no entry with this options_hash at all" from "some
        // entry matched hash/similarity but had expired" for observability.
        let reason = if entries.values().any(|e| e.options_hash == hash) {
            let any_unexpired = entries
                .values()
                .any(|e| e.options_hash == hash && now.duration_since(e.inserted_at).unwrap_or_default() <= self.ttl);
            if any_unexpired { CacheMissReason::LowSimilarity } else { CacheMissReason::TtlExpired }
        } else {
            CacheMissReason::OptionsMismatch
        };
        Ok(CacheLookup::Miss(reason))
    }

    /// Inserts `completion` under `conv`/`opts`'s key. When the cache is
    /// full and this is not an update to an existing key, the insert is
    /// rejected (reject-new, not LRU eviction) and `false` is returned so
    /// the caller can trace a `CacheMiss { reason: CapacityReject }`.
    pub async fn insert(
        &self,
        conv: &Conversation,
        opts: &CompletionOptions,
        completion: Completion,
        embedder: &dyn EmbeddingClient,
        clock: &dyn Clock,
    ) -> Result<bool> {
        let key_text = cache_key_text(conv);
        let embedding = embedder.embed(&key_text).await?;
        let hash = options_hash(opts);
        let mut hasher = DefaultHasher::new();
        key_text.hash(&mut hasher);
        hash.hash(&mut hasher);
        let storage_key = hasher.finish();

        let mut entries = self.entries.lock().await;
        if entries.len() >= self.max_entries && !entries.contains_key(&storage_key) {
            log::debug!("cache at capacity ({}), rejecting new entry", self.max_entries);
            return Ok(false);
        }

        entries.insert(
            storage_key,
            CacheEntry { embedding, options_hash: hash, completion, inserted_at: clock.now() },
        );
        Ok(true)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    struct FixedEmbedder {
        vectors: std::collections::HashMap<String, Vec<f32>>,
        default: Vec<f32>,
    }

    #[async_trait::async_trait]
    impl EmbeddingClient for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(self.vectors.get(text).cloned().unwrap_or_else(|| self.default.clone()))
        }
    }

    fn completion(text: &str) -> Completion {
        Completion {
            id: "1".into(),
            created: 0,
            model: "test".into(),
            content: Some(text.into()),
            message: Message::assistant_text(text),
            tool_calls: Vec::new(),
            usage: None,
            thinking: None,
        }
    }

    fn conv_with(text: &str) -> Conversation {
        Conversation::from_messages(vec![Message::system("assist"), Message::user(text)])
    }

    #[test]
    fn cache_key_text_excludes_assistant_and_tool_messages() {
        let mut conv = Conversation::new();
        conv.push(Message::system("assist"));
        conv.push(Message::user("what's the weather"));
        conv.push(Message::assistant_text("secret reasoning"));
        conv.push(Message::tool("c1", "private tool output"));
        let key = cache_key_text(&conv);
        assert!(key.contains("weather"));
        assert!(!key.contains("secret"));
        assert!(!key.contains("private"));
    }

    #[test]
    fn options_hash_ignores_default_fields_but_differs_on_set_fields() {
        let a = CompletionOptions::default();
        let b = CompletionOptions { temperature: Some(0.0), ..Default::default() };
        assert_ne!(options_hash(&a), options_hash(&b));
        assert_eq!(options_hash(&a), options_hash(&CompletionOptions::default()));
    }

    #[tokio::test]
    async fn paraphrase_above_threshold_hits_with_matching_options() {
        let config = RuntimeConfig { cache_similarity_threshold: 0.9, ..RuntimeConfig::default() };
        let cache = SemanticCache::new(&config);
        let clock = SystemClock;
        let embedder = FixedEmbedder {
            vectors: HashMap::new(),
            default: vec![1.0, 0.0, 0.0],
        };

        let opts = CompletionOptions { temperature: Some(0.0), ..Default::default() };
        let conv1 = conv_with("What is the capital of France?");
        cache.insert(&conv1, &opts, completion("Paris"), &embedder, &clock).await.unwrap();

        let conv2 = conv_with("what's the capital of France?");
        let lookup = cache.lookup(&conv2, &opts, &embedder, &clock).await.unwrap();
        assert!(matches!(lookup, CacheLookup::Hit(_)));
    }

    #[tokio::test]
    async fn mismatched_options_hash_misses_even_with_identical_embedding() {
        let config = RuntimeConfig::default();
        let cache = SemanticCache::new(&config);
        let clock = SystemClock;
        let embedder = FixedEmbedder { vectors: HashMap::new(), default: vec![1.0, 0.0] };

        let conv = conv_with("hello");
        let opts_a = CompletionOptions { temperature: Some(0.0), ..Default::default() };
        let opts_b = CompletionOptions { temperature: Some(1.0), ..Default::default() };
        cache.insert(&conv, &opts_a, completion("hi"), &embedder, &clock).await.unwrap();

        let lookup = cache.lookup(&conv, &opts_b, &embedder, &clock).await.unwrap();
        assert!(matches!(lookup, CacheLookup::Miss(CacheMissReason::OptionsMismatch)));
    }

    #[tokio::test]
    async fn entry_past_ttl_is_a_miss() {
        let config = RuntimeConfig { cache_ttl: Duration::from_millis(10), ..RuntimeConfig::default() };
        let cache = SemanticCache::new(&config);
        let clock = ManualClock::new(SystemTime::UNIX_EPOCH);
        let embedder = FixedEmbedder { vectors: HashMap::new(), default: vec![1.0, 0.0] };

        let conv = conv_with("hello");
        let opts = CompletionOptions::default();
        cache.insert(&conv, &opts, completion("hi"), &embedder, &clock).await.unwrap();

        clock.advance(Duration::from_millis(50)).await;
        let lookup = cache.lookup(&conv, &opts, &embedder, &clock).await.unwrap();
        assert!(matches!(lookup, CacheLookup::Miss(CacheMissReason::TtlExpired)));
    }

    #[tokio::test]
    async fn full_cache_rejects_new_key_rather_than_evicting() {
        let config = RuntimeConfig { cache_max_entries: 1, ..RuntimeConfig::default() };
        let cache = SemanticCache::new(&config);
        let clock = SystemClock;
        let embedder = FixedEmbedder {
            vectors: [("system: assist\nuser: first".to_string(), vec![1.0, 0.0]), ("system: assist\nuser: second".to_string(), vec![0.0, 1.0])]
                .into_iter()
                .collect(),
            default: vec![0.5, 0.5],
        };

        let opts = CompletionOptions::default();
        let ok1 = cache.insert(&conv_with("first"), &opts, completion("a"), &embedder, &clock).await.unwrap();
        assert!(ok1);
        assert_eq!(cache.len().await, 1);

        let ok2 = cache.insert(&conv_with("second"), &opts, completion("b"), &embedder, &clock).await.unwrap();
        assert!(!ok2);
        assert_eq!(cache.len().await, 1);
    }
}
