//! Black-box tests for the semantic response cache via the public API.

use agent_core::{CacheLookup, CacheMissReason, Clock, Completion, CompletionOptions, Conversation, EmbeddingClient, Message, Result, RuntimeConfig, SemanticCache, SystemClock};
use std::collections::HashMap;

struct ScriptedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

#[async_trait::async_trait]
impl EmbeddingClient for ScriptedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectors.get(text).cloned().unwrap_or_else(|| vec![0.0, 0.0]))
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

#[tokio::test]
async fn paraphrased_question_hits_above_similarity_threshold() {
    let config = RuntimeConfig { cache_similarity_threshold: 0.9, ..RuntimeConfig::default() };
    let cache = SemanticCache::new(&config);
    let clock = SystemClock;
    let embedder = ScriptedEmbedder {
        vectors: [
            ("system: assist\nuser: What is the capital of France?".to_string(), vec![1.0, 0.0, 0.0]),
            ("system: assist\nuser: what's the capital of France?".to_string(), vec![0.99, 0.01, 0.0]),
        ]
        .into_iter()
        .collect(),
    };

    let opts = CompletionOptions { temperature: Some(0.0), ..Default::default() };
    cache
        .insert(&conv_with("What is the capital of France?"), &opts, completion("Paris"), &embedder, &clock)
        .await
        .unwrap();

    let lookup = cache.lookup(&conv_with("what's the capital of France?"), &opts, &embedder, &clock).await.unwrap();
    match lookup {
        CacheLookup::Hit(c) => assert_eq!(c.content.as_deref(), Some("Paris")),
        CacheLookup::Miss(reason) => panic!("expected hit, got miss: {reason:?}"),
    }
}

#[tokio::test]
async fn dissimilar_question_with_same_options_misses() {
    let config = RuntimeConfig { cache_similarity_threshold: 0.9, ..RuntimeConfig::default() };
    let cache = SemanticCache::new(&config);
    let clock = SystemClock;
    let embedder = ScriptedEmbedder {
        vectors: [
            ("system: assist\nuser: What is the capital of France?".to_string(), vec![1.0, 0.0]),
            ("system: assist\nuser: How do I bake bread?".to_string(), vec![0.0, 1.0]),
        ]
        .into_iter()
        .collect(),
    };

    let opts = CompletionOptions::default();
    cache
        .insert(&conv_with("What is the capital of France?"), &opts, completion("Paris"), &embedder, &clock)
        .await
        .unwrap();

    let lookup = cache.lookup(&conv_with("How do I bake bread?"), &opts, &embedder, &clock).await.unwrap();
    assert!(matches!(lookup, CacheLookup::Miss(CacheMissReason::LowSimilarity)));
}

#[tokio::test]
async fn max_entries_one_keeps_first_key_and_rejects_the_second() {
    let config = RuntimeConfig { cache_max_entries: 1, ..RuntimeConfig::default() };
    let cache = SemanticCache::new(&config);
    let clock = SystemClock;
    let embedder = ScriptedEmbedder {
        vectors: [
            ("system: assist\nuser: question one".to_string(), vec![1.0, 0.0]),
            ("system: assist\nuser: question two".to_string(), vec![0.0, 1.0]),
        ]
        .into_iter()
        .collect(),
    };

    let opts = CompletionOptions::default();
    let first_ok = cache.insert(&conv_with("question one"), &opts, completion("a1"), &embedder, &clock).await.unwrap();
    let second_ok = cache.insert(&conv_with("question two"), &opts, completion("a2"), &embedder, &clock).await.unwrap();

    assert!(first_ok);
    assert!(!second_ok);
    assert_eq!(cache.len().await, 1);

    let first_lookup = cache.lookup(&conv_with("question one"), &opts, &embedder, &clock).await.unwrap();
    assert!(matches!(first_lookup, CacheLookup::Hit(_)));
}
