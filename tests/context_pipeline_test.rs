//! Black-box tests for the context-window compression pipeline, driven
//! entirely through the crate's public API.

use agent_core::{Conversation, InMemoryPayloadStore, Message, RuntimeConfig, Step, ToolCall};

#[tokio::test]
async fn conversation_already_within_budget_is_returned_unchanged() {
    let mut conv = Conversation::new();
    conv.push(Message::system("assist"));
    conv.push(Message::user("hello"));

    let store = InMemoryPayloadStore::new();
    let config = RuntimeConfig::default();
    let result = agent_core::manage_context(&conv, 10_000, &config, "gpt-4o", None, &store)
        .await
        .unwrap();

    assert!(!result.was_trimmed);
    assert_eq!(result.conversation.messages(), conv.messages());
}

#[tokio::test]
async fn pinned_history_summary_survives_aggressive_trimming() {
    let mut conv = Conversation::new();
    conv.push(Message::system("[HISTORY_SUMMARY] the user previously asked about rust ownership"));
    for i in 0..30 {
        conv.push(Message::user(format!("follow-up question number {i} with extra padding words here")));
    }

    let store = InMemoryPayloadStore::new();
    let config = RuntimeConfig::default();
    let result = agent_core::manage_context(&conv, 60, &config, "gpt-4o", None, &store)
        .await
        .unwrap();

    assert!(result.conversation.messages().iter().any(Message::is_history_summary));
    assert!(result.steps_applied.contains(&Step::FinalTokenTrim));
}

#[tokio::test]
async fn leading_system_prompt_survives_history_compression_pushed_out_of_the_window() {
    let mut conv = Conversation::new();
    conv.push(Message::system("you are a helpful assistant"));
    for i in 0..30 {
        conv.push(Message::user(format!("follow-up question number {i} with extra padding words here")));
    }

    let store = InMemoryPayloadStore::new();
    let config = RuntimeConfig::default();
    // Loose enough that FinalTokenTrim never runs, isolating the claim to
    // HistoryCompression's own handling of the system message.
    let result = agent_core::manage_context(&conv, 400, &config, "gpt-4o", None, &store)
        .await
        .unwrap();

    assert!(result.steps_applied.contains(&Step::HistoryCompression));
    assert!(!result.steps_applied.contains(&Step::FinalTokenTrim));
    assert!(result
        .conversation
        .messages()
        .iter()
        .any(|m| matches!(m, Message::System { content } if content == "you are a helpful assistant")));
}

#[tokio::test]
async fn oversized_tool_output_is_compacted_before_other_steps_run() {
    let mut conv = Conversation::new();
    conv.push(Message::system("assist"));
    let call = ToolCall { id: "c1".into(), name: "dump".into(), arguments: serde_json::json!({}) };
    conv.push(Message::assistant_tool_calls(None, vec![call]));
    conv.push(Message::tool("c1", "word ".repeat(5_000)));

    let store = InMemoryPayloadStore::new();
    let config = RuntimeConfig::default();
    let result = agent_core::manage_context(&conv, 2_000, &config, "gpt-4o", None, &store)
        .await
        .unwrap();

    assert!(result.steps_applied.contains(&Step::ToolDeterministicCompaction));
    assert!(result.compression_ratio() < 1.0);
}
