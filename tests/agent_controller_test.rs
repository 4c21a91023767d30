//! Black-box tests for the agent controller step loop via the public API.

use agent_core::{
    extract_path, tool, Agent, AgentStatus, Completion, Error, Message, MockProviderClient,
    RuntimeConfig, SchemaDef, Tool, ToolRegistry, ToolRequest,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn text_completion(text: &str) -> Completion {
    Completion {
        id: "1".into(),
        created: 0,
        model: "mock".into(),
        content: Some(text.into()),
        message: Message::assistant_text(text),
        tool_calls: Vec::new(),
        usage: None,
        thinking: None,
    }
}

fn weather_tool() -> Tool {
    tool("get_weather", "looks up the weather for a location")
        .schema(SchemaDef::Obj(vec![("location".into(), SchemaDef::Str, true)]))
        .handler(|args: serde_json::Value| async move {
            let location = extract_path(&args, "location", &SchemaDef::Str).map_err(|e| format!("{e:?}"))?;
            Ok(json!({ "location": location, "forecast": "sunny" }))
        })
}

#[tokio::test]
async fn scenario_tool_round_trip_completes_after_one_tool_call() {
    let mock = Arc::new(MockProviderClient::new());
    mock.push_completion(Completion {
        id: "1".into(),
        created: 0,
        model: "mock".into(),
        content: None,
        message: Message::assistant_tool_calls(
            None,
            vec![agent_core::ToolCall { id: "call_1".into(), name: "get_weather".into(), arguments: json!({"location": "Paris"}) }],
        ),
        tool_calls: vec![agent_core::ToolCall { id: "call_1".into(), name: "get_weather".into(), arguments: json!({"location": "Paris"}) }],
        usage: None,
        thinking: None,
    });
    mock.push_completion(text_completion("It's sunny in Paris."));

    let tools = Arc::new(ToolRegistry::new().with_tool(weather_tool()));
    let agent = Agent::new(mock, "gpt-4o", RuntimeConfig::default());
    let state = agent.run("What's the weather in Paris?", tools, None, None, None).await.unwrap();

    assert_eq!(state.status, AgentStatus::Complete);
    let tool_answer = state.conversation.messages().iter().find_map(|m| match m {
        Message::Tool { content, .. } => Some(content.clone()),
        _ => None,
    });
    assert!(tool_answer.unwrap().contains("sunny"));
}

#[tokio::test]
async fn scenario_missing_required_parameter_yields_structured_error_not_a_panic() {
    let mock = Arc::new(MockProviderClient::new());
    mock.push_completion(Completion {
        id: "1".into(),
        created: 0,
        model: "mock".into(),
        content: None,
        message: Message::assistant_tool_calls(
            None,
            vec![agent_core::ToolCall { id: "call_1".into(), name: "get_weather".into(), arguments: json!({}) }],
        ),
        tool_calls: vec![agent_core::ToolCall { id: "call_1".into(), name: "get_weather".into(), arguments: json!({}) }],
        usage: None,
        thinking: None,
    });
    mock.push_completion(text_completion("I need a location to check the weather."));

    let tools = Arc::new(ToolRegistry::new().with_tool(weather_tool()));
    let agent = Agent::new(mock, "gpt-4o", RuntimeConfig::default());
    let state = agent.run("What's the weather?", tools, None, None, None).await.unwrap();

    assert_eq!(state.status, AgentStatus::Complete);
    let tool_answer = state.conversation.messages().iter().find_map(|m| match m {
        Message::Tool { content, .. } => Some(content.clone()),
        _ => None,
    });
    let tool_answer = tool_answer.unwrap();
    assert!(tool_answer.contains("isError"));
    assert!(tool_answer.contains("location"));
}

#[tokio::test]
async fn scenario_rate_limit_retries_at_least_three_times_over_at_least_two_seconds() {
    let mock = Arc::new(MockProviderClient::new());
    mock.push_error(Error::rate_limit("openai", None));
    mock.push_error(Error::rate_limit("openai", None));
    mock.push_completion(text_completion("recovered after retries"));

    let retry_policy = agent_core::retry::RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(900),
        max_backoff: Duration::from_secs(4),
        jitter_fraction: 0.0,
    };

    let agent = Agent::new(mock, "gpt-4o", RuntimeConfig::default()).with_retry_policy(retry_policy);
    let tools = Arc::new(ToolRegistry::new());

    let started = Instant::now();
    let state = agent.run("hello", tools, None, None, None).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(state.status, AgentStatus::Complete);
    assert!(elapsed >= Duration::from_secs(2), "expected backoff to accumulate at least 2s, got {elapsed:?}");
}

#[tokio::test]
async fn non_recoverable_provider_error_fails_the_run_without_propagating_err() {
    let mock = Arc::new(MockProviderClient::new());
    mock.push_error(Error::authentication("openai"));

    let agent = Agent::new(mock, "gpt-4o", RuntimeConfig::default());
    let tools = Arc::new(ToolRegistry::new());

    let state = agent.run("hello", tools, None, None, None).await.unwrap();
    match state.status {
        AgentStatus::Failed(ref reason) => assert!(reason.contains("auth") || !reason.is_empty()),
        other => panic!("expected Failed status, got {other:?}"),
    }
}

#[tokio::test]
async fn retries_exhausted_fails_the_run_without_propagating_err() {
    let mock = Arc::new(MockProviderClient::new());
    mock.push_error(Error::rate_limit("openai", None));
    mock.push_error(Error::rate_limit("openai", None));
    mock.push_error(Error::rate_limit("openai", None));

    let retry_policy = agent_core::retry::RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        jitter_fraction: 0.0,
    };

    let agent = Agent::new(mock, "gpt-4o", RuntimeConfig::default()).with_retry_policy(retry_policy);
    let tools = Arc::new(ToolRegistry::new());

    let state = agent.run("hello", tools, None, None, None).await.unwrap();
    assert!(matches!(state.status, AgentStatus::Failed(_)));
}

#[tokio::test]
async fn max_steps_zero_fails_before_any_provider_call() {
    let mock = Arc::new(MockProviderClient::new());
    let agent = Agent::new(mock, "gpt-4o", RuntimeConfig::default());
    let tools = Arc::new(ToolRegistry::new());
    let state = agent.run("hello", tools, Some(0), None, None).await.unwrap();
    assert_eq!(state.status, AgentStatus::Failed("step limit reached".into()));
}
