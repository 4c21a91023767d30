//! Black-box tests for tool dispatch order-preservation and boundary cases.

use agent_core::{tool, ExecutionStrategy, SchemaDef, ToolCallError, ToolRegistry, ToolRequest};
use serde_json::json;
use std::time::Duration;

fn slow_echo_tool() -> agent_core::Tool {
    tool("echo", "echoes back its input after a delay keyed by 'delay_ms'")
        .schema(SchemaDef::Obj(vec![
            ("value".into(), SchemaDef::Str, true),
            ("delay_ms".into(), SchemaDef::Int, true),
        ]))
        .handler(|args: serde_json::Value| async move {
            let delay = args["delay_ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(json!({ "echoed": args["value"] }))
        })
}

fn requests_with_heterogeneous_latency() -> Vec<ToolRequest> {
    vec![
        ToolRequest { name: "echo".into(), arguments: json!({"value": "first", "delay_ms": 40}) },
        ToolRequest { name: "echo".into(), arguments: json!({"value": "second", "delay_ms": 5}) },
        ToolRequest { name: "echo".into(), arguments: json!({"value": "third", "delay_ms": 20}) },
    ]
}

#[tokio::test]
async fn sequential_preserves_request_order() {
    let registry = ToolRegistry::new().with_tool(slow_echo_tool());
    let results = registry.execute_all(&requests_with_heterogeneous_latency(), ExecutionStrategy::Sequential).await;
    let values: Vec<_> = results.into_iter().map(|r| r.unwrap()["echoed"].clone()).collect();
    assert_eq!(values, vec![json!("first"), json!("second"), json!("third")]);
}

#[tokio::test]
async fn parallel_preserves_request_order_despite_heterogeneous_latency() {
    let registry = ToolRegistry::new().with_tool(slow_echo_tool());
    let results = registry.execute_all(&requests_with_heterogeneous_latency(), ExecutionStrategy::Parallel).await;
    let values: Vec<_> = results.into_iter().map(|r| r.unwrap()["echoed"].clone()).collect();
    assert_eq!(values, vec![json!("first"), json!("second"), json!("third")]);
}

#[tokio::test]
async fn bounded_parallelism_preserves_request_order() {
    let registry = ToolRegistry::new().with_tool(slow_echo_tool());
    let results = registry
        .execute_all(&requests_with_heterogeneous_latency(), ExecutionStrategy::ParallelWithLimit(2))
        .await;
    let values: Vec<_> = results.into_iter().map(|r| r.unwrap()["echoed"].clone()).collect();
    assert_eq!(values, vec![json!("first"), json!("second"), json!("third")]);
}

#[tokio::test]
async fn unknown_function_name_is_reported_per_request_not_fatal_to_the_batch() {
    let registry = ToolRegistry::new().with_tool(slow_echo_tool());
    let requests = vec![
        ToolRequest { name: "echo".into(), arguments: json!({"value": "ok", "delay_ms": 0}) },
        ToolRequest { name: "not_a_real_tool".into(), arguments: json!({}) },
    ];
    let results = registry.execute_all(&requests, ExecutionStrategy::Sequential).await;
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(ToolCallError::UnknownFunction(_))));
}

#[tokio::test]
async fn null_arguments_is_reported_as_null_arguments_not_a_panic() {
    let registry = ToolRegistry::new().with_tool(slow_echo_tool());
    let req = ToolRequest { name: "echo".into(), arguments: serde_json::Value::Null };
    let result = registry.execute(&req).await;
    assert!(matches!(result, Err(ToolCallError::NullArguments)));
}
