//! End-to-end tests for direct-mode dispatch
//!
//! Run with: cargo test -p toolforge-runtime --test direct_dispatch_test

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::bail;
use serde_json::{json, Value};
use toolforge_core::{InjectMarker, ToolDescriptor};
use toolforge_runtime::{
    ErrorKind, ExecutionRequest, LocalEngine, ToolRegistry, ToolRuntime, ToolforgeConfig,
};

fn registry() -> Arc<ToolRegistry> {
    let registry = Arc::new(ToolRegistry::new());

    registry
        .register(
            ToolDescriptor::builder("add")
                .doc("Add two integers.\n\nReturns their sum.")
                .param::<i64>("x")
                .param::<i64>("y")
                .returns::<i64>()
                .async_handler(|args| async move {
                    Ok(args.required::<i64>("x")? + args.required::<i64>("y")?)
                })
                .build()
                .unwrap(),
        )
        .unwrap();

    registry
        .register(
            ToolDescriptor::builder("explode")
                .blocking_handler(|_args| -> anyhow::Result<Value> { bail!("boom") })
                .build()
                .unwrap(),
        )
        .unwrap();

    registry
        .register(
            ToolDescriptor::builder("greet")
                .param::<String>("greeting")
                .inject::<String>("user_id", InjectMarker::key("user_id"))
                .blocking_handler(|args| {
                    let greeting: String = args.required("greeting")?;
                    let user: String = args.required("user_id")?;
                    Ok(format!("{greeting}, {user}"))
                })
                .build()
                .unwrap(),
        )
        .unwrap();

    registry
        .register(
            ToolDescriptor::builder("nap_async")
                .timeout(Duration::from_secs(1))
                .async_handler(|_args| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok("rested")
                })
                .build()
                .unwrap(),
        )
        .unwrap();

    registry
        .register(
            ToolDescriptor::builder("nap_blocking")
                .timeout(Duration::from_secs(1))
                .blocking_handler(|_args| {
                    std::thread::sleep(Duration::from_secs(10));
                    Ok("rested")
                })
                .build()
                .unwrap(),
        )
        .unwrap();

    registry
}

async fn runtime() -> ToolRuntime {
    ToolRuntime::start(&ToolforgeConfig::default(), registry(), &LocalEngine::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_add_returns_sum() {
    let runtime = runtime().await;
    let result = runtime
        .dispatcher()
        .call_tool(ExecutionRequest::new("add").arg("x", 5).arg("y", 3))
        .await;

    assert!(result.success);
    assert_eq!(result.result, json!(8));
    assert_eq!(result.error, None);
    assert_eq!(result.metadata_value("executed_via"), Some(&json!("direct")));
}

#[tokio::test]
async fn test_unknown_tool() {
    let runtime = runtime().await;
    let result = runtime
        .dispatcher()
        .call_tool(ExecutionRequest::new("ghost"))
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::ToolNotFound));
    assert_eq!(result.error.as_deref(), Some("Tool 'ghost' not found"));

    let wire = serde_json::to_value(&result).unwrap();
    assert_eq!(wire["error_type"], json!("tool_not_found"));
}

#[tokio::test]
async fn test_handler_error_is_execution_error() {
    let runtime = runtime().await;
    let result = runtime
        .dispatcher()
        .call_tool(ExecutionRequest::new("explode"))
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::ExecutionError));
    assert!(result.error.unwrap().contains("boom"));
}

#[tokio::test]
async fn test_missing_required_context() {
    let runtime = runtime().await;

    for request in [
        ExecutionRequest::new("greet").arg("greeting", "hi"),
        ExecutionRequest::new("greet")
            .arg("greeting", "hi")
            .with_context(Default::default()),
        ExecutionRequest::new("greet")
            .arg("greeting", "hi")
            .context_value("user_id", Value::Null),
    ] {
        let result = runtime.dispatcher().call_tool(request).await;
        assert_eq!(result.error_kind, Some(ErrorKind::MissingContext));
        assert!(result.error.unwrap().contains("user_id"));
    }
}

#[tokio::test]
async fn test_context_type_mismatch() {
    let runtime = runtime().await;
    let result = runtime
        .dispatcher()
        .call_tool(
            ExecutionRequest::new("greet")
                .arg("greeting", "hi")
                .context_value("user_id", 42),
        )
        .await;

    assert_eq!(result.error_kind, Some(ErrorKind::ValidationError));
    let message = result.error.unwrap();
    assert!(message.contains("string"));
    assert!(message.contains("integer"));
}

#[tokio::test]
async fn test_injected_value_reaches_handler() {
    let runtime = runtime().await;
    let result = runtime
        .dispatcher()
        .call_tool(
            ExecutionRequest::new("greet")
                .arg("greeting", "hello")
                .context_value("user_id", "ada"),
        )
        .await;

    assert!(result.success);
    assert_eq!(result.result, json!("hello, ada"));
}

#[tokio::test]
async fn test_timeouts_return_promptly() {
    let runtime = runtime().await;

    for tool in ["nap_async", "nap_blocking"] {
        let started = Instant::now();
        let result = runtime
            .dispatcher()
            .call_tool(ExecutionRequest::new(tool))
            .await;

        assert!(started.elapsed() < Duration::from_secs(5), "{tool} overran");
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout), "{tool}");
        assert!(result.error.unwrap().contains("timed out"));
    }
}

#[tokio::test]
async fn test_listing_in_direct_mode() {
    let runtime = runtime().await;
    let tools = runtime.dispatcher().list_tools(None);
    assert_eq!(tools.len(), 5);

    let add = tools.iter().find(|t| t.name == "add").unwrap();
    assert_eq!(add.description, "Add two integers.");
    assert!(add.durable.is_none());

    let value = serde_json::to_value(add).unwrap();
    assert_eq!(
        value["input_schema"],
        json!({
            "type": "object",
            "properties": {"x": {"type": "integer"}, "y": {"type": "integer"}},
            "required": ["x", "y"]
        })
    );
    assert_eq!(value["output_schema"], json!({"type": "integer"}));

    let greet = tools.iter().find(|t| t.name == "greet").unwrap();
    assert_eq!(greet.input_schema.property_names(), vec!["greeting"]);
    assert_eq!(greet.injections[0].context_key, "user_id");
    assert!(greet.injections[0].required);

    runtime.shutdown().await.unwrap();
}
