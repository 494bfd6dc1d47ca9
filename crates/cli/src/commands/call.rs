// Call command

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use toolforge_core::Arguments;
use toolforge_runtime::{
    ExecutionRequest, ExecutionResult, LocalEngine, ToolRegistry, ToolRuntime, ToolforgeConfig,
};

use crate::output::{print_field, OutputFormat};

pub async fn run(
    config: &ToolforgeConfig,
    registry: Arc<ToolRegistry>,
    output: OutputFormat,
    tool: &str,
    args: &str,
    context: Option<&str>,
) -> Result<ExitCode> {
    let mut request = ExecutionRequest::new(tool).with_arguments(parse_object("--args", args)?);
    if let Some(context) = context {
        request = request.with_context(parse_object("--context", context)?);
    }

    let runtime = ToolRuntime::start(config, registry, &LocalEngine::new()).await?;
    let result = runtime.dispatcher().call_tool(request).await;
    runtime.shutdown().await?;

    if output.is_text() {
        print_result(&result)?;
    } else {
        output.print_value(&result)?;
    }

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Parse a flag value that must be a JSON object
fn parse_object(flag: &str, raw: &str) -> Result<Arguments> {
    let value: Value =
        serde_json::from_str(raw).with_context(|| format!("{flag} is not valid JSON"))?;
    match value {
        Value::Object(map) => Ok(map),
        other => bail!("{flag} must be a JSON object, got {other}"),
    }
}

fn print_result(result: &ExecutionResult) -> Result<()> {
    if result.success {
        match &result.result {
            Value::String(text) => println!("{text}"),
            other => println!("{}", serde_json::to_string_pretty(other)?),
        }
    } else {
        let kind = result.error_kind.map(|k| k.as_str()).unwrap_or("unknown");
        print_field("Error", result.error.as_deref().unwrap_or_default());
        print_field("Type", kind);
    }

    if let Some(workflow_id) = result.metadata_value("workflow_id").and_then(Value::as_str) {
        print_field("Workflow", workflow_id);
    }
    Ok(())
}
