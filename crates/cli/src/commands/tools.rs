// Tools command

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use toolforge_runtime::{LocalEngine, ToolRegistry, ToolRuntime, ToolView, ToolforgeConfig};

use crate::output::{print_table_header, print_table_row, OutputFormat};

pub async fn run(
    config: &ToolforgeConfig,
    registry: Arc<ToolRegistry>,
    output: OutputFormat,
    profile: Option<&str>,
) -> Result<ExitCode> {
    let runtime = ToolRuntime::start(config, registry, &LocalEngine::new()).await?;
    let tools = runtime.dispatcher().list_tools(profile);

    if output.is_text() {
        print_tools(&tools);
    } else {
        output.print_value(&json!({
            "data": tools,
            "total": tools.len(),
        }))?;
    }

    runtime.shutdown().await?;
    Ok(ExitCode::SUCCESS)
}

fn print_tools(tools: &[ToolView]) {
    if tools.is_empty() {
        println!("No tools found.");
        return;
    }

    print_table_header(&[("NAME", 12), ("MODE", 8), ("PARAMETERS", 24), ("DESCRIPTION", 40)]);
    for tool in tools {
        let mode = match &tool.durable {
            Some(info) if info.fire_and_forget => "async",
            Some(_) => "durable",
            None => "direct",
        };
        let params = tool.input_schema.property_names().join(", ");
        print_table_row(&[
            (tool.name.as_str(), 12),
            (mode, 8),
            (params.as_str(), 24),
            (tool.description.as_str(), 40),
        ]);
    }
}
