// Worker command
//
// Decision: The worker and its callers share one process: the catalog is hosted on a
// durable worker and calls arrive as JSON lines on stdin, one result line each on stdout
// Decision: Durable execution is forced on; running a worker is an explicit request for it

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use toolforge_runtime::{
    ErrorKind, ExecutionRequest, ExecutionResult, LocalEngine, ToolDispatcher, ToolRegistry,
    ToolRuntime, ToolforgeConfig,
};
use tracing::{info, warn};

pub async fn run(config: &ToolforgeConfig, registry: Arc<ToolRegistry>) -> Result<ExitCode> {
    let mut config = config.clone();
    config.durable.enabled = true;
    config.durable.required = true;

    let runtime = ToolRuntime::start(&config, registry, &LocalEngine::new())
        .await
        .context("failed to start the durable worker")?;
    info!(
        task_queue = %config.durable.task_queue,
        "Worker running; reading calls from stdin, press Ctrl-C to stop"
    );

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let served = tokio::select! {
        served = serve(runtime.dispatcher(), stdin, &mut stdout) => served,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
            Ok(())
        }
    };

    runtime.shutdown().await?;
    served.map(|()| ExitCode::SUCCESS)
}

/// Answer one JSON request per input line until the input ends
async fn serve<R, W>(dispatcher: &ToolDispatcher, input: R, output: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("failed to read request")? {
        if line.trim().is_empty() {
            continue;
        }
        let result = handle_line(dispatcher, &line).await;
        let mut encoded = serde_json::to_vec(&result)?;
        encoded.push(b'\n');
        output.write_all(&encoded).await?;
        output.flush().await?;
    }
    Ok(())
}

async fn handle_line(dispatcher: &ToolDispatcher, line: &str) -> ExecutionResult {
    match serde_json::from_str::<ExecutionRequest>(line) {
        Ok(request) => dispatcher.call_tool(request).await,
        Err(err) => {
            warn!(error = %err, "Rejected malformed request");
            ExecutionResult::failure(ErrorKind::ValidationError, format!("invalid request: {err}"))
        }
    }
}
