// Direct execution backend
//
// Decision: Async handlers run as their own abort-on-drop task, so a deadline or a
// dropped call (caller cancellation) stops them at their next suspension point
// Decision: Blocking handlers run on spawn_blocking behind a semaphore; on deadline the
// caller returns immediately and the thread finishes on its own (result discarded)

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio_util::task::AbortOnDropHandle;
use toolforge_core::{Arguments, ExecutionResult, ToolArgs, ToolDescriptor, ToolHandler};
use tracing::{debug, warn};

use crate::error::InvokeError;

/// Runs tool callables in-process under the tool's timeout
#[derive(Debug, Clone)]
pub struct DirectBackend {
    blocking_slots: Arc<Semaphore>,
}

impl Default for DirectBackend {
    fn default() -> Self {
        Self::new(32)
    }
}

impl DirectBackend {
    pub fn new(max_blocking_workers: usize) -> Self {
        Self {
            blocking_slots: Arc::new(Semaphore::new(max_blocking_workers.max(1))),
        }
    }

    /// Blocking slots not currently in use
    pub fn available_blocking_slots(&self) -> usize {
        self.blocking_slots.available_permits()
    }

    /// Run the tool and wrap the outcome with `executed_via: "direct"` metadata
    pub async fn execute(&self, tool: &ToolDescriptor, arguments: Arguments) -> ExecutionResult {
        let result = match self.invoke(tool, arguments).await {
            Ok(value) => ExecutionResult::success(value),
            Err(err) => ExecutionResult::from(err),
        };
        result.with_metadata("executed_via", "direct")
    }

    /// Run the tool's callable with resolved arguments
    pub async fn invoke(
        &self,
        tool: &ToolDescriptor,
        arguments: Arguments,
    ) -> Result<Value, InvokeError> {
        let deadline = tool.timeout();
        let args = ToolArgs::new(arguments);
        debug!(
            tool_name = %tool.name(),
            blocking = tool.handler().is_blocking(),
            timeout_secs = deadline.as_secs_f64(),
            "Invoking tool"
        );

        let outcome = match tool.handler() {
            ToolHandler::Async(f) => {
                let mut task = AbortOnDropHandle::new(tokio::spawn(f(args)));
                match tokio::time::timeout(deadline, &mut task).await {
                    Ok(joined) => Some(flatten(joined)),
                    Err(_) => {
                        task.abort();
                        None
                    }
                }
            }
            ToolHandler::Blocking(f) => {
                let f = Arc::clone(f);
                let slots = Arc::clone(&self.blocking_slots);
                let run = async move {
                    let permit = slots
                        .acquire_owned()
                        .await
                        .map_err(|_| InvokeError::Cancelled)?;
                    let handle = tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        f(args)
                    });
                    flatten(handle.await)
                };
                // Dropping `run` on timeout detaches the blocking thread
                tokio::time::timeout(deadline, run).await.ok()
            }
        };

        outcome.unwrap_or_else(|| {
            warn!(
                tool_name = %tool.name(),
                timeout_secs = deadline.as_secs_f64(),
                "Tool execution timed out"
            );
            Err(InvokeError::Timeout {
                tool: tool.name().to_string(),
                timeout: deadline,
            })
        })
    }
}

fn flatten(joined: Result<anyhow::Result<Value>, JoinError>) -> Result<Value, InvokeError> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(InvokeError::failed(&err)),
        Err(err) => Err(join_error(err)),
    }
}

pub(crate) fn join_error(err: JoinError) -> InvokeError {
    if err.is_cancelled() {
        return InvokeError::Cancelled;
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    InvokeError::Panicked(message)
}
