// Durable execution backend
//
// Decision: Every durable call is one "ToolWorkflow" execution running the tool as one activity
// Decision: Workflow ids are `toolforge-tool-{name}-{uuid-v4}` so concurrent calls never collide
// Decision: Handler failures are retryable; the engine's retry policy decides how often

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use toolforge_core::{
    Arguments, ErrorKind, ExecutionResult, ToolArgs, ToolDescriptor, ToolHandler, ToolRetryPolicy,
};
use toolforge_durable::{
    Activity, ActivityContext, ActivityError, RetryPolicy, WorkerRegistration, WorkflowClient,
    WorkflowContext, WorkflowDefinition, WorkflowError, WorkflowSubmission,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::direct::join_error;

/// Workflow type name registered with the engine
pub const TOOL_WORKFLOW: &str = "ToolWorkflow";

/// Build a fresh execution id for one call of `tool_name`
pub fn workflow_id(tool_name: &str) -> String {
    format!("toolforge-tool-{}-{}", tool_name, Uuid::new_v4())
}

/// Translate a tool's retry settings into the engine's policy
pub fn engine_retry_policy(policy: &ToolRetryPolicy) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(policy.max_attempts)
        .with_initial_interval(policy.initial_interval)
        .with_max_interval(policy.max_interval)
}

/// Input of one [`ToolWorkflow`] execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolWorkflowInput {
    pub tool_name: String,
    pub arguments: Arguments,
    pub timeout_seconds: f64,
    pub retry_policy: ToolRetryPolicy,
}

impl ToolWorkflowInput {
    pub fn new(tool: &ToolDescriptor, arguments: Arguments) -> Self {
        Self {
            tool_name: tool.name().to_string(),
            arguments,
            timeout_seconds: tool.timeout().as_secs_f64(),
            retry_policy: *tool.retry_policy(),
        }
    }

    fn timeout(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.timeout_seconds)
            .ok()
            .filter(|t| !t.is_zero())
    }
}

// ============================================================================
// Workflow and activities hosted by the worker
// ============================================================================

/// Runs one tool call as a retryable activity
#[derive(Debug, Default)]
pub struct ToolWorkflow;

#[async_trait]
impl WorkflowDefinition for ToolWorkflow {
    fn name(&self) -> &str {
        TOOL_WORKFLOW
    }

    async fn run(&self, ctx: &WorkflowContext, input: Value) -> Result<Value, WorkflowError> {
        let input: ToolWorkflowInput = serde_json::from_value(input)?;

        let mut options = ctx
            .default_activity_options()
            .with_retry(engine_retry_policy(&input.retry_policy));
        if let Some(timeout) = input.timeout() {
            options = options.with_timeout(timeout);
        }

        ctx.execute_activity(&input.tool_name, Value::Object(input.arguments), options)
            .await
    }
}

/// Wraps a registered tool as an engine activity named after the tool
#[derive(Debug, Clone)]
pub struct ToolActivity {
    tool: Arc<ToolDescriptor>,
}

impl ToolActivity {
    pub fn new(tool: Arc<ToolDescriptor>) -> Self {
        Self { tool }
    }

    async fn call(&self, arguments: Arguments) -> Result<Value, ActivityError> {
        let args = ToolArgs::new(arguments);
        let outcome = match self.tool.handler() {
            ToolHandler::Async(f) => f(args).await,
            ToolHandler::Blocking(f) => {
                let f = Arc::clone(f);
                tokio::task::spawn_blocking(move || f(args))
                    .await
                    .map_err(|e| ActivityError::retryable(join_error(e).to_string()))?
            }
        };
        outcome.map_err(|err| ActivityError::from(err).with_type("ToolError"))
    }
}

#[async_trait]
impl Activity for ToolActivity {
    fn name(&self) -> &str {
        self.tool.name()
    }

    async fn execute(&self, ctx: ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let arguments = match input {
            Value::Object(map) => map,
            Value::Null => Arguments::new(),
            other => {
                return Err(ActivityError::non_retryable(format!(
                    "tool arguments must be an object, got {other}"
                )))
            }
        };

        debug!(
            tool_name = %self.tool.name(),
            attempt = ctx.attempt,
            max_attempts = ctx.max_attempts,
            "Executing tool activity"
        );

        tokio::select! {
            _ = ctx.cancelled() => Err(ActivityError::non_retryable("tool activity was cancelled")),
            result = self.call(arguments) => result,
        }
    }
}

/// Everything a worker hosts for the given tools on `task_queue`
pub fn tool_registration(
    tools: &[Arc<ToolDescriptor>],
    task_queue: impl Into<String>,
) -> WorkerRegistration {
    let activities = tools
        .iter()
        .map(|tool| Arc::new(ToolActivity::new(Arc::clone(tool))) as Arc<dyn Activity>);

    WorkerRegistration::new(task_queue)
        .with_workflow(Arc::new(ToolWorkflow))
        .with_activities(activities)
}

// ============================================================================
// Client side
// ============================================================================

/// Submits tool calls to the workflow engine
#[derive(Clone)]
pub struct DurableBackend {
    client: Arc<dyn WorkflowClient>,
    task_queue: String,
}

impl std::fmt::Debug for DurableBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableBackend")
            .field("task_queue", &self.task_queue)
            .finish_non_exhaustive()
    }
}

impl DurableBackend {
    pub fn new(client: Arc<dyn WorkflowClient>, task_queue: impl Into<String>) -> Self {
        Self {
            client,
            task_queue: task_queue.into(),
        }
    }

    pub fn client(&self) -> &Arc<dyn WorkflowClient> {
        &self.client
    }

    pub fn task_queue(&self) -> &str {
        &self.task_queue
    }

    fn submission(
        &self,
        tool: &ToolDescriptor,
        arguments: Arguments,
    ) -> Result<WorkflowSubmission, WorkflowError> {
        let input = serde_json::to_value(ToolWorkflowInput::new(tool, arguments))?;
        Ok(WorkflowSubmission::new(
            TOOL_WORKFLOW,
            workflow_id(tool.name()),
            self.task_queue.clone(),
            input,
        )
        .with_activity_timeout(tool.timeout())
        .with_retry_policy(engine_retry_policy(tool.retry_policy())))
    }

    /// Run the tool through the engine.
    ///
    /// Fire-and-forget tools return as soon as the engine accepts the
    /// execution; the others wait for the result or for `cancel`.
    #[instrument(skip_all, fields(tool_name = %tool.name(), fire_and_forget = tool.fire_and_forget()))]
    pub async fn execute(
        &self,
        tool: &ToolDescriptor,
        arguments: Arguments,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let submission = match self.submission(tool, arguments) {
            Ok(submission) => submission,
            Err(err) => return ExecutionResult::failure(ErrorKind::ExecutionError, err.to_string()),
        };
        let workflow_id = submission.workflow_id.clone();

        if tool.fire_and_forget() {
            return match self.client.start_workflow(submission).await {
                Ok(handle) => {
                    info!(workflow_id = %handle.workflow_id, "Started fire-and-forget execution");
                    ExecutionResult::success(json!({ "workflow_id": handle.workflow_id.clone() }))
                        .with_metadata("executed_via", "durable")
                        .with_metadata("fire_and_forget", true)
                        .with_metadata("workflow_id", handle.workflow_id)
                }
                Err(err) => {
                    warn!(workflow_id = %workflow_id, error = %err, "Failed to start execution");
                    failure_for(tool, err)
                        .with_metadata("executed_via", "durable")
                        .with_metadata("fire_and_forget", true)
                        .with_metadata("workflow_id", workflow_id)
                }
            };
        }

        debug!(workflow_id = %workflow_id, "Submitting durable execution");
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(workflow_id = %workflow_id, "Durable execution cancelled by caller");
                return ExecutionResult::failure(
                    ErrorKind::ExecutionError,
                    "durable execution cancelled by caller",
                )
                .with_metadata("executed_via", "durable")
                .with_metadata("workflow_id", workflow_id);
            }
            outcome = self.client.execute_workflow(submission) => outcome,
        };

        match outcome {
            Ok(outcome) => ExecutionResult::success(outcome.result)
                .with_metadata("executed_via", "durable")
                .with_metadata("workflow_type", TOOL_WORKFLOW)
                .with_metadata("workflow_id", outcome.workflow_id)
                .with_metadata("attempts", outcome.attempts),
            Err(err) => {
                warn!(workflow_id = %workflow_id, error = %err, "Durable execution failed");
                failure_for(tool, err)
                    .with_metadata("executed_via", "durable")
                    .with_metadata("workflow_type", TOOL_WORKFLOW)
                    .with_metadata("workflow_id", workflow_id)
            }
        }
    }
}

fn failure_for(tool: &ToolDescriptor, err: WorkflowError) -> ExecutionResult {
    match err {
        WorkflowError::TimedOut { attempts, .. } => ExecutionResult::failure(
            ErrorKind::Timeout,
            format!(
                "Tool '{}' timed out after {}s ({attempts} attempt(s))",
                tool.name(),
                tool.timeout().as_secs_f64()
            ),
        )
        .with_metadata("attempts", attempts),
        WorkflowError::ActivityFailed {
            message, attempts, ..
        } => ExecutionResult::failure(ErrorKind::ExecutionError, message)
            .with_metadata("attempts", attempts),
        other => ExecutionResult::failure(ErrorKind::ExecutionError, other.to_string()),
    }
}
