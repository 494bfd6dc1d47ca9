//! Workflow executor
//!
//! The `WorkflowExecutor` is responsible for:
//! - Running one dequeued workflow to completion and recording its outcome
//! - Executing scheduled activities under a bounded pool with retries
//!   and per-attempt start-to-close timeouts
//!
//! Stopping the poll loop does not touch running activities. They only see
//! cancellation once [`WorkflowExecutor::abort_in_flight`] fires, which the
//! worker pool does when its drain deadline passes.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::local::{EngineState, QueuedWorkflow};
use super::registry::QueueRegistry;
use crate::activity::ActivityContext;
use crate::workflow::{
    ActivityCompletion, ActivityOptions, ActivityScheduler, WorkflowContext, WorkflowError,
    WorkflowOutcome,
};

pub(crate) struct WorkflowExecutor {
    state: Arc<EngineState>,
    registry: Arc<QueueRegistry>,
    activity_slots: Arc<Semaphore>,
    abort: CancellationToken,
}

/// Marks the execution cancelled if the task is dropped before it finishes
struct ExecutionGuard {
    state: Arc<EngineState>,
    workflow_id: String,
    armed: bool,
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        if self.armed {
            self.state.mark_abandoned(&self.workflow_id);
        }
    }
}

impl WorkflowExecutor {
    pub fn new(
        state: Arc<EngineState>,
        registry: Arc<QueueRegistry>,
        max_concurrent_activities: usize,
    ) -> Self {
        Self {
            state,
            registry,
            activity_slots: Arc::new(Semaphore::new(max_concurrent_activities.max(1))),
            abort: CancellationToken::new(),
        }
    }

    /// Cancel every running activity and pending retry
    pub fn abort_in_flight(&self) {
        self.abort.cancel();
    }

    /// Run a dequeued workflow and deliver its outcome
    #[instrument(skip_all, fields(workflow_id = %job.submission.workflow_id))]
    pub async fn run(self: Arc<Self>, job: QueuedWorkflow) {
        let QueuedWorkflow { submission, reply } = job;
        let workflow_id = submission.workflow_id.clone();
        let mut guard = ExecutionGuard {
            state: Arc::clone(&self.state),
            workflow_id: workflow_id.clone(),
            armed: true,
        };

        self.state.mark_running(&workflow_id);
        debug!(workflow_name = %submission.workflow_name, "Workflow started");

        let (result, attempts) = match self.registry.workflow(&submission.workflow_name) {
            None => (
                Err(WorkflowError::UnknownWorkflow(submission.workflow_name.clone())),
                0,
            ),
            Some(definition) => {
                let defaults = ActivityOptions {
                    start_to_close_timeout: submission.activity_timeout,
                    retry_policy: submission.retry_policy.clone(),
                };
                let scheduler: Arc<dyn ActivityScheduler> = self.clone();
                let ctx = WorkflowContext::new(workflow_id.clone(), defaults, scheduler);

                let result = definition.run(&ctx, submission.input).await;
                let attempts = ctx.last_attempts();
                let result = result.map(|output| WorkflowOutcome {
                    workflow_id: workflow_id.clone(),
                    result: output,
                    attempts,
                });
                (result, attempts)
            }
        };

        match &result {
            Ok(_) => info!(attempts, "Workflow completed"),
            Err(e) => warn!(attempts, error = %e, "Workflow failed"),
        }

        self.state.finish(&workflow_id, &result, attempts);
        guard.armed = false;

        if let Some(reply) = reply {
            // Submitter may have stopped waiting
            let _ = reply.send(result);
        }
    }
}

#[async_trait]
impl ActivityScheduler for WorkflowExecutor {
    #[instrument(skip(self, input, options), fields(max_attempts = options.retry_policy.max_attempts))]
    async fn schedule(
        &self,
        workflow_id: &str,
        activity: &str,
        input: Value,
        options: ActivityOptions,
    ) -> Result<ActivityCompletion, WorkflowError> {
        let handler = self
            .registry
            .activity(activity)
            .ok_or_else(|| WorkflowError::UnknownActivity(activity.to_string()))?;
        let policy = &options.retry_policy;
        let max_attempts = policy.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            let permit = Arc::clone(&self.activity_slots)
                .acquire_owned()
                .await
                .map_err(|_| WorkflowError::Cancelled)?;

            let ctx = ActivityContext::new(workflow_id, activity, attempt, max_attempts)
                .with_cancellation(self.abort.child_token());
            let outcome = tokio::time::timeout(
                options.start_to_close_timeout,
                handler.execute(ctx, input.clone()),
            )
            .await;
            drop(permit);

            let delay = match outcome {
                Ok(Ok(output)) => {
                    return Ok(ActivityCompletion {
                        output,
                        attempts: attempt,
                    });
                }
                Ok(Err(error)) => {
                    let delay = policy
                        .next_delay(attempt)
                        .filter(|_| policy.retries_error(&error));
                    let Some(delay) = delay else {
                        return Err(WorkflowError::ActivityFailed {
                            activity: activity.to_string(),
                            message: error.message,
                            attempts: attempt,
                        });
                    };
                    warn!(attempt, error = %error, "Activity attempt failed, retrying");
                    delay
                }
                Err(_) => {
                    let Some(delay) = policy.next_delay(attempt) else {
                        return Err(WorkflowError::TimedOut {
                            activity: activity.to_string(),
                            attempts: attempt,
                        });
                    };
                    warn!(
                        attempt,
                        timeout_ms = options.start_to_close_timeout.as_millis() as u64,
                        "Activity attempt timed out, retrying"
                    );
                    delay
                }
            };

            attempt += 1;
            tokio::select! {
                _ = self.abort.cancelled() => return Err(WorkflowError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
