//! Workflow trait and the context workflows run against

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::WorkflowError;
use crate::reliability::RetryPolicy;

/// Options for one scheduled activity
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityOptions {
    /// Maximum time for a single attempt (from start to completion)
    pub start_to_close_timeout: Duration,

    /// Retry policy across attempts
    pub retry_policy: RetryPolicy,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close_timeout: Duration::from_secs(300),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl ActivityOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.start_to_close_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// Successful activity result with the number of attempts it took
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityCompletion {
    pub output: Value,
    pub attempts: u32,
}

/// Engine-side activity execution, as seen from a running workflow
#[async_trait]
pub trait ActivityScheduler: Send + Sync {
    async fn schedule(
        &self,
        workflow_id: &str,
        activity: &str,
        input: Value,
        options: ActivityOptions,
    ) -> Result<ActivityCompletion, WorkflowError>;
}

/// Per-execution handle passed to [`WorkflowDefinition::run`]
pub struct WorkflowContext {
    workflow_id: String,
    defaults: ActivityOptions,
    scheduler: Arc<dyn ActivityScheduler>,
    last_attempts: AtomicU32,
}

impl WorkflowContext {
    pub fn new(
        workflow_id: impl Into<String>,
        defaults: ActivityOptions,
        scheduler: Arc<dyn ActivityScheduler>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            defaults,
            scheduler,
            last_attempts: AtomicU32::new(0),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Options taken from the submission (timeout + retry policy)
    pub fn default_activity_options(&self) -> ActivityOptions {
        self.defaults.clone()
    }

    /// Run an activity to completion, retrying per `options`
    pub async fn execute_activity(
        &self,
        activity: &str,
        input: Value,
        options: ActivityOptions,
    ) -> Result<Value, WorkflowError> {
        let outcome = self
            .scheduler
            .schedule(&self.workflow_id, activity, input, options)
            .await;

        let attempts = match &outcome {
            Ok(completion) => completion.attempts,
            Err(WorkflowError::ActivityFailed { attempts, .. })
            | Err(WorkflowError::TimedOut { attempts, .. }) => *attempts,
            Err(_) => 0,
        };
        self.last_attempts.store(attempts, Ordering::Relaxed);

        outcome.map(|completion| completion.output)
    }

    /// Attempts used by the most recent activity
    pub fn last_attempts(&self) -> u32 {
        self.last_attempts.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("workflow_id", &self.workflow_id)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

/// A workflow: orchestration logic that schedules activities
///
/// # Example
///
/// ```ignore
/// struct Greeting;
///
/// #[async_trait]
/// impl WorkflowDefinition for Greeting {
///     fn name(&self) -> &str {
///         "greeting"
///     }
///
///     async fn run(&self, ctx: &WorkflowContext, input: Value) -> Result<Value, WorkflowError> {
///         let options = ctx.default_activity_options();
///         ctx.execute_activity("compose_greeting", input, options).await
///     }
/// }
/// ```
#[async_trait]
pub trait WorkflowDefinition: Send + Sync + 'static {
    /// Name submissions refer to
    fn name(&self) -> &str;

    async fn run(&self, ctx: &WorkflowContext, input: Value) -> Result<Value, WorkflowError>;
}
