//! Workflow submission, handle and status types

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reliability::RetryPolicy;

/// Everything the engine needs to start one workflow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSubmission {
    /// Registered workflow name
    pub workflow_name: String,

    /// Caller-chosen unique execution id
    pub workflow_id: String,

    /// Queue the execution is dispatched on
    pub task_queue: String,

    /// Serialized workflow input
    pub input: Value,

    /// Start-to-close timeout applied to each activity attempt
    #[serde(with = "duration_millis")]
    pub activity_timeout: Duration,

    /// Retry policy applied to activities the workflow schedules
    pub retry_policy: RetryPolicy,
}

impl WorkflowSubmission {
    pub fn new(
        workflow_name: impl Into<String>,
        workflow_id: impl Into<String>,
        task_queue: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            workflow_id: workflow_id.into(),
            task_queue: task_queue.into(),
            input,
            activity_timeout: Duration::from_secs(300),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_activity_timeout(mut self, timeout: Duration) -> Self {
        self.activity_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// Reference to a started execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowHandle {
    pub workflow_id: String,
    pub workflow_name: String,
    pub task_queue: String,
}

/// Result of a completed execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub workflow_id: String,
    pub result: Value,
    /// Attempts used by the last activity the workflow ran
    pub attempts: u32,
}

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Accepted, waiting for a worker
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

/// Point-in-time view of an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDescription {
    pub workflow_id: String,
    pub workflow_name: String,
    pub task_queue: String,
    pub status: WorkflowStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Errors from workflow client operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkflowError {
    #[error("workflow '{0}' is already started")]
    AlreadyStarted(String),

    #[error("workflow '{0}' not found")]
    NotFound(String),

    #[error("no workflow registered under '{0}'")]
    UnknownWorkflow(String),

    #[error("no activity registered under '{0}'")]
    UnknownActivity(String),

    #[error("activity '{activity}' failed after {attempts} attempt(s): {message}")]
    ActivityFailed {
        activity: String,
        message: String,
        attempts: u32,
    },

    #[error("activity '{activity}' timed out after {attempts} attempt(s)")]
    TimedOut { activity: String, attempts: u32 },

    #[error("workflow execution was cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        WorkflowError::Serialization(err.to_string())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
