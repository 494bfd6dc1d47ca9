//! Activity execution context

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Context provided to an activity for one execution attempt
///
/// The context provides:
/// - Information about the current execution attempt
/// - Cancellation detection (worker shutdown)
///
/// # Example
///
/// ```ignore
/// async fn execute(&self, ctx: ActivityContext, input: Value) -> Result<Value, ActivityError> {
///     tokio::select! {
///         result = do_work(input) => result,
///         _ = ctx.cancelled() => Err(ActivityError::non_retryable("cancelled")),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ActivityContext {
    /// Unique execution attempt ID
    pub attempt_id: Uuid,

    /// Current attempt number (1-based)
    pub attempt: u32,

    /// Maximum attempts allowed
    pub max_attempts: u32,

    /// Workflow execution that scheduled this activity
    pub workflow_id: String,

    /// Registered activity name
    pub activity: String,

    cancel: CancellationToken,
}

impl ActivityContext {
    pub fn new(
        workflow_id: impl Into<String>,
        activity: impl Into<String>,
        attempt: u32,
        max_attempts: u32,
    ) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            attempt,
            max_attempts,
            workflow_id: workflow_id.into(),
            activity: activity.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Tie this context to a cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Check if this is the final attempt
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when cancellation is requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}
