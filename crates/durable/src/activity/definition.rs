//! Activities and their failure type

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ActivityContext;

/// Failure of one activity attempt.
///
/// `retryable` and `error_type` are matched against the scheduling
/// [`RetryPolicy`](crate::RetryPolicy) before another attempt is made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ActivityError {
    pub message: String,
    pub error_type: Option<String>,
    pub retryable: bool,
}

impl ActivityError {
    fn new(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable,
        }
    }

    /// Transient failure; the policy may schedule another attempt
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(message, true)
    }

    /// Permanent failure; the activity fails on this attempt
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self::new(message, false)
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }
}

/// Handler errors are treated as transient, keeping the full context chain
impl From<anyhow::Error> for ActivityError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(format!("{err:#}"))
    }
}

/// A unit of work a workflow schedules and the engine may retry
///
/// Activities take and return JSON so a worker can host any number of them
/// behind one registry.
///
/// # Example
///
/// ```ignore
/// struct FetchQuote;
///
/// #[async_trait]
/// impl Activity for FetchQuote {
///     fn name(&self) -> &str {
///         "fetch_quote"
///     }
///
///     async fn execute(&self, ctx: ActivityContext, input: Value) -> Result<Value, ActivityError> {
///         let symbol = input["symbol"]
///             .as_str()
///             .ok_or_else(|| ActivityError::non_retryable("symbol is required"))?;
///         let price = quotes::latest(symbol).await?;
///         Ok(json!({"symbol": symbol, "price": price, "attempt": ctx.attempt}))
///     }
/// }
/// ```
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    /// Name the activity is registered and scheduled under
    fn name(&self) -> &str;

    /// Execute one attempt
    ///
    /// Return `ActivityError::retryable()` for transient failures and
    /// `ActivityError::non_retryable()` for permanent ones.
    async fn execute(&self, ctx: ActivityContext, input: Value) -> Result<Value, ActivityError>;
}

type ActivityFn =
    dyn Fn(ActivityContext, Value) -> BoxFuture<'static, Result<Value, ActivityError>> + Send + Sync;

/// Activity backed by a closure
pub struct FnActivity {
    name: String,
    f: Arc<ActivityFn>,
}

impl FnActivity {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ActivityContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActivityError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            f: Arc::new(move |ctx, input| Box::pin(f(ctx, input))),
        }
    }
}

impl std::fmt::Debug for FnActivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnActivity").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Activity for FnActivity {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: ActivityContext, input: Value) -> Result<Value, ActivityError> {
        (self.f)(ctx, input).await
    }
}
