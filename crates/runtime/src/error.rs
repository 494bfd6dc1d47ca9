// Error types for runtime startup and tool invocation

use std::time::Duration;

use thiserror::Error;
use toolforge_core::{ErrorKind, ExecutionResult};
use toolforge_durable::ConnectError;

use crate::config::ConfigError;

/// Errors that prevent the runtime from starting
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Only raised when durable mode is required
    #[error("durable execution is required but the engine is unavailable: {0}")]
    EngineUnavailable(#[from] ConnectError),

    #[error("failed to start worker: {0}")]
    Worker(String),
}

/// Why one invocation of a tool callable did not produce a value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    #[error("Tool '{tool}' timed out after {}s", .timeout.as_secs_f64())]
    Timeout { tool: String, timeout: Duration },

    #[error("{0}")]
    Failed(String),

    #[error("tool panicked: {0}")]
    Panicked(String),

    #[error("execution was cancelled")]
    Cancelled,
}

impl InvokeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InvokeError::Timeout { .. } => ErrorKind::Timeout,
            InvokeError::Failed(_) | InvokeError::Panicked(_) | InvokeError::Cancelled => {
                ErrorKind::ExecutionError
            }
        }
    }

    /// Render an `anyhow` chain the way tool authors expect to see it
    pub fn failed(err: &anyhow::Error) -> Self {
        InvokeError::Failed(format!("{err:#}"))
    }
}

impl From<InvokeError> for ExecutionResult {
    fn from(err: InvokeError) -> Self {
        ExecutionResult::failure(err.kind(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = InvokeError::Timeout {
            tool: "slow".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(err.to_string(), "Tool 'slow' timed out after 1s");
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_failed_keeps_context_chain() {
        let err = anyhow::anyhow!("boom").context("while adding");
        let invoke = InvokeError::failed(&err);
        assert_eq!(invoke.to_string(), "while adding: boom");

        let result = ExecutionResult::from(invoke);
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ExecutionError));
    }
}
