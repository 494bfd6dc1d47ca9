// Toolforge Runtime - Tool Execution
//
// Decision: The dispatcher owns backend selection; callers only see ExecutionResult
// Decision: Direct mode needs nothing but a registry; durable mode needs a WorkflowConnector
// Decision: Configuration, telemetry and worker lifecycle live here so binaries stay thin

pub mod config;
pub mod direct;
pub mod dispatcher;
pub mod durable;
pub mod error;
pub mod telemetry;
pub mod worker;

pub use config::{
    ConfigError, DurableConfig, DurableMode, ExecutionConfig, ServerConfig, ToolDefaults,
    ToolforgeConfig,
};
pub use direct::DirectBackend;
pub use dispatcher::{DurableToolInfo, ToolDispatcher, ToolRuntime, ToolView};
pub use durable::{
    tool_registration, workflow_id, DurableBackend, ToolActivity, ToolWorkflow,
    ToolWorkflowInput, TOOL_WORKFLOW,
};
pub use error::{InvokeError, StartupError};
pub use telemetry::{init_telemetry, LogFormat, TelemetryConfig};
pub use worker::ToolWorker;

// Re-export the contracts callers need alongside the runtime
pub use toolforge_core::{
    ErrorKind, ExecutionRequest, ExecutionResult, ToolDescriptor, ToolRegistry,
};
pub use toolforge_durable::{CancellationToken, LocalEngine, WorkflowConnector};
