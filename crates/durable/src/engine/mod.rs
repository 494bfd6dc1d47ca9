//! Workflow execution engine
//!
//! [`LocalEngine`] runs workflows in-process: submissions are queued per task
//! queue, a worker pool dequeues them, and the executor drives each workflow
//! and its activities with retry and timeout handling.

mod executor;
mod local;
mod registry;

pub use local::{LocalEngine, DEFAULT_MAX_RETAINED_EXECUTIONS};
pub(crate) use executor::WorkflowExecutor;
pub(crate) use local::QueuedWorkflow;

#[cfg(test)]
pub(crate) use local::EngineState;
#[cfg(test)]
pub(crate) use registry::QueueRegistry;
