//! Workflow abstractions and types
//!
//! - [`WorkflowDefinition`] trait for orchestration logic
//! - [`WorkflowContext`] for scheduling activities from a running workflow
//! - [`WorkflowSubmission`] / [`WorkflowDescription`] for the client side

mod definition;
mod execution;

pub use definition::{
    ActivityCompletion, ActivityOptions, ActivityScheduler, WorkflowContext, WorkflowDefinition,
};
pub use execution::{
    WorkflowDescription, WorkflowError, WorkflowHandle, WorkflowOutcome, WorkflowStatus,
    WorkflowSubmission,
};
