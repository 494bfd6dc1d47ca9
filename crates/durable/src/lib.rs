//! # Durable Execution Engine
//!
//! Workflow client abstractions and an in-process engine for reliable task execution.
//!
//! ## Features
//!
//! - **Narrow engine interface**: [`WorkflowConnector`], [`WorkflowClient`] and
//!   [`WorkerHost`] are all a caller needs; a networked engine can implement them
//! - **Automatic retries**: Configurable retry policies with exponential backoff
//! - **Per-attempt timeouts**: Start-to-close deadlines on every activity attempt
//! - **Bounded execution**: Activity concurrency limited per worker
//! - **Graceful shutdown**: Workers drain in-flight executions up to a deadline
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 WorkflowClient (LocalEngine)                 │
//! │  (accepts submissions, tracks execution status)             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  per task queue
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkerPool                              │
//! │  (dequeues workflows, drains on shutdown)                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   WorkflowExecutor                           │
//! │  (runs workflows, retries activities with backoff)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use toolforge_durable::prelude::*;
//!
//! let engine = LocalEngine::new();
//! let client = engine.connect(ConnectOptions::new("local", "default")).await?;
//!
//! let registration = WorkerRegistration::new("orders")
//!     .with_workflow(Arc::new(ProcessOrder))
//!     .with_activity(Arc::new(ChargeCard));
//! tokio::spawn(async move { client.run_worker(registration, shutdown).await });
//!
//! let submission = WorkflowSubmission::new("process_order", "order-42", "orders", input);
//! let outcome = client.execute_workflow(submission).await?;
//! ```

pub mod activity;
pub mod client;
pub mod engine;
pub mod reliability;
pub mod workflow;

mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::activity::{Activity, ActivityContext, ActivityError, FnActivity};
    pub use crate::client::{
        ConnectError, ConnectOptions, TlsOptions, TransportSecurity, WorkerError, WorkerHost,
        WorkerRegistration, WorkflowClient, WorkflowConnector,
    };
    pub use crate::engine::LocalEngine;
    pub use crate::reliability::RetryPolicy;
    pub use crate::workflow::{
        ActivityOptions, WorkflowContext, WorkflowDefinition, WorkflowDescription, WorkflowError,
        WorkflowHandle, WorkflowOutcome, WorkflowStatus, WorkflowSubmission,
    };
}

// Re-export key types at crate root
pub use activity::{Activity, ActivityContext, ActivityError, FnActivity};
pub use client::{
    ConnectError, ConnectOptions, TlsOptions, TransportSecurity, WorkerError, WorkerHost,
    WorkerRegistration, WorkflowClient, WorkflowConnector, AUTHORIZATION_HEADER,
    NAMESPACE_HEADER,
};
pub use engine::{LocalEngine, DEFAULT_MAX_RETAINED_EXECUTIONS};
pub use reliability::RetryPolicy;
pub use tokio_util::sync::CancellationToken;
pub use workflow::{
    ActivityCompletion, ActivityOptions, ActivityScheduler, WorkflowContext, WorkflowDefinition,
    WorkflowDescription, WorkflowError, WorkflowHandle, WorkflowOutcome, WorkflowStatus,
    WorkflowSubmission,
};
