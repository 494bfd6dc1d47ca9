//! Worker pool for workflow execution
//!
//! Polls one task queue, runs each dequeued workflow as its own task, and on
//! shutdown drains in-flight executions up to a deadline. Executions still
//! running at the deadline are aborted.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::client::{WorkerError, WorkerRegistration};
use crate::engine::{QueuedWorkflow, WorkflowExecutor};

/// Worker pool configuration
#[derive(Debug, Clone)]
pub(crate) struct WorkerPoolConfig {
    pub task_queue: String,
    pub max_concurrent_activities: usize,
    /// Graceful shutdown timeout
    pub shutdown_grace: Duration,
}

impl From<&WorkerRegistration> for WorkerPoolConfig {
    fn from(registration: &WorkerRegistration) -> Self {
        Self {
            task_queue: registration.task_queue.clone(),
            max_concurrent_activities: registration.max_concurrent_activities,
            shutdown_grace: registration.shutdown_grace,
        }
    }
}

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerPoolStatus {
    /// Created, not yet polling
    Starting,
    /// Polling and accepting work
    Running,
    /// Completing current executions, not accepting new ones
    Draining,
    Stopped,
}

pub(crate) struct WorkerPool {
    config: WorkerPoolConfig,
    executor: Arc<WorkflowExecutor>,
    tracker: TaskTracker,
    status: RwLock<WorkerPoolStatus>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, executor: Arc<WorkflowExecutor>) -> Self {
        Self {
            config,
            executor,
            tracker: TaskTracker::new(),
            status: RwLock::new(WorkerPoolStatus::Starting),
        }
    }

    pub fn status(&self) -> WorkerPoolStatus {
        *self.status.read()
    }

    /// Poll until `shutdown` fires, then drain
    pub async fn run(
        &self,
        receiver: &mut mpsc::UnboundedReceiver<QueuedWorkflow>,
        shutdown: CancellationToken,
    ) -> Result<(), WorkerError> {
        if self.status() != WorkerPoolStatus::Starting {
            return Err(WorkerError::Failed("worker pool has already run".into()));
        }
        info!(
            task_queue = %self.config.task_queue,
            max_concurrent_activities = self.config.max_concurrent_activities,
            "Starting worker pool"
        );
        *self.status.write() = WorkerPoolStatus::Running;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Poll loop: shutdown requested");
                    break;
                }
                job = receiver.recv() => match job {
                    Some(job) => {
                        self.tracker.spawn(Arc::clone(&self.executor).run(job));
                    }
                    None => {
                        debug!("Poll loop: queue closed");
                        break;
                    }
                },
            }
        }

        self.shutdown().await
    }

    async fn shutdown(&self) -> Result<(), WorkerError> {
        info!(
            task_queue = %self.config.task_queue,
            in_flight = self.tracker.len(),
            "Initiating graceful shutdown"
        );
        *self.status.write() = WorkerPoolStatus::Draining;
        self.tracker.close();

        if tokio::time::timeout(self.config.shutdown_grace, self.tracker.wait())
            .await
            .is_err()
        {
            let in_flight = self.tracker.len();
            warn!(remaining_tasks = in_flight, "Shutdown timeout reached, aborting in-flight work");
            self.executor.abort_in_flight();
            return Err(WorkerError::ShutdownTimeout { in_flight });
        }

        *self.status.write() = WorkerPoolStatus::Stopped;
        info!(task_queue = %self.config.task_queue, "Worker pool stopped");
        Ok(())
    }
}
