// Tool worker lifecycle
//
// Decision: The worker gets its own multi-thread runtime so tool activities never
// compete with request handling on the caller's runtime
// Decision: Shutdown is a CancellationToken, safe to fire from any thread
// Decision: The runtime is always torn down with shutdown_background; dropping a runtime
// from async context panics

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use toolforge_core::ToolRegistry;
use toolforge_durable::{WorkerError, WorkflowClient};
use tracing::{error, info, warn};

use crate::config::ToolforgeConfig;
use crate::durable::tool_registration;
use crate::error::StartupError;

const WORKER_THREADS: usize = 2;

/// Hosts every registered tool as an activity on one task queue
pub struct ToolWorker {
    client: Arc<dyn WorkflowClient>,
    registry: Arc<ToolRegistry>,
    task_queue: String,
    max_concurrent_activities: usize,
    shutdown_grace: Duration,
    state: Mutex<WorkerState>,
}

#[derive(Default)]
struct WorkerState {
    runtime: Option<Runtime>,
    shutdown: Option<CancellationToken>,
    task: Option<JoinHandle<Result<(), WorkerError>>>,
}

impl ToolWorker {
    pub fn new(
        client: Arc<dyn WorkflowClient>,
        registry: Arc<ToolRegistry>,
        task_queue: impl Into<String>,
    ) -> Self {
        Self {
            client,
            registry,
            task_queue: task_queue.into(),
            max_concurrent_activities: 100,
            shutdown_grace: Duration::from_secs(5),
            state: Mutex::new(WorkerState::default()),
        }
    }

    /// Worker settings taken from configuration
    pub fn from_config(
        client: Arc<dyn WorkflowClient>,
        registry: Arc<ToolRegistry>,
        config: &ToolforgeConfig,
    ) -> Self {
        Self::new(client, registry, config.durable.task_queue.clone())
            .with_max_concurrent_activities(config.execution.max_concurrent_activities)
            .with_shutdown_grace(config.execution.worker_shutdown_grace())
    }

    pub fn with_max_concurrent_activities(mut self, max: usize) -> Self {
        self.max_concurrent_activities = max.max(1);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn task_queue(&self) -> &str {
        &self.task_queue
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Start polling the task queue in the background.
    ///
    /// Tools registered after this call are not hosted until the next start.
    pub fn start(&self) -> Result<(), StartupError> {
        let mut state = self.state.lock();
        if state.task.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }
        if let Some(runtime) = state.runtime.take() {
            runtime.shutdown_background();
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS)
            .thread_name("toolforge-worker")
            .enable_all()
            .build()
            .map_err(|e| StartupError::Worker(e.to_string()))?;

        let tools = self.registry.list_all();
        let registration = tool_registration(&tools, self.task_queue.clone())
            .with_max_concurrent_activities(self.max_concurrent_activities)
            .with_shutdown_grace(self.shutdown_grace);

        info!(
            task_queue = %self.task_queue,
            tools = tools.len(),
            max_concurrent_activities = self.max_concurrent_activities,
            "Starting tool worker"
        );

        let shutdown = CancellationToken::new();
        let client = Arc::clone(&self.client);
        let token = shutdown.clone();
        let task_queue = self.task_queue.clone();
        let task = runtime.spawn(async move {
            let result = client.run_worker(registration, token).await;
            match &result {
                Ok(()) => info!(task_queue = %task_queue, "Tool worker stopped"),
                Err(e) => error!(task_queue = %task_queue, error = %e, "Tool worker exited with error"),
            }
            result
        });

        state.runtime = Some(runtime);
        state.shutdown = Some(shutdown);
        state.task = Some(task);
        Ok(())
    }

    /// Ask the worker to stop without waiting
    pub fn signal_stop(&self) {
        if let Some(shutdown) = self.state.lock().shutdown.as_ref() {
            shutdown.cancel();
        }
    }

    /// Stop the worker and wait for in-flight activities, up to the grace period.
    ///
    /// A no-op when the worker was never started.
    pub async fn stop(&self) -> Result<(), WorkerError> {
        let (runtime, task) = {
            let mut state = self.state.lock();
            if let Some(shutdown) = state.shutdown.take() {
                shutdown.cancel();
            }
            (state.runtime.take(), state.task.take())
        };

        let Some(task) = task else {
            if let Some(runtime) = runtime {
                runtime.shutdown_background();
            }
            return Ok(());
        };

        // The host enforces the grace period itself; the margin covers its bookkeeping
        let wait = self.shutdown_grace + Duration::from_secs(1);
        let result = match tokio::time::timeout(wait, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(WorkerError::Failed(join_error.to_string())),
            Err(_) => {
                warn!(task_queue = %self.task_queue, "Tool worker did not stop within grace period");
                Err(WorkerError::ShutdownTimeout { in_flight: 0 })
            }
        };

        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
        result
    }
}

impl std::fmt::Debug for ToolWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolWorker")
            .field("task_queue", &self.task_queue)
            .field("max_concurrent_activities", &self.max_concurrent_activities)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for ToolWorker {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(shutdown) = state.shutdown.take() {
            shutdown.cancel();
        }
        if let Some(runtime) = state.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use toolforge_core::ToolDescriptor;
    use toolforge_durable::{LocalEngine, WorkflowSubmission};

    fn registry() -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(
                ToolDescriptor::builder("double")
                    .param::<i64>("n")
                    .blocking_handler(|args| Ok(args.required::<i64>("n")? * 2))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                ToolDescriptor::builder("linger")
                    .param::<u64>("millis")
                    .async_handler(|args| async move {
                        let millis: u64 = args.required("millis")?;
                        tokio::time::sleep(Duration::from_millis(millis)).await;
                        Ok(millis)
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
    }

    fn submission(id: &str) -> WorkflowSubmission {
        call(id, "double", json!({"n": 21}))
    }

    fn call(id: &str, tool: &str, arguments: Value) -> WorkflowSubmission {
        WorkflowSubmission::new(
            "ToolWorkflow",
            id,
            "worker-test",
            json!({
                "tool_name": tool,
                "arguments": arguments,
                "timeout_seconds": 5.0,
                "retry_policy": {"max_attempts": 1, "initial_interval": 1.0, "maximum_interval": 1.0}
            }),
        )
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let worker = ToolWorker::new(Arc::new(LocalEngine::new()), registry(), "worker-test");
        assert!(!worker.is_running());
        worker.signal_stop();
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_runs_tools_and_stop_is_idempotent() {
        let engine = LocalEngine::new();
        let worker = ToolWorker::new(Arc::new(engine.clone()), registry(), "worker-test")
            .with_shutdown_grace(Duration::from_secs(1));

        worker.start().unwrap();
        worker.start().unwrap();
        assert!(worker.is_running());

        let outcome = engine.execute_workflow(submission("wf-1")).await.unwrap();
        assert_eq!(outcome.result, json!(42));

        worker.stop().await.unwrap();
        assert!(!worker.is_running());
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let engine = LocalEngine::new();
        let worker = ToolWorker::new(Arc::new(engine.clone()), registry(), "worker-test")
            .with_shutdown_grace(Duration::from_secs(1));

        worker.start().unwrap();
        worker.stop().await.unwrap();

        worker.start().unwrap();
        let outcome = engine.execute_workflow(submission("wf-2")).await.unwrap();
        assert_eq!(outcome.result, Value::from(42));
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_drains_in_flight_tool() {
        let engine = LocalEngine::new();
        let worker = ToolWorker::new(Arc::new(engine.clone()), registry(), "worker-test")
            .with_shutdown_grace(Duration::from_secs(5));
        worker.start().unwrap();

        let pending = tokio::spawn({
            let engine = engine.clone();
            async move {
                engine
                    .execute_workflow(call("wf-drain", "linger", json!({"millis": 300})))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        worker.stop().await.unwrap();

        let outcome = pending.await.unwrap().unwrap();
        assert_eq!(outcome.result, json!(300));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_stop_aborts_tool_past_grace() {
        let engine = LocalEngine::new();
        let worker = ToolWorker::new(Arc::new(engine.clone()), registry(), "worker-test")
            .with_shutdown_grace(Duration::from_millis(100));
        worker.start().unwrap();

        let pending = tokio::spawn({
            let engine = engine.clone();
            async move {
                engine
                    .execute_workflow(call("wf-abort", "linger", json!({"millis": 30_000})))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = worker.stop().await.unwrap_err();
        assert!(matches!(err, WorkerError::ShutdownTimeout { .. }));

        let outcome = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_err());
    }
}
