//! In-process workflow engine
//!
//! `LocalEngine` implements [`WorkflowConnector`], [`WorkflowClient`] and
//! [`WorkerHost`] entirely in memory:
//! - one unbounded queue per task queue name; submissions wait there until a
//!   worker polls them
//! - at most one worker per task queue at a time
//! - execution records kept for [`WorkflowClient::describe_workflow`], the
//!   oldest closed ones evicted past a retention bound
//!
//! Nothing is persisted; executions in flight when the process exits are lost.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::executor::WorkflowExecutor;
use super::registry::QueueRegistry;
use crate::client::{
    ConnectError, ConnectOptions, WorkerError, WorkerHost, WorkerRegistration, WorkflowClient,
    WorkflowConnector,
};
use crate::worker::{WorkerPool, WorkerPoolConfig};
use crate::workflow::{
    WorkflowDescription, WorkflowError, WorkflowHandle, WorkflowOutcome, WorkflowStatus,
    WorkflowSubmission,
};

pub(crate) type Reply = oneshot::Sender<Result<WorkflowOutcome, WorkflowError>>;

/// A submission waiting on a task queue
pub(crate) struct QueuedWorkflow {
    pub submission: WorkflowSubmission,
    /// Present when the submitter waits for the result
    pub reply: Option<Reply>,
}

struct QueueSlot {
    sender: mpsc::UnboundedSender<QueuedWorkflow>,
    receiver: Option<mpsc::UnboundedReceiver<QueuedWorkflow>>,
}

impl QueueSlot {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
        }
    }
}

/// Terminal execution records kept by default before the oldest are evicted
pub const DEFAULT_MAX_RETAINED_EXECUTIONS: usize = 10_000;

/// Execution records, with closed ones remembered in the order they closed
struct Executions {
    records: HashMap<String, WorkflowDescription>,
    closed: VecDeque<String>,
    max_retained: usize,
}

impl Executions {
    fn new(max_retained: usize) -> Self {
        Self {
            records: HashMap::new(),
            closed: VecDeque::new(),
            max_retained: max_retained.max(1),
        }
    }

    /// Apply `close` to a live record and queue it for eviction
    fn close(&mut self, workflow_id: &str, close: impl FnOnce(&mut WorkflowDescription)) {
        let Some(record) = self.records.get_mut(workflow_id) else {
            return;
        };
        if record.status.is_terminal() {
            return;
        }
        close(record);
        record.closed_at = Some(Utc::now());
        self.closed.push_back(workflow_id.to_string());
        self.evict();
    }

    /// Drop the oldest closed records until the bound holds; live records are never dropped
    fn evict(&mut self) {
        while self.records.len() > self.max_retained {
            let Some(oldest) = self.closed.pop_front() else {
                break;
            };
            if self
                .records
                .get(&oldest)
                .is_some_and(|record| record.status.is_terminal())
            {
                self.records.remove(&oldest);
                debug!(workflow_id = %oldest, "Evicted execution record");
            }
        }
    }
}

/// Shared engine state: queues and execution records
pub(crate) struct EngineState {
    queues: Mutex<HashMap<String, QueueSlot>>,
    executions: RwLock<Executions>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self::with_max_retained(DEFAULT_MAX_RETAINED_EXECUTIONS)
    }
}

impl EngineState {
    fn with_max_retained(max_retained: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            executions: RwLock::new(Executions::new(max_retained)),
        }
    }

    fn enqueue(&self, job: QueuedWorkflow) -> Result<(), WorkflowError> {
        let submission = &job.submission;
        {
            let mut executions = self.executions.write();
            if executions.records.contains_key(&submission.workflow_id) {
                return Err(WorkflowError::AlreadyStarted(
                    submission.workflow_id.clone(),
                ));
            }
            executions.records.insert(
                submission.workflow_id.clone(),
                WorkflowDescription {
                    workflow_id: submission.workflow_id.clone(),
                    workflow_name: submission.workflow_name.clone(),
                    task_queue: submission.task_queue.clone(),
                    status: WorkflowStatus::Pending,
                    result: None,
                    error: None,
                    attempts: 0,
                    started_at: Utc::now(),
                    closed_at: None,
                },
            );
            executions.evict();
        }

        let mut queues = self.queues.lock();
        let slot = queues
            .entry(job.submission.task_queue.clone())
            .or_insert_with(QueueSlot::new);

        // A receiver dropped without being returned closes the channel; start a fresh one
        if let Err(mpsc::error::SendError(job)) = slot.sender.send(job) {
            *slot = QueueSlot::new();
            slot.sender
                .send(job)
                .map_err(|_| WorkflowError::Transport("task queue closed".into()))?;
        }
        Ok(())
    }

    fn lease_queue(self: &Arc<Self>, task_queue: &str) -> Result<QueueLease, WorkerError> {
        let mut queues = self.queues.lock();
        let slot = queues
            .entry(task_queue.to_string())
            .or_insert_with(QueueSlot::new);
        let receiver = slot
            .receiver
            .take()
            .ok_or_else(|| WorkerError::QueueBusy(task_queue.to_string()))?;

        Ok(QueueLease {
            state: Arc::clone(self),
            task_queue: task_queue.to_string(),
            receiver: Some(receiver),
        })
    }

    fn return_receiver(&self, task_queue: &str, receiver: mpsc::UnboundedReceiver<QueuedWorkflow>) {
        if let Some(slot) = self.queues.lock().get_mut(task_queue) {
            if slot.receiver.is_none() {
                slot.receiver = Some(receiver);
            }
        }
    }

    pub fn mark_running(&self, workflow_id: &str) {
        if let Some(record) = self.executions.write().records.get_mut(workflow_id) {
            record.status = WorkflowStatus::Running;
        }
    }

    pub fn finish(
        &self,
        workflow_id: &str,
        result: &Result<WorkflowOutcome, WorkflowError>,
        attempts: u32,
    ) {
        self.executions.write().close(workflow_id, |record| {
            record.attempts = attempts;
            match result {
                Ok(outcome) => {
                    record.status = WorkflowStatus::Completed;
                    record.result = Some(outcome.result.clone());
                }
                Err(WorkflowError::Cancelled) => {
                    record.status = WorkflowStatus::Cancelled;
                    record.error = Some(WorkflowError::Cancelled.to_string());
                }
                Err(err) => {
                    record.status = WorkflowStatus::Failed;
                    record.error = Some(err.to_string());
                }
            }
        });
    }

    pub fn mark_abandoned(&self, workflow_id: &str) {
        self.executions.write().close(workflow_id, |record| {
            record.status = WorkflowStatus::Cancelled;
            record.error = Some(WorkflowError::Cancelled.to_string());
        });
    }

    fn describe(&self, workflow_id: &str) -> Option<WorkflowDescription> {
        self.executions.read().records.get(workflow_id).cloned()
    }
}

/// Exclusive use of a task queue's receiver; handed back on drop
struct QueueLease {
    state: Arc<EngineState>,
    task_queue: String,
    receiver: Option<mpsc::UnboundedReceiver<QueuedWorkflow>>,
}

impl QueueLease {
    fn receiver(&mut self) -> Option<&mut mpsc::UnboundedReceiver<QueuedWorkflow>> {
        self.receiver.as_mut()
    }
}

impl Drop for QueueLease {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            self.state.return_receiver(&self.task_queue, receiver);
        }
    }
}

/// In-process workflow engine
///
/// # Example
///
/// ```ignore
/// let engine = LocalEngine::new();
/// let client = engine.connect(ConnectOptions::new("local", "default")).await?;
///
/// let shutdown = CancellationToken::new();
/// tokio::spawn({
///     let client = client.clone();
///     let shutdown = shutdown.clone();
///     async move { client.run_worker(registration, shutdown).await }
/// });
///
/// let outcome = client.execute_workflow(submission).await?;
/// ```
#[derive(Clone, Default)]
pub struct LocalEngine {
    state: Arc<EngineState>,
}

impl LocalEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine that keeps at most `max_retained` execution records once they close
    ///
    /// Pending and running executions are always kept. An evicted workflow id
    /// reports `NotFound` and may be submitted again.
    pub fn with_max_retained(max_retained: usize) -> Self {
        Self {
            state: Arc::new(EngineState::with_max_retained(max_retained)),
        }
    }

    /// Number of execution records currently retained
    pub fn execution_count(&self) -> usize {
        self.state.executions.read().records.len()
    }
}

impl std::fmt::Debug for LocalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEngine")
            .field("executions", &self.execution_count())
            .finish()
    }
}

#[async_trait]
impl WorkflowConnector for LocalEngine {
    async fn connect(
        &self,
        options: ConnectOptions,
    ) -> Result<Arc<dyn WorkflowClient>, ConnectError> {
        options.validate()?;

        info!(
            target_address = %options.target,
            namespace = %options.namespace,
            security = %options.transport_security(),
            "Connected to in-process workflow engine"
        );
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl WorkflowClient for LocalEngine {
    #[instrument(skip(self, submission), fields(workflow_id = %submission.workflow_id))]
    async fn execute_workflow(
        &self,
        submission: WorkflowSubmission,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let (reply, result) = oneshot::channel();
        self.state.enqueue(QueuedWorkflow {
            submission,
            reply: Some(reply),
        })?;

        // Reply dropped: the worker went away mid-execution
        result.await.unwrap_or(Err(WorkflowError::Cancelled))
    }

    #[instrument(skip(self, submission), fields(workflow_id = %submission.workflow_id))]
    async fn start_workflow(
        &self,
        submission: WorkflowSubmission,
    ) -> Result<WorkflowHandle, WorkflowError> {
        let handle = WorkflowHandle {
            workflow_id: submission.workflow_id.clone(),
            workflow_name: submission.workflow_name.clone(),
            task_queue: submission.task_queue.clone(),
        };
        self.state.enqueue(QueuedWorkflow {
            submission,
            reply: None,
        })?;

        debug!(workflow_id = %handle.workflow_id, "Workflow accepted");
        Ok(handle)
    }

    async fn describe_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<WorkflowDescription, WorkflowError> {
        self.state
            .describe(workflow_id)
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))
    }
}

#[async_trait]
impl WorkerHost for LocalEngine {
    #[instrument(skip_all, fields(task_queue = %registration.task_queue))]
    async fn run_worker(
        &self,
        registration: WorkerRegistration,
        shutdown: CancellationToken,
    ) -> Result<(), WorkerError> {
        let registry = Arc::new(QueueRegistry::from_registration(&registration)?);
        let mut lease = self.state.lease_queue(&registration.task_queue)?;

        let executor = Arc::new(WorkflowExecutor::new(
            Arc::clone(&self.state),
            registry,
            registration.max_concurrent_activities,
        ));
        let pool = WorkerPool::new(WorkerPoolConfig::from(&registration), executor);

        match lease.receiver() {
            Some(receiver) => pool.run(receiver, shutdown).await,
            None => Err(WorkerError::QueueBusy(registration.task_queue.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{Activity, ActivityError, FnActivity};
    use crate::reliability::RetryPolicy;
    use crate::workflow::{WorkflowContext, WorkflowDefinition};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct SingleActivity;

    #[async_trait]
    impl WorkflowDefinition for SingleActivity {
        fn name(&self) -> &str {
            "single"
        }

        async fn run(&self, ctx: &WorkflowContext, input: Value) -> Result<Value, WorkflowError> {
            let activity = input["activity"].as_str().unwrap_or("echo").to_string();
            ctx.execute_activity(&activity, input["payload"].clone(), ctx.default_activity_options())
                .await
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::exponential()
            .with_max_attempts(max_attempts)
            .with_initial_interval(Duration::from_millis(10))
            .with_max_interval(Duration::from_millis(20))
    }

    fn submission(id: &str, activity: &str, payload: Value) -> WorkflowSubmission {
        WorkflowSubmission::new(
            "single",
            id,
            "test-queue",
            json!({"activity": activity, "payload": payload}),
        )
        .with_retry_policy(fast_retry(3))
        .with_activity_timeout(Duration::from_secs(5))
    }

    fn registration(activities: Vec<Arc<dyn Activity>>) -> WorkerRegistration {
        WorkerRegistration::new("test-queue")
            .with_workflow(Arc::new(SingleActivity))
            .with_activities(activities)
            .with_shutdown_grace(Duration::from_secs(1))
    }

    fn echo() -> Arc<dyn Activity> {
        Arc::new(FnActivity::new("echo", |_ctx, input: Value| async move { Ok(input) }))
    }

    fn spawn_worker(
        engine: &LocalEngine,
        registration: WorkerRegistration,
    ) -> (CancellationToken, tokio::task::JoinHandle<Result<(), WorkerError>>) {
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let engine = engine.clone();
            let shutdown = shutdown.clone();
            async move { engine.run_worker(registration, shutdown).await }
        });
        (shutdown, handle)
    }

    #[tokio::test]
    async fn test_execute_workflow_roundtrip() {
        let engine = LocalEngine::new();
        let (shutdown, worker) = spawn_worker(&engine, registration(vec![echo()]));

        let outcome = engine
            .execute_workflow(submission("wf-1", "echo", json!({"x": 1})))
            .await
            .unwrap();
        assert_eq!(outcome.result, json!({"x": 1}));
        assert_eq!(outcome.attempts, 1);

        let description = engine.describe_workflow("wf-1").await.unwrap();
        assert_eq!(description.status, WorkflowStatus::Completed);
        assert!(description.closed_at.is_some());

        shutdown.cancel();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let flaky: Arc<dyn Activity> = Arc::new(FnActivity::new("flaky", {
            let calls = Arc::clone(&calls);
            move |ctx, _input: Value| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if ctx.attempt < 3 {
                        Err(ActivityError::retryable("transient"))
                    } else {
                        Ok(json!("done"))
                    }
                }
            }
        }));

        let engine = LocalEngine::new();
        let (shutdown, _worker) = spawn_worker(&engine, registration(vec![flaky]));

        let outcome = engine
            .execute_workflow(submission("wf-retry", "flaky", json!(null)))
            .await
            .unwrap();
        assert_eq!(outcome.result, json!("done"));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_attempts_exhausted() {
        let failing: Arc<dyn Activity> = Arc::new(FnActivity::new("failing", |_ctx, _input: Value| async {
            Err::<Value, _>(ActivityError::retryable("boom"))
        }));

        let engine = LocalEngine::new();
        let (shutdown, _worker) = spawn_worker(&engine, registration(vec![failing]));

        let err = engine
            .execute_workflow(submission("wf-fail", "failing", json!(null)))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::ActivityFailed {
                activity: "failing".into(),
                message: "boom".into(),
                attempts: 3,
            }
        );

        let description = engine.describe_workflow("wf-fail").await.unwrap();
        assert_eq!(description.status, WorkflowStatus::Failed);
        assert_eq!(description.attempts, 3);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_non_retryable_stops_early() {
        let calls = Arc::new(AtomicU32::new(0));
        let fatal: Arc<dyn Activity> = Arc::new(FnActivity::new("fatal", {
            let calls = Arc::clone(&calls);
            move |_ctx, _input: Value| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<Value, _>(ActivityError::non_retryable("bad input")) }
            }
        }));

        let engine = LocalEngine::new();
        let (shutdown, _worker) = spawn_worker(&engine, registration(vec![fatal]));

        let err = engine
            .execute_workflow(submission("wf-fatal", "fatal", json!(null)))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ActivityFailed { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let slow: Arc<dyn Activity> = Arc::new(FnActivity::new("slow", |_ctx, _input: Value| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Value::Null)
        }));

        let engine = LocalEngine::new();
        let (shutdown, _worker) = spawn_worker(&engine, registration(vec![slow]));

        let err = engine
            .execute_workflow(
                submission("wf-slow", "slow", json!(null))
                    .with_retry_policy(fast_retry(2))
                    .with_activity_timeout(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::TimedOut {
                activity: "slow".into(),
                attempts: 2,
            }
        );
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_start_workflow_queues_until_worker() {
        let engine = LocalEngine::new();

        let handle = engine
            .start_workflow(submission("wf-later", "echo", json!(7)))
            .await
            .unwrap();
        assert_eq!(handle.workflow_id, "wf-later");
        assert_eq!(
            engine.describe_workflow("wf-later").await.unwrap().status,
            WorkflowStatus::Pending
        );

        let (shutdown, _worker) = spawn_worker(&engine, registration(vec![echo()]));
        let mut status = WorkflowStatus::Pending;
        for _ in 0..100 {
            status = engine.describe_workflow("wf-later").await.unwrap().status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, WorkflowStatus::Completed);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_duplicate_workflow_id() {
        let engine = LocalEngine::new();
        engine
            .start_workflow(submission("wf-dup", "echo", json!(1)))
            .await
            .unwrap();

        let err = engine
            .start_workflow(submission("wf-dup", "echo", json!(1)))
            .await
            .unwrap_err();
        assert_eq!(err, WorkflowError::AlreadyStarted("wf-dup".into()));
    }

    #[tokio::test]
    async fn test_closed_records_evicted_past_bound() {
        let engine = LocalEngine::with_max_retained(3);
        let (shutdown, worker) = spawn_worker(&engine, registration(vec![echo()]));

        for i in 0..5 {
            engine
                .execute_workflow(submission(&format!("wf-{i}"), "echo", json!(i)))
                .await
                .unwrap();
            assert!(engine.execution_count() <= 3);
        }
        assert_eq!(engine.execution_count(), 3);

        for evicted in ["wf-0", "wf-1"] {
            let err = engine.describe_workflow(evicted).await.unwrap_err();
            assert_eq!(err, WorkflowError::NotFound(evicted.into()));
        }
        let newest = engine.describe_workflow("wf-4").await.unwrap();
        assert_eq!(newest.status, WorkflowStatus::Completed);
        assert_eq!(newest.result, Some(json!(4)));

        // An evicted id is free to run again
        let outcome = engine
            .execute_workflow(submission("wf-0", "echo", json!("again")))
            .await
            .unwrap();
        assert_eq!(outcome.result, json!("again"));

        shutdown.cancel();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_pending_records_survive_eviction() {
        let engine = LocalEngine::with_max_retained(2);
        for i in 0..4 {
            engine
                .start_workflow(submission(&format!("wf-queued-{i}"), "echo", json!(i)))
                .await
                .unwrap();
        }

        // Nothing has closed, so every record is still needed
        assert_eq!(engine.execution_count(), 4);
        assert_eq!(
            engine.describe_workflow("wf-queued-0").await.unwrap().status,
            WorkflowStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_unknown_workflow_and_activity() {
        let engine = LocalEngine::new();
        let (shutdown, _worker) = spawn_worker(&engine, registration(vec![echo()]));

        let err = engine
            .execute_workflow(WorkflowSubmission::new("missing", "wf-x", "test-queue", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err, WorkflowError::UnknownWorkflow("missing".into()));

        let err = engine
            .execute_workflow(submission("wf-y", "nope", json!(null)))
            .await
            .unwrap_err();
        assert_eq!(err, WorkflowError::UnknownActivity("nope".into()));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_one_worker_per_queue() {
        let engine = LocalEngine::new();
        let (shutdown, first) = spawn_worker(&engine, registration(vec![echo()]));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = engine
            .run_worker(registration(vec![echo()]), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, WorkerError::QueueBusy("test-queue".into()));

        shutdown.cancel();
        first.await.unwrap().unwrap();

        // The queue is free again once the first worker has stopped
        let (shutdown, second) = spawn_worker(&engine, registration(vec![echo()]));
        let outcome = engine
            .execute_workflow(submission("wf-second", "echo", json!(2)))
            .await
            .unwrap();
        assert_eq!(outcome.result, json!(2));
        shutdown.cancel();
        second.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connect_validates_options() {
        let engine = LocalEngine::new();
        assert!(engine
            .connect(ConnectOptions::new("localhost:7233", "default"))
            .await
            .is_ok());

        let err = engine
            .connect(ConnectOptions::new("cloud:7233", "ns").with_api_key("k"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectError::InvalidOptions(_)));
    }
}
