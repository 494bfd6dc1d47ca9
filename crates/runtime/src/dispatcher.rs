// Tool dispatcher
//
// Decision: Unknown tools, injection failures, timeouts and handler errors all come
// back as ExecutionResult data; nothing is thrown across this boundary
// Decision: The backend is chosen once at startup; durable mode applies to every tool

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use toolforge_core::{
    resolve_injections, ErrorKind, ExecutionRequest, ExecutionResult, InjectionDescriptor,
    InputSchema, SchemaNode, ToolDescriptor, ToolRegistry, ToolRetryPolicy,
};
use toolforge_durable::{WorkerError, WorkflowClient, WorkflowConnector};
use tracing::{debug, info, instrument, warn};

use crate::config::{DurableMode, ToolforgeConfig};
use crate::direct::DirectBackend;
use crate::durable::DurableBackend;
use crate::error::StartupError;
use crate::worker::ToolWorker;

/// Durable execution settings shown for a tool when durable mode is active
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DurableToolInfo {
    pub enabled: bool,
    pub timeout_seconds: f64,
    pub retry_policy: ToolRetryPolicy,
    pub fire_and_forget: bool,
}

/// Public description of one tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolView {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
    pub output_schema: SchemaNode,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub injections: Vec<InjectionDescriptor>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub profiles: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durable: Option<DurableToolInfo>,
}

impl ToolView {
    fn new(tool: &ToolDescriptor, durable: bool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            input_schema: tool.input_schema().clone(),
            output_schema: tool.output_schema().clone(),
            injections: tool.injections().to_vec(),
            profiles: tool.profiles().clone(),
            durable: durable.then(|| DurableToolInfo {
                enabled: true,
                timeout_seconds: tool.timeout().as_secs_f64(),
                retry_policy: *tool.retry_policy(),
                fire_and_forget: tool.fire_and_forget(),
            }),
        }
    }
}

/// Routes tool calls to the direct or durable backend
#[derive(Debug)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    direct: DirectBackend,
    durable: Option<DurableBackend>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            direct: DirectBackend::default(),
            durable: None,
        }
    }

    pub fn with_direct(mut self, direct: DirectBackend) -> Self {
        self.direct = direct;
        self
    }

    pub fn with_durable(mut self, durable: DurableBackend) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn is_durable(&self) -> bool {
        self.durable.is_some()
    }

    /// Tools visible under `profile`; every tool when `profile` is `None`
    pub fn list_tools(&self, profile: Option<&str>) -> Vec<ToolView> {
        self.registry
            .list_all()
            .iter()
            .filter(|tool| tool.matches_profile(profile))
            .map(|tool| ToolView::new(tool, self.is_durable()))
            .collect()
    }

    pub async fn call_tool(&self, request: ExecutionRequest) -> ExecutionResult {
        self.call_tool_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Execute a call; firing `cancel` abandons the wait and reports an execution error
    #[instrument(skip_all, fields(tool_name = %request.tool_name))]
    pub async fn call_tool_with_cancel(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let Some(tool) = self.registry.get(&request.tool_name) else {
            warn!("Tool not found");
            return ExecutionResult::tool_not_found(&request.tool_name);
        };

        let arguments = match resolve_injections(
            tool.injections(),
            &request.arguments,
            request.context.as_ref(),
        ) {
            Ok(arguments) => arguments,
            Err(err) => {
                warn!(parameter = %err.parameter(), error = %err, "Context injection failed");
                return ExecutionResult::from(err);
            }
        };

        match &self.durable {
            Some(durable) => {
                debug!(task_queue = %durable.task_queue(), "Dispatching to durable backend");
                durable.execute(&tool, arguments, cancel).await
            }
            None => {
                debug!("Dispatching to direct backend");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        ExecutionResult::failure(ErrorKind::ExecutionError, "execution cancelled by caller")
                            .with_metadata("executed_via", "direct")
                    }
                    result = self.direct.execute(&tool, arguments) => result,
                }
            }
        }
    }
}

/// Dispatcher plus the worker that backs durable mode
#[derive(Debug)]
pub struct ToolRuntime {
    dispatcher: Arc<ToolDispatcher>,
    worker: Option<ToolWorker>,
}

impl ToolRuntime {
    /// Build the dispatcher for `config`, connecting to the engine when durable
    /// mode is enabled.
    ///
    /// An unreachable engine is fatal only in required mode; otherwise the
    /// runtime falls back to direct execution.
    pub async fn start(
        config: &ToolforgeConfig,
        registry: Arc<ToolRegistry>,
        connector: &dyn WorkflowConnector,
    ) -> Result<Self, StartupError> {
        let direct = DirectBackend::new(config.execution.max_blocking_workers);
        let dispatcher = ToolDispatcher::new(Arc::clone(&registry)).with_direct(direct);

        let mode = config.durable.mode();
        if mode == DurableMode::Disabled {
            info!(tools = registry.len(), "Starting tool runtime in direct mode");
            return Ok(Self {
                dispatcher: Arc::new(dispatcher),
                worker: None,
            });
        }

        let client = match connect(config, connector).await {
            Ok(client) => client,
            Err(err) if mode == DurableMode::Required => return Err(err),
            Err(err) => {
                warn!(error = %err, "Durable engine unavailable, falling back to direct execution");
                return Ok(Self {
                    dispatcher: Arc::new(dispatcher),
                    worker: None,
                });
            }
        };

        let worker = ToolWorker::from_config(Arc::clone(&client), Arc::clone(&registry), config);
        worker.start()?;

        info!(
            tools = registry.len(),
            task_queue = %config.durable.task_queue,
            "Starting tool runtime in durable mode"
        );
        let durable = DurableBackend::new(client, config.durable.task_queue.clone());
        Ok(Self {
            dispatcher: Arc::new(dispatcher.with_durable(durable)),
            worker: Some(worker),
        })
    }

    pub fn dispatcher(&self) -> &Arc<ToolDispatcher> {
        &self.dispatcher
    }

    pub fn worker(&self) -> Option<&ToolWorker> {
        self.worker.as_ref()
    }

    /// Stop the worker, if any
    pub async fn shutdown(self) -> Result<(), WorkerError> {
        match &self.worker {
            Some(worker) => worker.stop().await,
            None => Ok(()),
        }
    }
}

async fn connect(
    config: &ToolforgeConfig,
    connector: &dyn WorkflowConnector,
) -> Result<Arc<dyn WorkflowClient>, StartupError> {
    let options = config.durable.connect_options()?;
    info!(
        address = %options.target,
        namespace = %options.namespace,
        security = %options.transport_security(),
        "Connecting to durable engine"
    );
    Ok(connector.connect(options).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use toolforge_core::InjectMarker;

    fn registry() -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(
                ToolDescriptor::builder("whoami")
                    .doc("Return the calling user")
                    .inject::<String>("user_id", InjectMarker::key("user_id"))
                    .profile("admin")
                    .blocking_handler(|args| args.required::<String>("user_id"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                ToolDescriptor::builder("ping")
                    .async_handler(|_args| async { Ok("pong") })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_list_tools_direct_mode() {
        let dispatcher = ToolDispatcher::new(registry());
        let tools = dispatcher.list_tools(None);
        assert_eq!(tools.len(), 2);

        let whoami = tools.iter().find(|t| t.name == "whoami").unwrap();
        assert_eq!(whoami.description, "Return the calling user");
        assert_eq!(whoami.injections.len(), 1);
        assert!(whoami.durable.is_none());

        let value = serde_json::to_value(&tools).unwrap();
        let ping = value
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["name"] == "ping")
            .unwrap();
        assert!(ping.get("injections").is_none());
        assert!(ping.get("durable").is_none());
        assert_eq!(ping["description"], json!("Tool: ping"));
    }

    #[test]
    fn test_list_tools_profile_filter() {
        let dispatcher = ToolDispatcher::new(registry());
        let names: Vec<_> = dispatcher
            .list_tools(Some("admin"))
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["whoami"]);
        assert!(dispatcher.list_tools(Some("billing")).is_empty());
    }

    #[tokio::test]
    async fn test_injection_from_context() {
        let dispatcher = ToolDispatcher::new(registry());

        let result = dispatcher
            .call_tool(ExecutionRequest::new("whoami").context_value("user_id", "u-1"))
            .await;
        assert!(result.success);
        assert_eq!(result.result, json!("u-1"));

        // Explicit argument wins over context
        let result = dispatcher
            .call_tool(
                ExecutionRequest::new("whoami")
                    .arg("user_id", "explicit")
                    .context_value("user_id", "u-1"),
            )
            .await;
        assert_eq!(result.result, json!("explicit"));
    }

    #[tokio::test]
    async fn test_cancel_direct_call() {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(
                ToolDescriptor::builder("slow")
                    .async_handler(|_args| async {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let dispatcher = ToolDispatcher::new(registry);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = dispatcher
            .call_tool_with_cancel(ExecutionRequest::new("slow"), cancel)
            .await;
        assert_eq!(result.error_kind, Some(ErrorKind::ExecutionError));
        assert!(result.error.unwrap().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_cancel_stops_async_tool() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let finished = Arc::new(AtomicBool::new(false));
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(
                ToolDescriptor::builder("countdown")
                    .async_handler({
                        let finished = Arc::clone(&finished);
                        move |_args| {
                            let finished = Arc::clone(&finished);
                            async move {
                                tokio::time::sleep(Duration::from_millis(200)).await;
                                finished.store(true, Ordering::SeqCst);
                                Ok(())
                            }
                        }
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let dispatcher = ToolDispatcher::new(registry);

        let cancel = CancellationToken::new();
        let trigger = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };
        let result = dispatcher
            .call_tool_with_cancel(ExecutionRequest::new("countdown"), cancel)
            .await;
        trigger.await.unwrap();
        assert_eq!(result.error.as_deref(), Some("execution cancelled by caller"));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
