//! Workflow engine client interface
//!
//! The runtime talks to a workflow engine only through these traits:
//! - [`WorkflowConnector`] opens a connection from [`ConnectOptions`]
//! - [`WorkflowClient`] starts executions and inspects them
//! - [`WorkerHost`] hosts workflows/activities for a task queue until shut down
//!
//! [`crate::LocalEngine`] implements all three in-process; a networked engine
//! plugs in behind the same traits.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::activity::Activity;
use crate::workflow::{
    WorkflowDefinition, WorkflowDescription, WorkflowError, WorkflowHandle, WorkflowOutcome,
    WorkflowSubmission,
};

/// Metadata key carrying the cloud API key
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Metadata key carrying the cloud namespace
pub const NAMESPACE_HEADER: &str = "temporal-namespace";

// ============================================================================
// Connection options
// ============================================================================

/// TLS material for a connection (already read from disk)
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    pub client_cert: Option<Vec<u8>>,
    pub client_private_key: Option<Vec<u8>>,
    pub server_root_ca_cert: Option<Vec<u8>>,
    /// Server name override for certificate verification
    pub domain: Option<String>,
}

impl std::fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsOptions")
            .field("client_cert", &self.client_cert.as_ref().map(Vec::len))
            .field(
                "client_private_key",
                &self.client_private_key.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "server_root_ca_cert",
                &self.server_root_ca_cert.as_ref().map(Vec::len),
            )
            .field("domain", &self.domain)
            .finish()
    }
}

/// How a connection is secured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSecurity {
    Plaintext,
    /// Client certificate authentication
    MutualTls,
    /// Managed cloud: TLS plus API key metadata
    Cloud,
}

impl std::fmt::Display for TransportSecurity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportSecurity::Plaintext => write!(f, "plaintext"),
            TransportSecurity::MutualTls => write!(f, "mtls"),
            TransportSecurity::Cloud => write!(f, "cloud"),
        }
    }
}

/// Options for connecting to a workflow engine
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// `host:port` of the engine frontend
    pub target: String,
    pub namespace: String,
    pub tls: Option<TlsOptions>,
    pub api_key: Option<String>,
    /// Identity reported to the engine
    pub identity: String,
    /// Extra metadata sent with every call
    pub rpc_metadata: BTreeMap<String, String>,
    pub connect_timeout: Duration,
}

impl ConnectOptions {
    pub fn new(target: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            namespace: namespace.into(),
            tls: None,
            api_key: None,
            identity: format!("toolforge-{}", std::process::id()),
            rpc_metadata: BTreeMap::new(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Managed-cloud credentials: sets bearer authorization and namespace metadata
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.rpc_metadata
            .insert(AUTHORIZATION_HEADER.to_string(), format!("Bearer {api_key}"));
        self.rpc_metadata
            .insert(NAMESPACE_HEADER.to_string(), self.namespace.clone());
        self.api_key = Some(api_key);
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn transport_security(&self) -> TransportSecurity {
        match (&self.api_key, &self.tls) {
            (Some(_), _) => TransportSecurity::Cloud,
            (None, Some(_)) => TransportSecurity::MutualTls,
            (None, None) => TransportSecurity::Plaintext,
        }
    }

    /// Check the options are internally consistent
    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.target.trim().is_empty() {
            return Err(ConnectError::InvalidOptions(
                "target address must not be empty".into(),
            ));
        }
        if self.api_key.is_some() && self.tls.is_none() {
            return Err(ConnectError::InvalidOptions(
                "cloud connections require TLS".into(),
            ));
        }
        if let Some(tls) = &self.tls {
            if tls.client_cert.is_some() != tls.client_private_key.is_some() {
                return Err(ConnectError::InvalidOptions(
                    "client certificate and private key must be provided together".into(),
                ));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let metadata: BTreeMap<&str, &str> = self
            .rpc_metadata
            .iter()
            .map(|(k, v)| {
                let shown = if k == AUTHORIZATION_HEADER {
                    "<redacted>"
                } else {
                    v.as_str()
                };
                (k.as_str(), shown)
            })
            .collect();

        f.debug_struct("ConnectOptions")
            .field("target", &self.target)
            .field("namespace", &self.namespace)
            .field("tls", &self.tls)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("identity", &self.identity)
            .field("rpc_metadata", &metadata)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Errors opening a connection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid connection options: {0}")]
    InvalidOptions(String),

    #[error("failed to connect to {target}: {message}")]
    Unreachable { target: String, message: String },

    #[error("TLS setup failed: {0}")]
    Tls(String),
}

// ============================================================================
// Worker hosting
// ============================================================================

/// What a worker hosts on one task queue
#[derive(Clone)]
pub struct WorkerRegistration {
    pub task_queue: String,
    pub workflows: Vec<Arc<dyn WorkflowDefinition>>,
    pub activities: Vec<Arc<dyn Activity>>,
    /// Upper bound on concurrently executing activities
    pub max_concurrent_activities: usize,
    /// How long shutdown waits for in-flight executions
    pub shutdown_grace: Duration,
}

impl WorkerRegistration {
    pub fn new(task_queue: impl Into<String>) -> Self {
        Self {
            task_queue: task_queue.into(),
            workflows: Vec::new(),
            activities: Vec::new(),
            max_concurrent_activities: 100,
            shutdown_grace: Duration::from_secs(5),
        }
    }

    pub fn with_workflow(mut self, workflow: Arc<dyn WorkflowDefinition>) -> Self {
        self.workflows.push(workflow);
        self
    }

    pub fn with_activity(mut self, activity: Arc<dyn Activity>) -> Self {
        self.activities.push(activity);
        self
    }

    pub fn with_activities(
        mut self,
        activities: impl IntoIterator<Item = Arc<dyn Activity>>,
    ) -> Self {
        self.activities.extend(activities);
        self
    }

    pub fn with_max_concurrent_activities(mut self, max: usize) -> Self {
        self.max_concurrent_activities = max.max(1);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn workflow_names(&self) -> Vec<&str> {
        self.workflows.iter().map(|w| w.name()).collect()
    }

    pub fn activity_names(&self) -> Vec<&str> {
        self.activities.iter().map(|a| a.name()).collect()
    }
}

impl std::fmt::Debug for WorkerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistration")
            .field("task_queue", &self.task_queue)
            .field("workflows", &self.workflow_names())
            .field("activities", &self.activity_names())
            .field("max_concurrent_activities", &self.max_concurrent_activities)
            .field("shutdown_grace", &self.shutdown_grace)
            .finish()
    }
}

/// Worker errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    #[error("task queue '{0}' already has a worker")]
    QueueBusy(String),

    #[error("duplicate registration for '{0}'")]
    DuplicateRegistration(String),

    #[error("graceful shutdown timed out with {in_flight} execution(s) in flight")]
    ShutdownTimeout { in_flight: usize },

    #[error("worker failed: {0}")]
    Failed(String),
}

// ============================================================================
// Traits
// ============================================================================

/// Opens client connections
#[async_trait]
pub trait WorkflowConnector: Send + Sync {
    async fn connect(&self, options: ConnectOptions)
        -> Result<Arc<dyn WorkflowClient>, ConnectError>;
}

/// Runs workers against the engine
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Poll `registration.task_queue` and execute work until `shutdown` fires,
    /// then drain in-flight executions for up to `registration.shutdown_grace`
    async fn run_worker(
        &self,
        registration: WorkerRegistration,
        shutdown: CancellationToken,
    ) -> Result<(), WorkerError>;
}

/// Starts and inspects workflow executions
#[async_trait]
pub trait WorkflowClient: WorkerHost {
    /// Start an execution and wait for its result
    async fn execute_workflow(
        &self,
        submission: WorkflowSubmission,
    ) -> Result<WorkflowOutcome, WorkflowError>;

    /// Start an execution and return as soon as the engine has accepted it
    async fn start_workflow(
        &self,
        submission: WorkflowSubmission,
    ) -> Result<WorkflowHandle, WorkflowError>;

    async fn describe_workflow(&self, workflow_id: &str)
        -> Result<WorkflowDescription, WorkflowError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plaintext_defaults() {
        let options = ConnectOptions::new("localhost:7233", "default");
        assert_eq!(options.transport_security(), TransportSecurity::Plaintext);
        assert!(options.rpc_metadata.is_empty());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_cloud_metadata() {
        let options = ConnectOptions::new("ns.tmprl.cloud:7233", "ns.acct")
            .with_tls(TlsOptions::default())
            .with_api_key("secret-key");

        assert_eq!(options.transport_security(), TransportSecurity::Cloud);
        assert_eq!(
            options.rpc_metadata.get(AUTHORIZATION_HEADER).map(String::as_str),
            Some("Bearer secret-key")
        );
        assert_eq!(
            options.rpc_metadata.get(NAMESPACE_HEADER).map(String::as_str),
            Some("ns.acct")
        );
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_cloud_requires_tls() {
        let options = ConnectOptions::new("ns.tmprl.cloud:7233", "ns").with_api_key("k");
        assert!(matches!(
            options.validate(),
            Err(ConnectError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_cert_requires_key() {
        let options = ConnectOptions::new("localhost:7233", "default").with_tls(TlsOptions {
            client_cert: Some(b"cert".to_vec()),
            ..TlsOptions::default()
        });
        assert_eq!(options.transport_security(), TransportSecurity::MutualTls);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let options = ConnectOptions::new("host:7233", "ns")
            .with_tls(TlsOptions {
                client_cert: Some(b"cert".to_vec()),
                client_private_key: Some(b"very-private".to_vec()),
                ..TlsOptions::default()
            })
            .with_api_key("secret-key");

        let debug = format!("{options:?}");
        assert!(!debug.contains("secret-key"));
        assert!(!debug.contains("very-private"));
        assert!(debug.contains("<redacted>"));
    }
}
