// Runtime configuration
//
// Decision: One serde tree loaded from YAML, with TOOLFORGE_* environment overrides on top
// Decision: Durable mode is an explicit switch (`durable.enabled`), never inferred from other fields
// Decision: Malformed environment values are errors, not silently ignored

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use toolforge_core::ToolDescriptorBuilder;
use toolforge_durable::{ConnectOptions, TlsOptions};
use tracing::debug;

/// File names searched by [`ToolforgeConfig::load`], in order
pub const CONFIG_FILE_NAMES: [&str; 2] = [".toolforge.yaml", "toolforge.yaml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration in {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("{what} not found: {path}")]
    MissingFile { what: &'static str, path: PathBuf },

    #[error("client certificate and client key must be configured together")]
    IncompleteTls,
}

/// How the dispatcher treats the workflow engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurableMode {
    /// Direct execution only
    Disabled,
    /// Use the engine when reachable, fall back to direct otherwise
    BestEffort,
    /// Fail startup when the engine is unreachable
    Required,
}

/// Workflow engine connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurableConfig {
    pub enabled: bool,
    pub required: bool,
    pub address: String,
    pub namespace: String,
    pub task_queue: String,

    // Managed cloud
    pub cloud_namespace: Option<String>,
    pub cloud_api_key: Option<String>,

    // Mutual TLS
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
    pub server_root_ca_path: Option<PathBuf>,
    /// Server name override for certificate verification
    pub server_name: Option<String>,
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            required: false,
            address: "localhost:7233".to_string(),
            namespace: "default".to_string(),
            task_queue: "toolforge-tools".to_string(),
            cloud_namespace: None,
            cloud_api_key: None,
            client_cert_path: None,
            client_key_path: None,
            server_root_ca_path: None,
            server_name: None,
        }
    }
}

impl DurableConfig {
    pub fn mode(&self) -> DurableMode {
        match (self.enabled, self.required) {
            (false, _) => DurableMode::Disabled,
            (true, false) => DurableMode::BestEffort,
            (true, true) => DurableMode::Required,
        }
    }

    /// Managed cloud needs both a namespace and an API key
    pub fn is_cloud(&self) -> bool {
        self.cloud_namespace.is_some() && self.cloud_api_key.is_some()
    }

    /// Build engine connection options, reading TLS material from disk
    pub fn connect_options(&self) -> Result<ConnectOptions, ConfigError> {
        let namespace = match (&self.cloud_namespace, self.is_cloud()) {
            (Some(cloud_namespace), true) => cloud_namespace.clone(),
            _ => self.namespace.clone(),
        };
        let mut options = ConnectOptions::new(self.address.clone(), namespace);

        match self.tls_options()? {
            Some(tls) => options = options.with_tls(tls),
            // Cloud endpoints are TLS-only even without client certificates
            None if self.is_cloud() => {
                options = options.with_tls(TlsOptions {
                    domain: self.server_name.clone(),
                    ..TlsOptions::default()
                });
            }
            None => {}
        }

        if let (Some(api_key), true) = (&self.cloud_api_key, self.is_cloud()) {
            options = options.with_api_key(api_key.clone());
        }

        debug!(
            target_address = %options.target,
            namespace = %options.namespace,
            security = %options.transport_security(),
            "Built engine connection options"
        );
        Ok(options)
    }

    fn tls_options(&self) -> Result<Option<TlsOptions>, ConfigError> {
        let server_root_ca_cert = self
            .server_root_ca_path
            .as_deref()
            .map(|path| read_file("server root CA", path))
            .transpose()?;

        match (&self.client_cert_path, &self.client_key_path) {
            (Some(cert), Some(key)) => Ok(Some(TlsOptions {
                client_cert: Some(read_file("client certificate", cert)?),
                client_private_key: Some(read_file("client key", key)?),
                server_root_ca_cert,
                domain: self.server_name.clone(),
            })),
            (None, None) => Ok(server_root_ca_cert.map(|ca| TlsOptions {
                server_root_ca_cert: Some(ca),
                domain: self.server_name.clone(),
                ..TlsOptions::default()
            })),
            _ => Err(ConfigError::IncompleteTls),
        }
    }
}

fn read_file(what: &'static str, path: &Path) -> Result<Vec<u8>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::MissingFile {
            what,
            path: path.to_path_buf(),
        });
    }
    std::fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Defaults applied to tools declared through [`ToolDefaults::builder`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolDefaults {
    /// Seconds
    pub default_timeout: u64,
    pub default_retry_attempts: u32,
}

impl Default for ToolDefaults {
    fn default() -> Self {
        Self {
            default_timeout: 300,
            default_retry_attempts: 3,
        }
    }
}

impl ToolDefaults {
    /// Start a descriptor with the configured timeout and retry attempts
    pub fn builder(&self, name: impl Into<String>) -> ToolDescriptorBuilder {
        ToolDescriptorBuilder::new(name)
            .timeout_secs(self.default_timeout)
            .max_attempts(self.default_retry_attempts)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Bound on concurrently running blocking handlers in direct mode
    pub max_blocking_workers: usize,
    /// Bound on concurrently running activities in the worker
    pub max_concurrent_activities: usize,
    pub worker_shutdown_grace_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_blocking_workers: 32,
            max_concurrent_activities: 100,
            worker_shutdown_grace_secs: 5,
        }
    }
}

impl ExecutionConfig {
    pub fn worker_shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.worker_shutdown_grace_secs)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolforgeConfig {
    pub durable: DurableConfig,
    pub server: ServerConfig,
    pub tools: ToolDefaults,
    pub execution: ExecutionConfig,
}

impl ToolforgeConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path`, or from the first config file found in the current
    /// directory, or fall back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
                    path: PathBuf::from("."),
                    source,
                })?;
                Self::discover(&cwd)
            }
        }
    }

    fn discover(dir: &Path) -> Result<Self, ConfigError> {
        for name in CONFIG_FILE_NAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                debug!(path = %candidate.display(), "Loading configuration file");
                return Self::from_file(candidate);
            }
        }
        Ok(Self::default())
    }

    /// Defaults overlaid with environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_env()
    }

    /// Override fields whose environment variables are set
    pub fn merge_env(self) -> Result<Self, ConfigError> {
        self.merge_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn merge_lookup<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvOverlay { lookup };

        // Durable engine
        env.flag("TOOLFORGE_DURABLE_ENABLED", &mut self.durable.enabled)?;
        env.flag("TOOLFORGE_DURABLE_REQUIRED", &mut self.durable.required)?;
        env.string("TOOLFORGE_DURABLE_ADDRESS", &mut self.durable.address);
        env.string("TOOLFORGE_DURABLE_NAMESPACE", &mut self.durable.namespace);
        env.string("TOOLFORGE_DURABLE_TASK_QUEUE", &mut self.durable.task_queue);
        env.optional(
            "TOOLFORGE_DURABLE_CLOUD_NAMESPACE",
            &mut self.durable.cloud_namespace,
        );
        env.optional(
            "TOOLFORGE_DURABLE_CLOUD_API_KEY",
            &mut self.durable.cloud_api_key,
        );
        env.path(
            "TOOLFORGE_DURABLE_CLIENT_CERT_PATH",
            &mut self.durable.client_cert_path,
        );
        env.path(
            "TOOLFORGE_DURABLE_CLIENT_KEY_PATH",
            &mut self.durable.client_key_path,
        );
        env.path(
            "TOOLFORGE_DURABLE_SERVER_ROOT_CA_PATH",
            &mut self.durable.server_root_ca_path,
        );
        env.optional("TOOLFORGE_DURABLE_SERVER_NAME", &mut self.durable.server_name);

        // Server
        env.string("TOOLFORGE_SERVER_HOST", &mut self.server.host);
        env.number("TOOLFORGE_SERVER_PORT", &mut self.server.port)?;

        // Tools
        env.number(
            "TOOLFORGE_TOOLS_DEFAULT_TIMEOUT",
            &mut self.tools.default_timeout,
        )?;
        env.number(
            "TOOLFORGE_TOOLS_DEFAULT_RETRY_ATTEMPTS",
            &mut self.tools.default_retry_attempts,
        )?;

        // Execution
        env.number(
            "TOOLFORGE_MAX_BLOCKING_WORKERS",
            &mut self.execution.max_blocking_workers,
        )?;
        env.number(
            "TOOLFORGE_MAX_CONCURRENT_ACTIVITIES",
            &mut self.execution.max_concurrent_activities,
        )?;
        env.number(
            "TOOLFORGE_WORKER_SHUTDOWN_GRACE_SECS",
            &mut self.execution.worker_shutdown_grace_secs,
        )?;

        Ok(self)
    }
}

struct EnvOverlay<F> {
    lookup: F,
}

impl<F> EnvOverlay<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, target: &mut String) {
        if let Some(value) = self.get(key) {
            *target = value;
        }
    }

    fn optional(&self, key: &str, target: &mut Option<String>) {
        if let Some(value) = self.get(key) {
            *target = Some(value);
        }
    }

    fn path(&self, key: &str, target: &mut Option<PathBuf>) {
        if let Some(value) = self.get(key) {
            *target = Some(PathBuf::from(value));
        }
    }

    fn number<T>(&self, key: &str, target: &mut T) -> Result<(), ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(value) = self.get(key) {
            *target = value
                .trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    fn flag(&self, key: &str, target: &mut bool) -> Result<(), ConfigError> {
        if let Some(value) = self.get(key) {
            *target = match value.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_string(),
                        value,
                        reason: "expected a boolean".to_string(),
                    })
                }
            };
        }
        Ok(())
    }
}
