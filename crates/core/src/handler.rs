// Tool Handlers
//
// Decision: A handler is either async (runs on the async runtime) or blocking
// (runs on a bounded thread pool); the backend picks the strategy from the variant
// Decision: Handlers receive already-resolved arguments wrapped in `ToolArgs`
// and return JSON; failures are `anyhow::Error` so tool authors can use `?`

use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Name-keyed argument map passed to a tool.
pub type Arguments = serde_json::Map<String, Value>;

type AsyncFn = dyn Fn(ToolArgs) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync;
type BlockingFn = dyn Fn(ToolArgs) -> anyhow::Result<Value> + Send + Sync;

/// Typed accessors over a resolved argument map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs {
    values: Arguments,
}

impl ToolArgs {
    pub fn new(values: Arguments) -> Self {
        Self { values }
    }

    /// Deserialize a required argument
    pub fn required<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| anyhow!("missing required argument '{name}'"))?;
        serde_json::from_value(value.clone())
            .with_context(|| format!("invalid value for argument '{name}'"))
    }

    /// Deserialize an optional argument; absent and null both yield `None`
    pub fn optional<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<Option<T>> {
        match self.values.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .with_context(|| format!("invalid value for argument '{name}'")),
        }
    }

    /// Deserialize the whole argument map into a struct
    pub fn parse<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_value(Value::Object(self.values.clone()))
            .context("arguments do not match the tool's parameters")
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn as_map(&self) -> &Arguments {
        &self.values
    }

    pub fn into_inner(self) -> Arguments {
        self.values
    }
}

impl From<Arguments> for ToolArgs {
    fn from(values: Arguments) -> Self {
        Self::new(values)
    }
}

/// The callable behind a tool.
#[derive(Clone)]
pub enum ToolHandler {
    Async(Arc<AsyncFn>),
    Blocking(Arc<BlockingFn>),
}

impl ToolHandler {
    /// Wrap an async function
    pub fn from_async<F, Fut, T>(f: F) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Serialize,
    {
        ToolHandler::Async(Arc::new(move |args| {
            f(args)
                .map(|result| result.and_then(to_json))
                .boxed()
        }))
    }

    /// Wrap a synchronous function that may block the calling thread
    pub fn from_blocking<F, T>(f: F) -> Self
    where
        F: Fn(ToolArgs) -> anyhow::Result<T> + Send + Sync + 'static,
        T: Serialize,
    {
        ToolHandler::Blocking(Arc::new(move |args| f(args).and_then(to_json)))
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, ToolHandler::Blocking(_))
    }

    /// Run the handler inline on the current task.
    ///
    /// Blocking handlers run on the calling thread; callers that care about
    /// runtime starvation should go through a backend instead.
    pub async fn invoke(&self, args: ToolArgs) -> anyhow::Result<Value> {
        match self {
            ToolHandler::Async(f) => f(args).await,
            ToolHandler::Blocking(f) => f(args),
        }
    }
}

impl fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolHandler::Async(_) => f.write_str("ToolHandler::Async"),
            ToolHandler::Blocking(_) => f.write_str("ToolHandler::Blocking"),
        }
    }
}

fn to_json<T: Serialize>(value: T) -> anyhow::Result<Value> {
    serde_json::to_value(value).context("tool result is not JSON-serializable")
}
