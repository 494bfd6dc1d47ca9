// Tool Descriptors
//
// A descriptor is the immutable record of one tool: its contract (derived
// schemas + injections), its handler, and its execution settings.
//
// Design decisions:
// - Built once through `ToolDescriptorBuilder`; schemas are derived in `build()`
//   and never change afterwards
// - Parameters are declared with their Rust type (`param::<T>`) so the schema
//   follows the compiler's view of the signature
// - Validation failures in the declaration are `DescriptorError`s, not panics

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::handler::{ToolArgs, ToolHandler};
use crate::injection::InjectionDescriptor;
use crate::schema::{
    derive_schemas, DescribeType, InjectMarker, InputSchema, ParamDefault, ParamSpec, SchemaNode,
    Signature, TypeHint,
};

/// Default per-call deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors raised while building a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("tool name must not be empty")]
    EmptyName,

    #[error("tool '{0}' has no handler")]
    MissingHandler(String),

    #[error("tool '{tool}' declares parameter '{parameter}' more than once")]
    DuplicateParameter { tool: String, parameter: String },

    #[error("tool '{0}' has a zero timeout")]
    ZeroTimeout(String),

    #[error("tool '{tool}' has an invalid retry policy: {reason}")]
    InvalidRetryPolicy { tool: String, reason: String },
}

// ============================================================================
// Retry policy
// ============================================================================

/// Retry settings for durable execution of one tool.
///
/// Intervals serialize as seconds. Backoff growth between the two intervals is
/// the workflow engine's concern.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToolRetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "duration_secs")]
    pub initial_interval: Duration,
    #[serde(rename = "maximum_interval", with = "duration_secs")]
    pub max_interval: Duration,
}

impl Default for ToolRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
        }
    }
}

impl ToolRetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.max_interval < self.initial_interval {
            return Err("maximum_interval is shorter than initial_interval".to_string());
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Descriptor
// ============================================================================

/// Immutable description of a registered tool.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    name: String,
    description: String,
    input_schema: InputSchema,
    output_schema: SchemaNode,
    injections: Vec<InjectionDescriptor>,
    handler: ToolHandler,
    timeout: Duration,
    retry_policy: ToolRetryPolicy,
    fire_and_forget: bool,
    profiles: BTreeSet<String>,
}

impl ToolDescriptor {
    pub fn builder(name: impl Into<String>) -> ToolDescriptorBuilder {
        ToolDescriptorBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &InputSchema {
        &self.input_schema
    }

    pub fn output_schema(&self) -> &SchemaNode {
        &self.output_schema
    }

    pub fn injections(&self) -> &[InjectionDescriptor] {
        &self.injections
    }

    pub fn handler(&self) -> &ToolHandler {
        &self.handler
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_policy(&self) -> &ToolRetryPolicy {
        &self.retry_policy
    }

    pub fn fire_and_forget(&self) -> bool {
        self.fire_and_forget
    }

    pub fn profiles(&self) -> &BTreeSet<String> {
        &self.profiles
    }

    /// Whether the tool should be listed for `profile`.
    ///
    /// With no filter every tool matches; with a filter only tools tagged with it do.
    pub fn matches_profile(&self, profile: Option<&str>) -> bool {
        match profile {
            None => true,
            Some(p) => self.profiles.contains(p),
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Declares a tool's signature and settings.
///
/// ```ignore
/// let add = ToolDescriptor::builder("add")
///     .description("Add two integers")
///     .param::<i64>("x")
///     .param::<i64>("y")
///     .returns::<i64>()
///     .async_handler(|args| async move {
///         Ok(args.required::<i64>("x")? + args.required::<i64>("y")?)
///     })
///     .build()?;
/// ```
#[derive(Debug)]
pub struct ToolDescriptorBuilder {
    name: String,
    description: Option<String>,
    signature: Signature,
    handler: Option<ToolHandler>,
    timeout: Duration,
    retry_policy: ToolRetryPolicy,
    fire_and_forget: bool,
    profiles: BTreeSet<String>,
}

impl ToolDescriptorBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            signature: Signature::default(),
            handler: None,
            timeout: DEFAULT_TIMEOUT,
            retry_policy: ToolRetryPolicy::default(),
            fire_and_forget: false,
            profiles: BTreeSet::new(),
        }
    }

    /// Explicit description, used as given
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Long-form documentation; only its first line becomes the description
    pub fn doc(mut self, doc: &str) -> Self {
        let first = doc.trim().lines().next().unwrap_or_default().trim();
        if !first.is_empty() {
            self.description = Some(first.to_string());
        }
        self
    }

    /// Required parameter of type `T`
    pub fn param<T: DescribeType + ?Sized>(self, name: impl Into<String>) -> Self {
        self.param_hint(ParamSpec::new(name, T::type_hint()))
    }

    /// Parameter with a default value; a null default makes it optional with no default
    pub fn param_with_default<T: DescribeType + ?Sized>(
        self,
        name: impl Into<String>,
        default: impl Into<Value>,
    ) -> Self {
        self.param_hint(ParamSpec::new(name, T::type_hint()).with_default(default.into()))
    }

    /// `Option<T>` parameter defaulting to null
    pub fn optional_param<T: DescribeType>(self, name: impl Into<String>) -> Self {
        self.param_hint(ParamSpec::new(name, <Option<T>>::type_hint()).with_default(ParamDefault::Null))
    }

    /// Parameter filled from runtime context; never part of the input schema
    pub fn inject<T: DescribeType + ?Sized>(
        self,
        name: impl Into<String>,
        marker: InjectMarker,
    ) -> Self {
        self.param_hint(ParamSpec::new(name, T::type_hint()).injected(marker))
    }

    /// Implicit receiver; skipped by schema derivation
    pub fn receiver(self) -> Self {
        self.param_hint(ParamSpec::receiver())
    }

    /// Fully explicit parameter declaration
    pub fn param_hint(mut self, spec: ParamSpec) -> Self {
        self.signature.params.push(spec);
        self
    }

    pub fn returns<T: DescribeType + ?Sized>(self) -> Self {
        self.returns_hint(T::type_hint())
    }

    pub fn returns_hint(mut self, hint: TypeHint) -> Self {
        self.signature.returns = Some(hint);
        self
    }

    pub fn handler(mut self, handler: ToolHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn async_handler<F, Fut, T>(self, f: F) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Serialize,
    {
        self.handler(ToolHandler::from_async(f))
    }

    pub fn blocking_handler<F, T>(self, f: F) -> Self
    where
        F: Fn(ToolArgs) -> anyhow::Result<T> + Send + Sync + 'static,
        T: Serialize,
    {
        self.handler(ToolHandler::from_blocking(f))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout_secs(self, secs: u64) -> Self {
        self.timeout(Duration::from_secs(secs))
    }

    pub fn retry_policy(mut self, policy: ToolRetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry_policy.max_attempts = max_attempts;
        self
    }

    pub fn fire_and_forget(mut self, fire_and_forget: bool) -> Self {
        self.fire_and_forget = fire_and_forget;
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profiles.insert(profile.into());
        self
    }

    pub fn profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profiles.extend(profiles.into_iter().map(Into::into));
        self
    }

    /// Validate the declaration and derive the tool's schemas
    pub fn build(self) -> Result<ToolDescriptor, DescriptorError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(DescriptorError::EmptyName);
        }

        let handler = self
            .handler
            .ok_or_else(|| DescriptorError::MissingHandler(name.clone()))?;

        let mut seen = BTreeSet::new();
        for param in self.signature.params.iter().filter(|p| !p.receiver) {
            if !seen.insert(param.name.as_str()) {
                return Err(DescriptorError::DuplicateParameter {
                    tool: name,
                    parameter: param.name.clone(),
                });
            }
        }

        if self.timeout.is_zero() {
            return Err(DescriptorError::ZeroTimeout(name));
        }

        if let Err(reason) = self.retry_policy.validate() {
            return Err(DescriptorError::InvalidRetryPolicy { tool: name, reason });
        }

        let derived = derive_schemas(&self.signature);
        let description = self
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("Tool: {name}"));

        Ok(ToolDescriptor {
            name,
            description,
            input_schema: derived.input,
            output_schema: derived.output,
            injections: derived.injections,
            handler,
            timeout: self.timeout,
            retry_policy: self.retry_policy,
            fire_and_forget: self.fire_and_forget,
            profiles: self.profiles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::JsonType;
    use serde_json::json;

    fn noop() -> ToolHandler {
        ToolHandler::from_blocking(|_| Ok(Value::Null))
    }

    #[test]
    fn test_build_with_defaults() {
        let tool = ToolDescriptor::builder("lookup")
            .param::<String>("query")
            .handler(noop())
            .build()
            .unwrap();

        assert_eq!(tool.name(), "lookup");
        assert_eq!(tool.description(), "Tool: lookup");
        assert_eq!(tool.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(tool.retry_policy(), &ToolRetryPolicy::default());
        assert!(!tool.fire_and_forget());
        assert!(tool.profiles().is_empty());
        assert!(tool.output_schema().is_unconstrained());
        assert!(tool.input_schema().is_required("query"));
    }

    #[test]
    fn test_doc_first_line() {
        let tool = ToolDescriptor::builder("greet")
            .doc("\n  Greet a user by name.\n\n  Longer text here.\n")
            .handler(noop())
            .build()
            .unwrap();
        assert_eq!(tool.description(), "Greet a user by name.");
    }

    #[test]
    fn test_optional_param_not_required() {
        let tool = ToolDescriptor::builder("search")
            .param::<String>("query")
            .optional_param::<String>("cursor")
            .param_with_default::<i64>("limit", 10)
            .handler(noop())
            .build()
            .unwrap();

        let schema = tool.input_schema();
        assert_eq!(schema.required(), ["query".to_string()]);
        assert_eq!(
            serde_json::to_value(schema.property("cursor").unwrap()).unwrap(),
            json!({"type": "string", "nullable": true})
        );
        assert_eq!(
            schema.property("limit").unwrap().default,
            Some(json!(10))
        );
    }

    #[test]
    fn test_injection_declared() {
        let tool = ToolDescriptor::builder("greet")
            .param::<String>("greeting")
            .inject::<String>("user_id", InjectMarker::key("user_id"))
            .handler(noop())
            .build()
            .unwrap();

        assert_eq!(tool.input_schema().property_names(), vec!["greeting"]);
        assert_eq!(tool.injections().len(), 1);
        assert_eq!(tool.injections()[0].expected_type, Some(JsonType::String));
    }

    #[test]
    fn test_build_errors() {
        assert_eq!(
            ToolDescriptor::builder("  ").handler(noop()).build().unwrap_err(),
            DescriptorError::EmptyName
        );
        assert_eq!(
            ToolDescriptor::builder("x").build().unwrap_err(),
            DescriptorError::MissingHandler("x".into())
        );
        assert!(matches!(
            ToolDescriptor::builder("x")
                .param::<i64>("a")
                .param::<String>("a")
                .handler(noop())
                .build(),
            Err(DescriptorError::DuplicateParameter { .. })
        ));
        assert_eq!(
            ToolDescriptor::builder("x")
                .timeout(Duration::ZERO)
                .handler(noop())
                .build()
                .unwrap_err(),
            DescriptorError::ZeroTimeout("x".into())
        );
        assert!(matches!(
            ToolDescriptor::builder("x")
                .max_attempts(0)
                .handler(noop())
                .build(),
            Err(DescriptorError::InvalidRetryPolicy { .. })
        ));
    }

    #[test]
    fn test_profiles_filter() {
        let tool = ToolDescriptor::builder("x")
            .profiles(["voice", "chat"])
            .handler(noop())
            .build()
            .unwrap();

        assert!(tool.matches_profile(None));
        assert!(tool.matches_profile(Some("voice")));
        assert!(!tool.matches_profile(Some("admin")));
    }

    #[test]
    fn test_retry_policy_serializes_seconds() {
        let policy = ToolRetryPolicy::default().with_initial_interval(Duration::from_millis(500));
        assert_eq!(
            serde_json::to_value(policy).unwrap(),
            json!({"max_attempts": 3, "initial_interval": 0.5, "maximum_interval": 10.0})
        );
    }
}
