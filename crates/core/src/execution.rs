// Execution request/result types shared by every backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::handler::Arguments;
use crate::injection::InjectionError;

/// Category of a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ToolNotFound,
    MissingContext,
    ValidationError,
    Timeout,
    ExecutionError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ToolNotFound => "tool_not_found",
            ErrorKind::MissingContext => "missing_context",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ExecutionError => "execution_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to run one tool.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Arguments,
    /// Values for injected parameters; never part of the public schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Arguments>,
}

impl ExecutionRequest {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            ..Self::default()
        }
    }

    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_context(mut self, context: Arguments) -> Self {
        self.context = Some(context);
        self
    }

    /// Add one argument
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    /// Add one context value
    pub fn context_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context
            .get_or_insert_with(Arguments::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Outcome of a tool call.
///
/// Exactly one of `result` (on success) and `error` (on failure) is meaningful;
/// `error_kind` is set only on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(
        rename = "error_type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Arguments>,
}

impl ExecutionResult {
    pub fn success(result: Value) -> Self {
        Self {
            success: true,
            result,
            error: None,
            error_kind: None,
            metadata: None,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(message.into()),
            error_kind: Some(kind),
            metadata: None,
        }
    }

    pub fn tool_not_found(name: &str) -> Self {
        Self::failure(ErrorKind::ToolNotFound, format!("Tool '{name}' not found"))
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Arguments::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }
}

impl From<InjectionError> for ExecutionResult {
    fn from(err: InjectionError) -> Self {
        let kind = match err {
            InjectionError::MissingContext { .. } => ErrorKind::MissingContext,
            InjectionError::ValidationError { .. } => ErrorKind::ValidationError,
        };
        Self::failure(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_builder() {
        let request = ExecutionRequest::new("greet")
            .arg("name", "Ada")
            .context_value("user_id", "u-1");

        assert_eq!(request.tool_name, "greet");
        assert_eq!(request.arguments["name"], json!("Ada"));
        assert_eq!(request.context.unwrap()["user_id"], json!("u-1"));
    }

    #[test]
    fn test_request_deserializes_without_arguments() {
        let request: ExecutionRequest = serde_json::from_value(json!({"tool_name": "x"})).unwrap();
        assert!(request.arguments.is_empty());
        assert!(request.context.is_none());
    }

    #[test]
    fn test_failure_wire_shape() {
        let result = ExecutionResult::tool_not_found("ghost");
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "success": false,
                "result": null,
                "error": "Tool 'ghost' not found",
                "error_type": "tool_not_found"
            })
        );
    }

    #[test]
    fn test_success_with_metadata() {
        let result = ExecutionResult::success(json!(8)).with_metadata("executed_via", "direct");
        assert!(result.success);
        assert!(result.error_kind.is_none());
        assert_eq!(result.metadata_value("executed_via"), Some(&json!("direct")));
    }

    #[test]
    fn test_from_injection_error() {
        let missing: ExecutionResult = InjectionError::MissingContext {
            context_key: "k".into(),
            parameter: "p".into(),
        }
        .into();
        assert_eq!(missing.error_kind, Some(ErrorKind::MissingContext));
        assert!(!missing.success);
    }
}
