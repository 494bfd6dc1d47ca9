// Context Injection
//
// Fills hidden parameters from the per-call context map before a tool runs.
//
// Design decisions:
// - Explicit caller arguments always win over context values
// - A context value of null counts as absent
// - Nothing is cached; every call resolves against its own context

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::handler::Arguments;
use crate::schema::JsonType;

/// One parameter filled from runtime context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionDescriptor {
    /// Name of the callable's parameter
    pub parameter: String,
    /// Key looked up in the per-call context
    pub context_key: String,
    /// Fail the call when the key is missing
    pub required: bool,
    /// Expected JSON category; `None` when the declared type is unconstrained
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_type: Option<JsonType>,
}

/// Why injection failed for a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InjectionError {
    #[error("Missing required context value '{context_key}' for param '{parameter}'")]
    MissingContext {
        context_key: String,
        parameter: String,
    },

    #[error(
        "Context key '{context_key}' for param '{parameter}' expected type '{expected}', got '{actual}'"
    )]
    ValidationError {
        context_key: String,
        parameter: String,
        expected: JsonType,
        actual: JsonType,
    },
}

impl InjectionError {
    pub fn parameter(&self) -> &str {
        match self {
            InjectionError::MissingContext { parameter, .. }
            | InjectionError::ValidationError { parameter, .. } => parameter,
        }
    }
}

/// Merge context values into `arguments` for every declared injection.
///
/// Returns the final argument set; the input maps are left untouched.
/// Descriptors are processed in order and the first failure is returned.
pub fn resolve_injections(
    injections: &[InjectionDescriptor],
    arguments: &Arguments,
    context: Option<&Arguments>,
) -> Result<Arguments, InjectionError> {
    let mut resolved = arguments.clone();

    for injection in injections {
        if resolved.contains_key(&injection.parameter) {
            continue;
        }

        let value = context
            .and_then(|ctx| ctx.get(&injection.context_key))
            .filter(|v| !v.is_null());

        let Some(value) = value else {
            if injection.required {
                return Err(InjectionError::MissingContext {
                    context_key: injection.context_key.clone(),
                    parameter: injection.parameter.clone(),
                });
            }
            continue;
        };

        if let Some(expected) = injection.expected_type {
            if !expected.accepts(value) {
                return Err(InjectionError::ValidationError {
                    context_key: injection.context_key.clone(),
                    parameter: injection.parameter.clone(),
                    expected,
                    actual: JsonType::of(value),
                });
            }
        }

        resolved.insert(injection.parameter.clone(), value.clone());
    }

    Ok(resolved)
}

/// Build an argument map from `(key, value)` pairs.
pub fn arguments<I, K>(pairs: I) -> Arguments
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_id(required: bool) -> InjectionDescriptor {
        InjectionDescriptor {
            parameter: "user_id".to_string(),
            context_key: "uid".to_string(),
            required,
            expected_type: Some(JsonType::String),
        }
    }

    #[test]
    fn test_fills_from_context() {
        let args = arguments([("query", json!("hi"))]);
        let ctx = arguments([("uid", json!("u-1"))]);

        let resolved = resolve_injections(&[user_id(true)], &args, Some(&ctx)).unwrap();
        assert_eq!(resolved["user_id"], json!("u-1"));
        assert_eq!(resolved["query"], json!("hi"));
        assert!(!args.contains_key("user_id"));
    }

    #[test]
    fn test_explicit_argument_wins() {
        let args = arguments([("user_id", json!("explicit"))]);
        let ctx = arguments([("uid", json!("from-context"))]);

        let resolved = resolve_injections(&[user_id(true)], &args, Some(&ctx)).unwrap();
        assert_eq!(resolved["user_id"], json!("explicit"));
    }

    #[test]
    fn test_missing_required() {
        let err = resolve_injections(&[user_id(true)], &Arguments::new(), None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required context value 'uid' for param 'user_id'"
        );
        assert_eq!(err.parameter(), "user_id");
    }

    #[test]
    fn test_null_counts_as_absent() {
        let ctx = arguments([("uid", Value::Null)]);
        let err = resolve_injections(&[user_id(true)], &Arguments::new(), Some(&ctx)).unwrap_err();
        assert!(matches!(err, InjectionError::MissingContext { .. }));

        let resolved =
            resolve_injections(&[user_id(false)], &Arguments::new(), Some(&ctx)).unwrap();
        assert!(!resolved.contains_key("user_id"));
    }

    #[test]
    fn test_optional_missing_is_skipped() {
        let resolved = resolve_injections(&[user_id(false)], &Arguments::new(), None).unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_type_mismatch() {
        let ctx = arguments([("uid", json!(42))]);
        let err = resolve_injections(&[user_id(true)], &Arguments::new(), Some(&ctx)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("string"));
        assert!(message.contains("integer"));
        assert_eq!(
            message,
            "Context key 'uid' for param 'user_id' expected type 'string', got 'integer'"
        );
    }

    #[test]
    fn test_unconstrained_accepts_anything() {
        let descriptor = InjectionDescriptor {
            expected_type: None,
            ..user_id(true)
        };
        let ctx = arguments([("uid", json!({"nested": [1, 2]}))]);
        let resolved = resolve_injections(&[descriptor], &Arguments::new(), Some(&ctx)).unwrap();
        assert_eq!(resolved["user_id"], json!({"nested": [1, 2]}));
    }

    #[test]
    fn test_integer_satisfies_number() {
        let descriptor = InjectionDescriptor {
            expected_type: Some(JsonType::Number),
            ..user_id(true)
        };
        let ctx = arguments([("uid", json!(7))]);
        assert!(resolve_injections(&[descriptor], &Arguments::new(), Some(&ctx)).is_ok());
    }

    #[test]
    fn test_no_state_between_calls() {
        let descriptors = [user_id(true)];
        let first = arguments([("uid", json!("a"))]);
        let second = arguments([("uid", json!("b"))]);

        let a = resolve_injections(&descriptors, &Arguments::new(), Some(&first)).unwrap();
        let b = resolve_injections(&descriptors, &Arguments::new(), Some(&second)).unwrap();
        assert_eq!(a["user_id"], json!("a"));
        assert_eq!(b["user_id"], json!("b"));
    }
}
