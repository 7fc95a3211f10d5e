//! Input and return-value validation
//!
//! Every declared key and arg has a [`Validator`]; a script may also carry
//! one for its return value. Validators answer either immediately or with a
//! deferred future, and the boundary awaits both forms the same way.
//!
//! ## Ordering
//!
//! Keys are validated in declaration order, then args in declaration order.
//! The first failure stops validation; later fields are never looked at.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::template::TokenKind;
use crate::error::ScriptError;
use crate::logging::{operations, services, status};

/// One problem reported by a validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Issue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
        }
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Result of validating one value
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    /// The value is acceptable; carries the (possibly transformed) value
    Success(Value),
    Failure(Vec<Issue>),
}

impl ValidationOutcome {
    pub fn fail(message: impl Into<String>) -> Self {
        ValidationOutcome::Failure(vec![Issue::new(message)])
    }
}

/// A validator's answer, available now or later
pub enum Validation {
    Immediate(ValidationOutcome),
    Deferred(BoxFuture<'static, ValidationOutcome>),
}

impl Validation {
    pub fn deferred<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = ValidationOutcome> + Send + 'static,
    {
        Validation::Deferred(Box::pin(future))
    }

    pub async fn resolve(self) -> ValidationOutcome {
        match self {
            Validation::Immediate(outcome) => outcome,
            Validation::Deferred(future) => future.await,
        }
    }
}

impl From<ValidationOutcome> for Validation {
    fn from(outcome: ValidationOutcome) -> Self {
        Validation::Immediate(outcome)
    }
}

/// Pluggable check for a single value
///
/// `None` means the caller did not supply the field at all.
pub trait Validator: Send + Sync {
    fn validate(&self, value: Option<&Value>) -> Validation;
}

impl<F> Validator for F
where
    F: Fn(Option<&Value>) -> Validation + Send + Sync,
{
    fn validate(&self, value: Option<&Value>) -> Validation {
        self(value)
    }
}

pub type FieldValidator = Arc<dyn Validator>;

/// Commonly used validators
pub mod validators {
    use super::*;

    /// Any string, passed through unchanged
    pub fn string() -> FieldValidator {
        Arc::new(|value: Option<&Value>| -> Validation {
            Validation::Immediate(match value {
                Some(Value::String(s)) => ValidationOutcome::Success(Value::String(s.clone())),
                Some(other) => ValidationOutcome::fail(format!("expected string, got {}", other)),
                None => ValidationOutcome::fail("required"),
            })
        })
    }

    /// A non-empty string
    pub fn non_empty_string() -> FieldValidator {
        Arc::new(|value: Option<&Value>| -> Validation {
            Validation::Immediate(match value {
                Some(Value::String(s)) if !s.is_empty() => {
                    ValidationOutcome::Success(Value::String(s.clone()))
                }
                Some(Value::String(_)) => ValidationOutcome::fail("must not be empty"),
                Some(other) => ValidationOutcome::fail(format!("expected string, got {}", other)),
                None => ValidationOutcome::fail("required"),
            })
        })
    }

    /// An integer (number or decimal string), rendered as a string
    pub fn integer() -> FieldValidator {
        Arc::new(|value: Option<&Value>| -> Validation {
            Validation::Immediate(match value.and_then(as_integer) {
                Some(n) => ValidationOutcome::Success(Value::String(n.to_string())),
                None if value.is_none() => ValidationOutcome::fail("required"),
                None => ValidationOutcome::fail("expected integer"),
            })
        })
    }

    /// A strictly positive integer, rendered as a string
    pub fn positive_integer() -> FieldValidator {
        Arc::new(|value: Option<&Value>| -> Validation {
            Validation::Immediate(match value.and_then(as_integer) {
                Some(n) if n > 0 => ValidationOutcome::Success(Value::String(n.to_string())),
                Some(_) => ValidationOutcome::fail("must be positive"),
                None if value.is_none() => ValidationOutcome::fail("required"),
                None => ValidationOutcome::fail("expected integer"),
            })
        })
    }

    /// One of a fixed set of strings
    pub fn one_of(allowed: &[&str]) -> FieldValidator {
        let allowed: Vec<String> = allowed.iter().map(|s| s.to_string()).collect();
        Arc::new(move |value: Option<&Value>| -> Validation {
            Validation::Immediate(match value {
                Some(Value::String(s)) if allowed.contains(s) => {
                    ValidationOutcome::Success(Value::String(s.clone()))
                }
                _ => ValidationOutcome::fail(format!("expected one of: {}", allowed.join(", "))),
            })
        })
    }

    /// Substitute `default` when the field is missing, then apply `inner`
    pub fn with_default(inner: FieldValidator, default: Value) -> FieldValidator {
        Arc::new(move |value: Option<&Value>| -> Validation {
            inner.validate(Some(value.unwrap_or(&default)))
        })
    }

    /// A number (integer, float, or numeric string), returned as a JSON number
    pub fn number() -> FieldValidator {
        Arc::new(|value: Option<&Value>| -> Validation {
            let parsed = match value {
                Some(Value::Number(n)) => Some(Value::Number(n.clone())),
                Some(Value::String(s)) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number),
                _ => None,
            };
            Validation::Immediate(match parsed {
                Some(n) => ValidationOutcome::Success(n),
                None => ValidationOutcome::fail("expected number"),
            })
        })
    }

    /// A string holding JSON, returned parsed
    pub fn json() -> FieldValidator {
        Arc::new(|value: Option<&Value>| -> Validation {
            Validation::Immediate(match value {
                Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
                    Ok(parsed) => ValidationOutcome::Success(parsed),
                    Err(e) => ValidationOutcome::fail(format!("invalid JSON: {}", e)),
                },
                _ => ValidationOutcome::fail("expected JSON string"),
            })
        })
    }

    /// Adapt an async check; the value is cloned into the future
    pub fn deferred<F, Fut>(check: F) -> FieldValidator
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ValidationOutcome> + Send + 'static,
    {
        Arc::new(move |value: Option<&Value>| -> Validation {
            Validation::deferred(check(value.cloned()))
        })
    }

    fn as_integer(value: &Value) -> Option<i64> {
        match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }
}

/// Caller-supplied values for a script's declared fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptInput {
    pub keys: HashMap<String, Value>,
    pub args: HashMap<String, Value>,
}

impl ScriptInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keys.insert(name.into(), value.into());
        self
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }
}

/// Validated, positional key and arg values ready for the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedInput {
    pub keys: Vec<String>,
    pub args: Vec<String>,
}

/// Per-script sequencing of field and return validation
pub struct ValidationBoundary {
    script: String,
    keys: Vec<(String, FieldValidator)>,
    args: Vec<(String, FieldValidator)>,
    returns: Option<FieldValidator>,
}

impl ValidationBoundary {
    pub fn new(
        script: impl Into<String>,
        keys: Vec<(String, FieldValidator)>,
        args: Vec<(String, FieldValidator)>,
        returns: Option<FieldValidator>,
    ) -> Self {
        Self {
            script: script.into(),
            keys,
            args,
            returns,
        }
    }

    /// Validate every declared field in order, stopping at the first failure
    pub async fn validate_inputs(&self, input: &ScriptInput) -> Result<ResolvedInput, ScriptError> {
        let keys = self
            .validate_fields(TokenKind::Key, &self.keys, &input.keys)
            .await?;
        let args = self
            .validate_fields(TokenKind::Arg, &self.args, &input.args)
            .await?;

        Ok(ResolvedInput { keys, args })
    }

    async fn validate_fields(
        &self,
        kind: TokenKind,
        fields: &[(String, FieldValidator)],
        values: &HashMap<String, Value>,
    ) -> Result<Vec<String>, ScriptError> {
        let mut resolved = Vec::with_capacity(fields.len());

        for (name, validator) in fields {
            let path = format!("{}.{}", kind.namespace(), name);

            match validator.validate(values.get(name)).resolve().await {
                ValidationOutcome::Success(Value::String(s)) => resolved.push(s),
                ValidationOutcome::Success(other) => {
                    return Err(ScriptError::SchemaContract {
                        script: self.script.clone(),
                        path,
                        value: other,
                    });
                }
                ValidationOutcome::Failure(issues) => {
                    debug!(
                        service = services::VALIDATION,
                        operation = operations::VALIDATE_INPUT,
                        status = status::INVALID,
                        script = %self.script,
                        path = %path,
                        issue_count = issues.len(),
                        "input rejected"
                    );
                    return Err(ScriptError::InputValidation {
                        script: self.script.clone(),
                        path,
                        issues,
                    });
                }
            }
        }

        Ok(resolved)
    }

    /// Validate the raw result, or pass it through untouched when no return
    /// validator is configured
    pub async fn validate_return(&self, raw: Value) -> Result<Value, ScriptError> {
        let Some(validator) = &self.returns else {
            return Ok(raw);
        };

        match validator.validate(Some(&raw)).resolve().await {
            ValidationOutcome::Success(value) => Ok(value),
            ValidationOutcome::Failure(issues) => {
                debug!(
                    service = services::VALIDATION,
                    operation = operations::VALIDATE_RETURN,
                    status = status::INVALID,
                    script = %self.script,
                    issue_count = issues.len(),
                    "return value rejected"
                );
                Err(ScriptError::ReturnValidation {
                    script: self.script.clone(),
                    issues,
                    raw,
                })
            }
        }
    }

    pub fn has_return_validator(&self) -> bool {
        self.returns.is_some()
    }
}
