use serde_json::Value;
use thiserror::Error;

use crate::script::template::TokenKind;
use crate::script::validation::Issue;
use crate::transport::TransportError;

/// Errors surfaced by script definition and execution
#[derive(Error, Debug, Clone)]
pub enum ScriptError {
    /// A template referenced a key or arg that was never declared
    #[error("template references undeclared {kind} `{name}`")]
    UnknownReference { kind: TokenKind, name: String },

    /// The same name was declared twice for one script
    #[error("{kind} `{name}` is declared more than once")]
    DuplicateName { kind: TokenKind, name: String },

    /// A template builder produced something that is not a well-formed template
    #[error("template builder contract violated: {0}")]
    BuilderContract(String),

    /// Execute or upload failed for a reason other than an unknown script
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A declared key or arg failed its validator
    #[error("script `{script}`: invalid input at {path}: {}", join_issues(.issues))]
    InputValidation {
        script: String,
        path: String,
        issues: Vec<Issue>,
    },

    /// The raw result failed the return validator
    #[error("script `{script}`: invalid return value: {}", join_issues(.issues))]
    ReturnValidation {
        script: String,
        issues: Vec<Issue>,
        raw: Value,
    },

    /// A key or arg validator produced a value that is not a string
    #[error("script `{script}`: validator for {path} must produce a string, got {value}")]
    SchemaContract {
        script: String,
        path: String,
        value: Value,
    },
}

fn join_issues(issues: &[Issue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ScriptError {
    /// Whether the error came from caller-supplied data rather than the
    /// script definition or the store
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ScriptError::InputValidation { .. } | ScriptError::ReturnValidation { .. }
        )
    }
}
