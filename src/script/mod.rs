//! Named scripts executed against a remote store by content hash
//!
//! A [`Script`] is defined once from [`ScriptOptions`] and then run any
//! number of times:
//!
//! 1. Caller values pass through the script's [`ValidationBoundary`]
//! 2. The store runs the script by hash, uploading it first if needed
//! 3. The raw reply is checked by the return validator, if one is set

pub mod definition;
pub mod engine;
pub mod load_cache;
pub mod template;
pub mod validation;

use serde_json::Value;

pub use definition::{content_hash, ScriptDefinition, ScriptSource, TokenAccessors};
pub use load_cache::{ConnectionLoadCache, LoadCachePolicy, LoadCacheRegistry};
pub use template::{compile, CompiledTemplate, LuaToken, TemplateBuilder, TokenKind};
pub use validation::{
    validators, FieldValidator, Issue, ResolvedInput, ScriptInput, Validation, ValidationBoundary,
    ValidationOutcome, Validator,
};

use crate::error::ScriptError;
use crate::transport::Connection;

/// Everything needed to define a script
pub struct ScriptOptions {
    name: String,
    source: ScriptSource,
    keys: Vec<(String, FieldValidator)>,
    args: Vec<(String, FieldValidator)>,
    returns: Option<FieldValidator>,
}

impl ScriptOptions {
    pub fn new(name: impl Into<String>, source: ScriptSource) -> Self {
        Self {
            name: name.into(),
            source,
            keys: Vec::new(),
            args: Vec::new(),
            returns: None,
        }
    }

    /// Declare the next key; declaration order fixes its `KEYS` index
    pub fn key(mut self, name: impl Into<String>, validator: FieldValidator) -> Self {
        self.keys.push((name.into(), validator));
        self
    }

    /// Declare the next arg; declaration order fixes its `ARGV` index
    pub fn arg(mut self, name: impl Into<String>, validator: FieldValidator) -> Self {
        self.args.push((name.into(), validator));
        self
    }

    /// Validate (and possibly transform) the raw reply
    pub fn returns(mut self, validator: FieldValidator) -> Self {
        self.returns = Some(validator);
        self
    }
}

/// A defined script, ready to run on any connection
pub struct Script {
    definition: ScriptDefinition,
    boundary: ValidationBoundary,
}

impl Script {
    /// Define a script, compiling its template now so reference errors
    /// surface before anything touches the network
    pub fn define(options: ScriptOptions) -> Result<Self, ScriptError> {
        let key_names = options.keys.iter().map(|(name, _)| name.clone()).collect();
        let arg_names = options.args.iter().map(|(name, _)| name.clone()).collect();
        let definition =
            ScriptDefinition::new(options.name.clone(), key_names, arg_names, options.source)?;
        let boundary =
            ValidationBoundary::new(options.name, options.keys, options.args, options.returns);

        Ok(Self {
            definition,
            boundary,
        })
    }

    /// Validate `input`, run the script, and validate the reply
    pub async fn run(&self, connection: &Connection, input: &ScriptInput) -> Result<Value, ScriptError> {
        let resolved = self.boundary.validate_inputs(input).await?;
        let raw = engine::execute(connection, &self.definition, &resolved.keys, &resolved.args).await?;
        self.boundary.validate_return(raw).await
    }

    /// Run with already positional keys and args, skipping all validation
    pub async fn run_raw(
        &self,
        connection: &Connection,
        keys: &[String],
        args: &[String],
    ) -> Result<Value, ScriptError> {
        engine::execute(connection, &self.definition, keys, args).await
    }

    pub fn definition(&self) -> &ScriptDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn hash(&self) -> &str {
        self.definition.hash()
    }
}
