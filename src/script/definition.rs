/// Script definitions and content hashing
///
/// A definition fixes a script's source text and its ordered key/arg names
/// once. Template sources are compiled at definition time, so the text that
/// is hashed and sent to the store never changes afterwards.
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use super::template::{compile, CompiledTemplate, LuaToken, TokenKind};
use crate::error::ScriptError;

/// Builder callback receiving key and arg accessors
pub type TemplateFn =
    Box<dyn FnOnce(&TokenAccessors, &TokenAccessors) -> Result<CompiledTemplate, ScriptError>>;

/// Where a script's source text comes from
pub enum ScriptSource {
    /// Source already written against `KEYS[n]` / `ARGV[n]`
    Literal(String),
    /// A template whose references are compiled against the declared names
    Template(CompiledTemplate),
    /// A callback producing a template from per-name accessors
    Builder(TemplateFn),
}

impl ScriptSource {
    pub fn literal(source: impl Into<String>) -> Self {
        ScriptSource::Literal(source.into())
    }

    pub fn builder<F>(f: F) -> Self
    where
        F: FnOnce(&TokenAccessors, &TokenAccessors) -> Result<CompiledTemplate, ScriptError>
            + 'static,
    {
        ScriptSource::Builder(Box::new(f))
    }
}

impl fmt::Debug for ScriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptSource::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            ScriptSource::Template(t) => f.debug_tuple("Template").field(t).finish(),
            ScriptSource::Builder(_) => f.write_str("Builder(..)"),
        }
    }
}

/// One pre-built token per declared name of a single kind
#[derive(Debug, Clone)]
pub struct TokenAccessors {
    kind: TokenKind,
    tokens: Vec<LuaToken>,
    index: HashMap<String, usize>,
}

impl TokenAccessors {
    fn new(kind: TokenKind, names: &[String]) -> Self {
        let tokens: Vec<LuaToken> = names
            .iter()
            .map(|name| LuaToken {
                kind,
                name: name.clone(),
            })
            .collect();
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        Self {
            kind,
            tokens,
            index,
        }
    }

    /// Token for a declared name
    pub fn get(&self, name: &str) -> Result<LuaToken, ScriptError> {
        self.index
            .get(name)
            .map(|&i| self.tokens[i].clone())
            .ok_or_else(|| ScriptError::UnknownReference {
                kind: self.kind,
                name: name.to_string(),
            })
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// All tokens, in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &LuaToken> {
        self.tokens.iter()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// SHA-1 of the source bytes, lowercase hex, as the store computes it
pub fn content_hash(source: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

/// Immutable script definition
#[derive(Debug)]
pub struct ScriptDefinition {
    name: String,
    source: String,
    key_names: Vec<String>,
    arg_names: Vec<String>,
    hash: OnceLock<String>,
}

impl ScriptDefinition {
    /// Define a script
    ///
    /// Name order is significant: the n-th declared key becomes `KEYS[n]`.
    /// Builder sources are invoked exactly once, here.
    pub fn new(
        name: impl Into<String>,
        key_names: Vec<String>,
        arg_names: Vec<String>,
        source: ScriptSource,
    ) -> Result<Self, ScriptError> {
        ensure_unique(TokenKind::Key, &key_names)?;
        ensure_unique(TokenKind::Arg, &arg_names)?;

        let source = match source {
            ScriptSource::Literal(text) => text,
            ScriptSource::Template(template) => compile(&template, &key_names, &arg_names)?,
            ScriptSource::Builder(build) => {
                let keys = TokenAccessors::new(TokenKind::Key, &key_names);
                let args = TokenAccessors::new(TokenKind::Arg, &arg_names);
                let template = build(&keys, &args)?;
                compile(&template, &key_names, &arg_names)?
            }
        };

        Ok(Self {
            name: name.into(),
            source,
            key_names,
            arg_names,
            hash: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Final source text, as hashed and uploaded
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn key_names(&self) -> &[String] {
        &self.key_names
    }

    pub fn arg_names(&self) -> &[String] {
        &self.arg_names
    }

    /// Content hash of [`Self::source`], computed on first use
    pub fn hash(&self) -> &str {
        self.hash.get_or_init(|| content_hash(&self.source))
    }
}

fn ensure_unique(kind: TokenKind, names: &[String]) -> Result<(), ScriptError> {
    let mut seen = std::collections::HashSet::with_capacity(names.len());
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(ScriptError::DuplicateName {
                kind,
                name: name.clone(),
            });
        }
    }
    Ok(())
}
