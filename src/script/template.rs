/// Script templates with named key/arg references
///
/// A template is literal source text interleaved with references to declared
/// key and arg names. Compiling a template against the declared name lists
/// rewrites every reference into the store's positional form (`KEYS[n]` /
/// `ARGV[n]`) and leaves every other byte untouched.
use std::collections::HashMap;
use std::fmt;

use crate::error::ScriptError;

/// Which positional table a reference indexes into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Key,
    Arg,
}

impl TokenKind {
    /// Name of the store-side table (`KEYS` or `ARGV`)
    pub fn table(self) -> &'static str {
        match self {
            TokenKind::Key => "KEYS",
            TokenKind::Arg => "ARGV",
        }
    }

    /// Prefix used in field paths and in the text template form
    pub fn namespace(self) -> &'static str {
        match self {
            TokenKind::Key => "keys",
            TokenKind::Arg => "args",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Key => f.write_str("key"),
            TokenKind::Arg => f.write_str("arg"),
        }
    }
}

/// Reference to one declared key or arg inside a template
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LuaToken {
    pub kind: TokenKind,
    pub name: String,
}

impl LuaToken {
    pub fn key(name: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Key,
            name: name.into(),
        }
    }

    pub fn arg(name: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Arg,
            name: name.into(),
        }
    }
}

/// Literal segments with references between them
///
/// Always holds exactly one more segment than references: reference `i`
/// sits between segment `i` and segment `i + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTemplate {
    segments: Vec<String>,
    tokens: Vec<LuaToken>,
}

impl CompiledTemplate {
    /// Assemble a template from raw parts
    pub fn from_parts(segments: Vec<String>, tokens: Vec<LuaToken>) -> Result<Self, ScriptError> {
        if segments.len() != tokens.len() + 1 {
            return Err(ScriptError::BuilderContract(format!(
                "expected {} literal segments around {} references, got {}",
                tokens.len() + 1,
                tokens.len(),
                segments.len()
            )));
        }

        Ok(Self { segments, tokens })
    }

    /// Start building a template fragment by fragment
    pub fn builder() -> TemplateBuilder {
        TemplateBuilder::default()
    }

    /// Parse the text form, where `{{keys.name}}` and `{{args.name}}` mark
    /// references and everything else is literal
    ///
    /// A `{{` that does not open a well-formed reference (a Lua table
    /// constructor such as `{{1, 2}}`, for instance) is kept as literal text.
    pub fn parse(text: &str) -> Self {
        let mut builder = TemplateBuilder::default();
        let mut literal_start = 0;
        let mut pos = 0;

        while let Some(offset) = text[pos..].find("{{") {
            let open = pos + offset;
            match match_reference(&text[open + 2..]) {
                Some((token, consumed)) => {
                    builder = builder.text(&text[literal_start..open]).token(token);
                    pos = open + 2 + consumed;
                    literal_start = pos;
                }
                None => pos = open + 1,
            }
        }

        builder.text(&text[literal_start..]).build()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn tokens(&self) -> &[LuaToken] {
        &self.tokens
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | ':')
}

/// Match `keys.<name> }}` / `args.<name> }}` right after an opening `{{`,
/// returning the token and the number of bytes consumed including `}}`
fn match_reference(rest: &str) -> Option<(LuaToken, usize)> {
    let close = rest.find("}}")?;
    let (namespace, name) = rest[..close].trim().split_once('.')?;
    let name = name.trim();
    if name.is_empty() || !name.chars().all(is_name_char) {
        return None;
    }

    let token = match namespace.trim() {
        "keys" => LuaToken::key(name),
        "args" => LuaToken::arg(name),
        _ => return None,
    };
    Some((token, close + 2))
}

/// Incremental constructor for [`CompiledTemplate`]
#[derive(Debug, Clone)]
pub struct TemplateBuilder {
    segments: Vec<String>,
    tokens: Vec<LuaToken>,
}

impl Default for TemplateBuilder {
    fn default() -> Self {
        Self {
            segments: vec![String::new()],
            tokens: Vec::new(),
        }
    }
}

impl TemplateBuilder {
    /// Append literal text
    pub fn text(mut self, text: &str) -> Self {
        if let Some(last) = self.segments.last_mut() {
            last.push_str(text);
        }
        self
    }

    /// Append a reference
    pub fn token(mut self, token: LuaToken) -> Self {
        self.tokens.push(token);
        self.segments.push(String::new());
        self
    }

    pub fn build(self) -> CompiledTemplate {
        CompiledTemplate {
            segments: self.segments,
            tokens: self.tokens,
        }
    }
}

fn index_table(names: &[String]) -> HashMap<&str, usize> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i + 1))
        .collect()
}

/// Rewrite every reference in `template` into its positional form
///
/// Indices are 1-based and follow the order of `key_names` / `arg_names`.
/// Fails on the first reference whose name is not declared.
pub fn compile(
    template: &CompiledTemplate,
    key_names: &[String],
    arg_names: &[String],
) -> Result<String, ScriptError> {
    let keys = index_table(key_names);
    let args = index_table(arg_names);

    let literal_len: usize = template.segments.iter().map(String::len).sum();
    let mut out = String::with_capacity(literal_len + template.tokens.len() * 8);
    out.push_str(&template.segments[0]);

    for (token, segment) in template.tokens.iter().zip(&template.segments[1..]) {
        let table = match token.kind {
            TokenKind::Key => &keys,
            TokenKind::Arg => &args,
        };
        let index = table
            .get(token.name.as_str())
            .ok_or_else(|| ScriptError::UnknownReference {
                kind: token.kind,
                name: token.name.clone(),
            })?;

        out.push_str(token.kind.table());
        out.push('[');
        out.push_str(&index.to_string());
        out.push(']');
        out.push_str(segment);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_compile_set_example() {
        let template = CompiledTemplate::builder()
            .text("SET ")
            .token(LuaToken::key("k"))
            .text(" ")
            .token(LuaToken::arg("v"))
            .build();

        let source = compile(&template, &names(&["k"]), &names(&["v"])).unwrap();
        assert_eq!(source, "SET KEYS[1] ARGV[1]");
    }

    #[test]
    fn test_compile_is_deterministic() {
        let template = CompiledTemplate::parse(
            "local n = redis.call('INCR', {{keys.counter}})\nreturn n + {{args.step}}",
        );
        let keys = names(&["counter"]);
        let args = names(&["step"]);

        let first = compile(&template, &keys, &args).unwrap();
        let second = compile(&template, &keys, &args).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_repeated_reference_resolves_to_same_index() {
        let template =
            CompiledTemplate::parse("{{keys.b}} {{keys.a}} {{keys.b}} {{args.x}} {{args.x}}");

        let source = compile(&template, &names(&["a", "b"]), &names(&["x"])).unwrap();
        assert_eq!(source, "KEYS[2] KEYS[1] KEYS[2] ARGV[1] ARGV[1]");
    }

    #[test]
    fn test_unknown_reference_is_rejected() {
        let template = CompiledTemplate::parse("return {{args.missing}}");

        let err = compile(&template, &names(&["k"]), &names(&["v"])).unwrap_err();
        match err {
            ScriptError::UnknownReference { kind, name } => {
                assert_eq!(kind, TokenKind::Arg);
                assert_eq!(name, "missing");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_key_name_is_not_an_arg() {
        let template = CompiledTemplate::parse("return {{args.k}}");
        assert!(compile(&template, &names(&["k"]), &[]).is_err());
    }

    #[test]
    fn test_literal_text_is_preserved() {
        let text = "  -- comment {not a ref}\n\tlocal x = {{keys.k}}  \r\n";
        let template = CompiledTemplate::parse(text);

        let source = compile(&template, &names(&["k"]), &[]).unwrap();
        assert_eq!(source, "  -- comment {not a ref}\n\tlocal x = KEYS[1]  \r\n");
    }

    #[test]
    fn test_nested_table_constructor_is_literal() {
        let template = CompiledTemplate::parse("local t = {{1, 2}, {3, 4}}\nreturn {{keys.k}}");
        assert_eq!(template.tokens(), [LuaToken::key("k")]);

        let source = compile(&template, &names(&["k"]), &[]).unwrap();
        assert_eq!(source, "local t = {{1, 2}, {3, 4}}\nreturn KEYS[1]");
    }

    #[test]
    fn test_malformed_references_stay_literal() {
        for text in [
            "return {{keys.k",
            "return {{vars.k}}",
            "return {{keys.}}",
            "return {{keys.a}, {b}}",
        ] {
            let template = CompiledTemplate::parse(text);
            assert!(template.tokens().is_empty(), "{text}");
            assert_eq!(compile(&template, &[], &[]).unwrap(), text);
        }
    }

    #[test]
    fn test_reference_inside_extra_braces() {
        let template = CompiledTemplate::parse("return {{{keys.k}}} .. {{ args.v }}");
        let source = compile(&template, &names(&["k"]), &names(&["v"])).unwrap();
        assert_eq!(source, "return {KEYS[1]} .. ARGV[1]");
    }

    #[test]
    fn test_from_parts_checks_segment_count() {
        let ok = CompiledTemplate::from_parts(
            names(&["return ", ""]),
            vec![LuaToken::arg("v")],
        );
        assert!(ok.is_ok());

        let bad = CompiledTemplate::from_parts(names(&["return "]), vec![LuaToken::arg("v")]);
        assert!(matches!(bad, Err(ScriptError::BuilderContract(_))));
    }
}
