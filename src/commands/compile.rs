use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use tracing::debug;

use crate::cli::{CompileArgs, HashArgs};
use scriptcache::script::{content_hash, CompiledTemplate, ScriptDefinition, ScriptSource};

#[derive(Serialize)]
struct CompileOutput<'a> {
    name: &'a str,
    hash: &'a str,
    keys: &'a [String],
    args: &'a [String],
    source: &'a str,
}

fn read_input(inline: Option<String>, file: Option<&str>) -> Result<String> {
    match (inline, file) {
        (Some(text), _) => Ok(text),
        (None, Some(path)) => {
            fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path))
        }
        (None, None) => anyhow::bail!("No input given"),
    }
}

pub fn compile(args: CompileArgs) -> Result<()> {
    let text = read_input(args.template, args.file.as_deref())?;
    let template = CompiledTemplate::parse(&text);

    debug!(
        references = template.tokens().len(),
        keys = args.keys.len(),
        args = args.args.len(),
        "compiling template"
    );

    let definition = ScriptDefinition::new(
        args.name.clone(),
        args.keys,
        args.args,
        ScriptSource::Template(template),
    )
    .context("Failed to compile template")?;

    if args.json {
        let output = CompileOutput {
            name: definition.name(),
            hash: definition.hash(),
            keys: definition.key_names(),
            args: definition.arg_names(),
            source: definition.source(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("-- {} ({})", definition.name(), definition.hash());
        println!("{}", definition.source());
    }

    Ok(())
}

pub fn hash(args: HashArgs) -> Result<()> {
    let source = read_input(args.source, args.file.as_deref())?;
    println!("{}", content_hash(&source));
    Ok(())
}
