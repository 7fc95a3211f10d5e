mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use scriptcache::config::ScriptCacheConfig;
use scriptcache::logging;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ScriptCacheConfig::from_file(path)?,
        None => ScriptCacheConfig::default(),
    };
    logging::init_with_config(&config.observability);

    match cli.command {
        Commands::Compile(args) => commands::compile::compile(args),
        Commands::Hash(args) => commands::compile::hash(args),
        Commands::Config(args) => commands::config::run(args.command, cli.config),
    }
}
