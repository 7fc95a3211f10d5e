use anyhow::Result;
use tracing::info;

use crate::cli::ConfigCommands;
use scriptcache::config::ScriptCacheConfig;
use scriptcache::{LoadCachePolicy, LoadCacheRegistry};

pub fn run(command: ConfigCommands, config_path: Option<String>) -> Result<()> {
    match command {
        ConfigCommands::Validate { path } => validate(&path),
        ConfigCommands::Generate { template } => generate(&template),
        ConfigCommands::Show => show(config_path),
    }
}

fn validate(path: &str) -> Result<()> {
    info!("Validating config file: {}", path);

    let config = ScriptCacheConfig::from_file(path)?;
    config.validate()?;
    let registry = LoadCacheRegistry::from_config(&config.load_cache)?;

    println!("✓ Configuration file is valid: {}", path);
    println!("\nSummary:");
    println!(
        "  - Load cache eviction: {}",
        config.load_cache.eviction_policy
    );
    if let LoadCachePolicy::Lru { max_entries } = registry.policy() {
        println!("  - Max scripts per connection: {}", max_entries);
    }
    println!(
        "  - Logging: {} ({})",
        config.observability.log_level, config.observability.log_format
    );

    Ok(())
}

fn generate(template: &str) -> Result<()> {
    info!("Generating example config for template: {}", template);

    let config_toml = match template {
        "default" => ScriptCacheConfig::example_default()?,
        "bounded" => ScriptCacheConfig::example_bounded()?,
        _ => {
            anyhow::bail!(
                "Unknown template: {}. Valid templates: default, bounded",
                template
            );
        }
    };

    println!("{}", config_toml);

    Ok(())
}

fn show(config_path: Option<String>) -> Result<()> {
    info!("Showing effective configuration");

    let config = if let Some(path) = config_path {
        ScriptCacheConfig::from_file(path)?
    } else {
        ScriptCacheConfig::default()
    };

    println!("Effective Configuration:\n");
    println!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}
