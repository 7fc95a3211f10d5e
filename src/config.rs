use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::script::LoadCachePolicy;

/// Complete scriptcache configuration (loaded from TOML file)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ScriptCacheConfig {
    #[serde(default)]
    pub load_cache: LoadCacheConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Per-connection script upload cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadCacheConfig {
    /// Retention policy: none (keep everything) or lru
    #[serde(default = "default_eviction_policy")]
    pub eviction_policy: String,

    /// Maximum uploaded scripts remembered per connection (lru only)
    #[serde(default)]
    pub max_entries: Option<usize>,
}

impl Default for LoadCacheConfig {
    fn default() -> Self {
        Self {
            eviction_policy: default_eviction_policy(),
            max_entries: None,
        }
    }
}

impl LoadCacheConfig {
    /// Resolve into the policy used by the load cache registry
    pub fn policy(&self) -> Result<LoadCachePolicy> {
        match self.eviction_policy.as_str() {
            "none" => Ok(LoadCachePolicy::Unbounded),
            "lru" => {
                let max_entries = self
                    .max_entries
                    .context("load_cache.max_entries must be set when eviction_policy = \"lru\"")?;
                if max_entries == 0 {
                    anyhow::bail!("load_cache.max_entries must be greater than zero");
                }
                Ok(LoadCachePolicy::Lru { max_entries })
            }
            other => anyhow::bail!(
                "load_cache.eviction_policy must be one of: none, lru (got {})",
                other
            ),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// Default value functions
fn default_eviction_policy() -> String {
    "none".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl ScriptCacheConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Example configuration for long-lived processes that define scripts
    /// dynamically
    pub fn example_bounded() -> Result<String> {
        let config = ScriptCacheConfig {
            load_cache: LoadCacheConfig {
                eviction_policy: "lru".to_string(),
                max_entries: Some(1024),
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                log_format: "json".to_string(),
            },
        };

        Ok(toml::to_string_pretty(&config)?)
    }

    pub fn example_default() -> Result<String> {
        Ok(toml::to_string_pretty(&ScriptCacheConfig::default())?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.load_cache.policy()?;

        if !["trace", "debug", "info", "warn", "error"]
            .contains(&self.observability.log_level.to_lowercase().as_str())
        {
            anyhow::bail!("observability.log_level must be one of: trace, debug, info, warn, error");
        }

        if crate::logging::LogFormat::parse(&self.observability.log_format).is_none() {
            anyhow::bail!("observability.log_format must be one of: pretty, compact, json");
        }

        Ok(())
    }
}
