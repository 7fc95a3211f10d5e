//! Structured logging utilities for scriptcache
//!
//! All logs use structured fields so they can be filtered and aggregated.
//!
//! # Log Format Conventions
//!
//! - `service`: The component emitting the event ("script.engine", ...)
//! - `operation`: What it was doing ("eval", "load", ...)
//! - `status`: The result ("success", "miss", "error", ...)
//! - `script`: Script name
//! - `hash`: Script content hash (hex)
//! - `connection`: Connection identifier
//!
//! # Examples
//!
//! ```rust
//! use tracing::debug;
//!
//! debug!(
//!     service = "script.load_cache",
//!     operation = "load",
//!     status = "miss",
//!     hash = "e0e1f9fabfc9d4800c877a703b823ac0578ff8db",
//!     "uploading script"
//! );
//! ```

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

use crate::config::ObservabilityConfig;

/// Prints "(scriptcache)" instead of the full module path
struct ScriptCacheFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for ScriptCacheFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();

        write!(writer, "{} ", timestamp())?;

        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m", // Red
                tracing::Level::WARN => "\x1b[33m",  // Yellow
                tracing::Level::INFO => "\x1b[32m",  // Green
                tracing::Level::DEBUG => "\x1b[34m", // Blue
                tracing::Level::TRACE => "\x1b[35m", // Magenta
            };
            write!(
                writer,
                "{}{:5}(scriptcache)\x1b[0m: ",
                level_style,
                meta.level()
            )?;
        } else {
            write!(writer, "{:5}(scriptcache): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Current UTC time in RFC 3339 with microseconds
fn timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string()
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored
    Pretty,
    /// Same layout without colors (CI)
    Compact,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    /// Parse a format name; unknown names yield `None`
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "compact" | "text" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }

    /// Format named by SCRIPTCACHE_LOG_FORMAT, if set to a known name
    pub fn from_env() -> Option<Self> {
        std::env::var("SCRIPTCACHE_LOG_FORMAT")
            .ok()
            .and_then(|v| Self::parse(&v))
    }

    /// Environment first, then the configured name, then compact under CI
    /// and pretty otherwise
    pub fn resolve(configured: &str) -> Self {
        Self::from_env()
            .or_else(|| Self::parse(configured))
            .unwrap_or_else(Self::default_for_environment)
    }

    fn default_for_environment() -> Self {
        if std::env::var("CI").is_ok() {
            Self::Compact
        } else {
            Self::Pretty
        }
    }
}

/// Initialize the global tracing subscriber from configuration
///
/// # Environment Variables
///
/// - `RUST_LOG`: Log level filter, overrides `log_level` (e.g., "scriptcache=trace")
/// - `SCRIPTCACHE_LOG_FORMAT`: "pretty", "compact" or "json", overrides `log_format`
/// - `CI`: If set and no format is given, defaults to compact format
pub fn init_with_config(config: &ObservabilityConfig) {
    install(
        default_filter(&config.log_level),
        LogFormat::resolve(&config.log_format),
    );
}

fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn install(filter: EnvFilter, format: LogFormat) {
    // A subscriber may already be set (tests, embedding applications)
    let _ = match format {
        LogFormat::Pretty | LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(ScriptCacheFormatter {
                        with_ansi: format == LogFormat::Pretty,
                    })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false)
                    .with_writer(io::stderr)
                    .json(),
            )
            .try_init(),
    };
}

/// Service names for consistent logging
pub mod services {
    pub const ENGINE: &str = "script.engine";
    pub const LOAD_CACHE: &str = "script.load_cache";
    pub const VALIDATION: &str = "script.validation";
}

/// Operation names for consistent logging
pub mod operations {
    pub const EVAL: &str = "eval";
    pub const LOAD: &str = "load";
    pub const EVICT: &str = "evict";
    pub const VALIDATE_INPUT: &str = "validate_input";
    pub const VALIDATE_RETURN: &str = "validate_return";
}

/// Status values for consistent logging
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
    pub const ERROR: &str = "error";
    pub const INVALID: &str = "invalid";
}
