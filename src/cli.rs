use clap::{Parser, Subcommand};

/// scriptcache - cached server-side script execution
///
/// Compiles named-reference script templates into the store's positional
/// calling convention and computes the content hashes used to run them.
#[derive(Parser, Debug)]
#[command(name = "scriptcache")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile and hash store scripts", long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short = 'c', long, global = true, env = "SCRIPTCACHE_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile a template with named references into positional source
    Compile(CompileArgs),

    /// Print the content hash of literal script source
    Hash(HashArgs),

    /// Configuration management utilities
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct CompileArgs {
    /// Template text, using {{keys.<name>}} and {{args.<name>}} references
    #[arg(short, long, conflicts_with = "file", required_unless_present = "file")]
    pub template: Option<String>,

    /// Read the template from a file instead
    #[arg(short, long)]
    pub file: Option<String>,

    /// Declared key names, in positional order
    #[arg(short, long, value_delimiter = ',')]
    pub keys: Vec<String>,

    /// Declared arg names, in positional order
    #[arg(short, long, value_delimiter = ',')]
    pub args: Vec<String>,

    /// Script name (used in output only)
    #[arg(short, long, default_value = "script")]
    pub name: String,

    /// Emit JSON instead of plain text
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct HashArgs {
    /// Literal script source
    #[arg(conflicts_with = "file", required_unless_present = "file")]
    pub source: Option<String>,

    /// Read the source from a file instead
    #[arg(short, long)]
    pub file: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to config file
        path: String,
    },

    /// Generate an example configuration
    Generate {
        /// Template (default, bounded)
        #[arg(short, long, default_value = "default")]
        template: String,
    },

    /// Show the effective configuration
    Show,
}
