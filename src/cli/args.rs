//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// mediagate - cost-gated assessment for generated media
///
/// Hashes each file, reuses cached verdicts, and runs the configured stages
/// cheapest first until a required stage fails or the budget runs out.
#[derive(Parser, Debug)]
#[command(name = "mediagate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "MEDIAGATE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Assess media files through the stage pipeline
    Assess(AssessArgs),

    /// Inspect and clean the analysis cache
    Cache(CacheArgs),

    /// Show budget limits and spend
    Budget(BudgetArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the assess command
#[derive(Parser, Debug)]
pub struct AssessArgs {
    /// Files to assess
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Maximum assets in flight (default: from config)
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Rehash every file and reject cache entries on mismatch
    #[arg(long)]
    pub strict: bool,

    /// Ignore the cache for this run
    #[arg(long, conflicts_with = "strict")]
    pub no_cache: bool,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the budget command
#[derive(Parser, Debug)]
pub struct BudgetArgs {
    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Check the configuration without running anything
    Validate,
}

/// Output format for reports and listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show entry counts and size on disk
    Stats {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show the cached analysis for a file
    Show {
        /// File to look up
        path: PathBuf,

        /// Rehash instead of trusting the path index
        #[arg(long)]
        strict: bool,
    },

    /// Remove entries not accessed recently
    Gc {
        /// Remove entries older than N days (default: from config)
        #[arg(long)]
        days: Option<u32>,

        /// Dry run - show what would be removed
        #[arg(long)]
        dry_run: bool,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Remove the entry for a content hash
    Invalidate {
        /// Lowercase hex SHA-256 of the file contents
        hash: String,
    },
}
