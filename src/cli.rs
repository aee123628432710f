use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::types::RemovalRecommendation;

/// pkgbroker - Remove and restore Android packages through a privileged broker
#[derive(Parser)]
#[command(name = "pkgbroker")]
#[command(about = "Uninstall and reinstall Android packages through an elevation broker")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (defaults are used when absent)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Dry-run mode: show what would be executed without making changes.
    ///
    /// Privileged uninstall/reinstall calls are logged and skipped.
    /// Package queries still run so the preview is realistic.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show whether the broker is installed, running and authorized
    Status,
    /// Ask the broker for access
    Authorize,
    /// List packages
    List(ListArgs),
    /// Show the state of one package
    Inspect {
        /// Package name (e.g., com.example.app)
        package: String,
    },
    /// Uninstall packages
    Uninstall {
        /// Package names
        #[arg(required_unless_present = "preset")]
        packages: Vec<String>,
        /// Revert updated system apps to the factory image first
        #[arg(long)]
        reset_to_factory: bool,
        /// Also uninstall every package in this preset file
        #[arg(long)]
        preset: Option<PathBuf>,
    },
    /// Reinstall packages still present as system stubs
    Reinstall {
        /// Package names
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Community bloat list
    Bloat {
        #[command(subcommand)]
        action: BloatCommands,
    },
    /// Preset files
    Preset {
        #[command(subcommand)]
        action: PresetCommands,
    },
    /// Configuration file tools
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Args)]
pub struct ListArgs {
    /// Only installed packages
    #[arg(long, conflicts_with = "uninstalled")]
    pub installed: bool,
    /// Only uninstalled system stubs
    #[arg(long)]
    pub uninstalled: bool,
    /// Only system apps
    #[arg(long)]
    pub system: bool,
    /// Only packages with this removal recommendation
    #[arg(long)]
    pub removal: Option<RemovalRecommendation>,
    /// Case-insensitive package name filter
    #[arg(short, long)]
    pub search: Option<String>,
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum BloatCommands {
    /// Refresh the cached bloat list if upstream changed
    Update {
        /// Fetch even when the cached list is current
        #[arg(long)]
        force: bool,
    },
    /// Show the recommendation for a package
    Show {
        package: String,
    },
}

#[derive(Subcommand)]
pub enum PresetCommands {
    /// Create a preset file
    Create {
        /// Preset name
        #[arg(short, long)]
        name: String,
        /// Preset description
        #[arg(short, long, default_value = "")]
        description: String,
        /// Packages to include
        packages: Vec<String>,
        /// Include every currently uninstalled system stub
        #[arg(long)]
        from_uninstalled: bool,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the contents of a preset file
    Show {
        file: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        file: PathBuf,
    },
    /// Write the default configuration to a file
    Init {
        file: PathBuf,
    },
}
