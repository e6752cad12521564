//! Command line interface definition

use clap::{Parser, Subcommand};
use kiln_types::{ColorChoice, EmptyGlobPolicy};
use std::path::PathBuf;

/// kiln - Declarative container image builder
#[derive(Parser)]
#[command(name = "kiln")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Declarative container image builder")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global arguments available for all commands
#[derive(Parser)]
pub struct GlobalArgs {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Write debug logs to the kiln log directory
    #[arg(long, global = true)]
    pub debug: bool,

    /// Color output control
    #[arg(long, global = true, value_enum)]
    pub color: Option<ColorChoice>,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Build an image from a recipe
    #[command(alias = "b")]
    Build {
        /// Path to the recipe file
        recipe: PathBuf,

        /// Build context that copy steps read from (defaults to the recipe's directory)
        #[arg(short, long, value_name = "DIR")]
        source: Option<PathBuf>,

        /// Image output directory (defaults to <output_dir>/<name>)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// What to do when a copy or permission pattern matches nothing
        #[arg(long, value_enum, value_name = "POLICY")]
        empty_glob: Option<EmptyGlobPolicy>,

        /// Directory seeding the image filesystem before the first step
        #[arg(long, value_name = "DIR")]
        base_rootfs: Option<PathBuf>,

        /// Default per-command timeout in seconds (0 = none)
        #[arg(long, value_name = "SECONDS")]
        step_timeout: Option<u64>,

        /// Timeout for the whole step sequence in seconds (0 = none)
        #[arg(long, value_name = "SECONDS")]
        sequence_timeout: Option<u64>,
    },

    /// Show the ordered step list of a recipe without running it
    Plan {
        /// Path to the recipe file
        recipe: PathBuf,
    },

    /// Show the descriptor of a finalized image
    Inspect {
        /// Image output directory
        output: PathBuf,
    },
}

impl Commands {
    /// Name used in operation events and logs
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Build { .. } => "build",
            Commands::Plan { .. } => "plan",
            Commands::Inspect { .. } => "inspect",
        }
    }
}
