use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "confctl")]
#[command(version)]
#[command(about = "Build declarative configuration targets as a dependency graph", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build targets and watch their progress
    Build(BuildArgs),

    /// Run a build and stream its events on stdout (used by `build`)
    #[command(hide = true)]
    Worker(WorkerArgs),

    /// List the targets found under the configs root
    Targets {
        #[command(flatten)]
        root: RootArg,
    },

    /// Show how a spec is parsed
    Spec {
        /// Spec such as `//shell/zsh:plugins` or `brew::ripgrep@14`
        raw: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args, Clone, Default)]
pub struct RootArg {
    /// Configs root (overrides settings and CONFCTL_CONFIGS_ROOT)
    #[arg(short, long, value_name = "DIR")]
    pub root: Option<PathBuf>,
}

// ============================================================================
// Build
// ============================================================================

#[derive(Parser)]
pub struct BuildArgs {
    /// Targets to build, in order (the root unit always builds first)
    pub specs: Vec<String>,

    #[command(flatten)]
    pub root: RootArg,

    /// One line per event instead of the live tree
    #[arg(long)]
    pub plain: bool,
}

#[derive(Parser)]
pub struct WorkerArgs {
    pub specs: Vec<String>,

    #[command(flatten)]
    pub root: RootArg,
}
