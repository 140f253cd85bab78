//! genesis: a self-directed agent that lives in a markdown file
//!
//! Tasks, memory and knowledge are kept in one backing file; a planner picks
//! the next step and built-in tools carry it out.

mod agent;
mod commands;
mod mind;
mod scheduler;
mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use agent::RunMode;

#[derive(Debug, Parser)]
#[command(name = "genesis")]
#[command(about = "Self-directed agent runtime over a markdown state file", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Without a subcommand, choose a task file interactively
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the life loop over a backing file
    Run {
        /// Backing file (ignored in background mode, which uses the wake file)
        file: Option<PathBuf>,

        /// Run mode
        #[arg(short, long, value_enum, default_value_t = RunMode::Foreground)]
        mode: RunMode,

        /// Keep running and ask for new tasks when idle
        #[arg(short, long)]
        forever: bool,

        /// Add this task at the front before running
        #[arg(short, long)]
        task: Option<String>,
    },

    /// Run one pending task from every file in the work directory
    Work,

    /// Choose a task file from the work directory and work through it
    Select,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Create a default config file
    Init,
    /// Show the effective configuration
    Show,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Some(Commands::Run {
            file,
            mode,
            forever,
            task,
        }) => commands::run(file, mode, forever, task).await,
        Some(Commands::Work) => commands::work().await,
        Some(Commands::Select) | None => commands::select().await,
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init => commands::config_init().await,
            ConfigAction::Show => commands::config_show().await,
            ConfigAction::Path => commands::config_path().await,
        },
    }
}
