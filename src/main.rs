use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "framework")]
#[command(version, about = "Multi-agent coding pipeline orchestrator")]
pub struct Cli {
    /// Project root (defaults to the current directory)
    #[arg(short = 'p', long = "project", global = true)]
    pub project: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage features
    Feature {
        #[command(subcommand)]
        command: FeatureCommands,
    },
    /// Print pipeline status with counts
    Status,
    /// Print next-step instructions for a human driver
    Guided,
    /// Drive the pipeline until drained or escalated
    Autoplay {
        /// Override execution_mode for this run
        #[arg(long, value_parser = ["team", "orchestrator"])]
        mode: Option<String>,
        /// Merge PRs automatically (overrides safe_mode/auto_merge)
        #[arg(long)]
        auto_merge: bool,
    },
    /// Architecture blob import/export
    Arch {
        #[command(subcommand)]
        command: ArchCommands,
    },
    /// Start the read-model dashboard server
    Dashboard {
        #[arg(long, default_value = "4400")]
        port: u16,
    },
    /// OpenSpec integration
    Openspec {
        #[command(subcommand)]
        command: OpenspecCommands,
    },
    /// Read or write configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum FeatureCommands {
    /// List features, one per line
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        assigned: Option<String>,
    },
    /// Print one feature as JSON
    Get { id: String },
    /// Create a feature with the next available id
    Create {
        #[arg(short = 'd', long)]
        description: String,
        #[arg(short = 'c', long)]
        category: Option<String>,
        /// Dependency feature ids (comma-separated)
        #[arg(long, value_delimiter = ',')]
        depends: Vec<String>,
        /// OpenSpec reference path
        #[arg(long)]
        openspec: Option<String>,
        /// Architecture compliance ids (comma-separated)
        #[arg(long, value_delimiter = ',')]
        compliance: Vec<String>,
    },
    /// Partially update a feature
    Update {
        id: String,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        passes: Option<bool>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Delete a feature
    Delete {
        id: String,
        #[arg(long)]
        force: bool,
    },
    /// Write all features to a JSON file
    Export {
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
    /// Read features back from a JSON file
    Import {
        #[arg(short = 'i', long)]
        input: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ArchCommands {
    /// Copy architecture JSON files into the store
    Import,
    /// Write architecture blobs back out as JSON files
    Export,
}

#[derive(Subcommand)]
pub enum OpenspecCommands {
    /// Install the OpenSpec CLI (best-effort)
    Install,
    /// Re-run the OpenSpec project update
    Refresh,
    /// Print CLI version and active changes
    Status,
    /// Import a change (or all active changes) into features
    Import {
        change: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Archive a change once all its features are complete
    Archive { feature_id: String },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print one config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = match cli.project.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Feature { command } => cmd::cmd_feature(&root, command)?,
        Commands::Status => cmd::cmd_status(&root)?,
        Commands::Guided => cmd::cmd_guided(&root)?,
        Commands::Autoplay { mode, auto_merge } => {
            cmd::cmd_autoplay(&root, mode.as_deref(), *auto_merge).await?
        }
        Commands::Arch { command } => cmd::cmd_arch(&root, command)?,
        Commands::Dashboard { port } => cmd::cmd_dashboard(&root, *port).await?,
        Commands::Openspec { command } => cmd::cmd_openspec(&root, command).await?,
        Commands::Config { command } => cmd::cmd_config(&root, command)?,
    }

    Ok(())
}
