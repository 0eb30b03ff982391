use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::SettingsOverrides;

#[derive(Debug, Parser)]
#[command(name = "reshelf", version)]
#[command(about = "Summarize a messy directory with a local model and reorganize it", long_about = None)]
pub struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true, env = "RESHELF_CONFIG")]
    pub config: Option<PathBuf>,

    /// Inference endpoint, e.g. http://localhost:11434
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Files extracted and summarized at once
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Summarize every file, propose a new layout, and review it
    Organize(OrganizeArgs),
    /// Summarize every file and print the results
    Summarize {
        dir: PathBuf,
    },
}

#[derive(Debug, Args)]
pub struct OrganizeArgs {
    pub dir: PathBuf,

    /// Root the proposed destinations live under (defaults to DIR)
    #[arg(long)]
    pub dest: Option<PathBuf>,

    /// Print the plan and exit without moving anything
    #[arg(long, conflicts_with = "apply_all")]
    pub dry_run: bool,

    /// Apply every proposal without prompting
    #[arg(long)]
    pub apply_all: bool,

    /// Write a JSON report of the run
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl Cli {
    pub fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            endpoint: self.endpoint.clone(),
            concurrency: self.concurrency,
        }
    }
}
