use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use hypo_core::config::{LauncherConfig, parse_devices};
use hypo_core::models::CoreResult;

#[derive(Parser, Debug)]
#[command(name = "hypo", version, about = "Launch experiment runs across local devices")]
pub struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every task of a plan file and append a summary.
    Run(RunArgs),
    /// Parse a plan file and check it without running anything.
    Validate {
        plan: PathBuf,
    },
    /// Print the summaries recorded so far.
    Summary {
        #[arg(long)]
        summary: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Plan file (.yaml, .yml or .json).
    pub plan: PathBuf,
    #[arg(long)]
    pub workers: Option<usize>,
    /// Comma-separated device indices, e.g. `0,1`.
    #[arg(long)]
    pub devices: Option<String>,
    #[arg(long)]
    pub summary: Option<PathBuf>,
    #[arg(long)]
    pub experiment: Option<String>,
    #[arg(long)]
    pub device_env_var: Option<String>,
    #[arg(long)]
    pub backlog_capacity: Option<usize>,
    #[arg(long)]
    pub remove_failed_output: bool,
    /// Exit with status 2 when any task failed.
    #[arg(long)]
    pub fail_on_task_error: bool,
    #[arg(long)]
    pub no_summary: bool,
}

impl RunArgs {
    pub fn apply(&self, config: &mut LauncherConfig) -> CoreResult<()> {
        if let Some(workers) = self.workers {
            config.workers = Some(workers);
        }
        if let Some(devices) = &self.devices {
            config.devices = Some(parse_devices(devices)?);
        }
        if let Some(summary) = &self.summary {
            config.summary_path = summary.clone();
        }
        if let Some(experiment) = &self.experiment {
            config.experiment = experiment.clone();
        }
        if let Some(name) = &self.device_env_var {
            config.device_env_var = name.clone();
        }
        if let Some(capacity) = self.backlog_capacity {
            config.backlog_capacity = capacity;
        }
        if self.remove_failed_output {
            config.remove_failed_output = true;
        }
        config.validate()
    }
}
