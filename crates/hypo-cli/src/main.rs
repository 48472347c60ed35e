mod cli;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

use hypo_core::config::SUMMARY_PATH_ENV;
use hypo_core::models::{TaskStatus, clock};
use hypo_core::orchestration::Dispatcher;
use hypo_core::persistence::{DEFAULT_SUMMARY_PATH, SummaryStore, SummaryWriter};
use hypo_core::logging;
use hypo_core::plan::{Plan, PlanFile};

use crate::cli::{Cli, Commands, RunArgs};

fn main() -> ExitCode {
    // The local offset can only be read while this is the only thread.
    clock::capture_local_offset();

    let cli = Cli::parse();
    logging::init(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("hypo: failed to start async runtime: {error}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(dispatch(cli.command)) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("hypo: {error:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Run(args) => run(args).await,
        Commands::Validate { plan } => validate(plan),
        Commands::Summary { summary, json } => show_summary(summary, json),
    }
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let mut plan_file = PlanFile::from_path(&args.plan)
        .with_context(|| format!("failed to load plan '{}'", args.plan.display()))?;
    plan_file.config.apply_env()?;
    args.apply(&mut plan_file.config)?;

    let Plan {
        config,
        resources,
        items,
    } = plan_file.into_plan().context("failed to build tasks")?;
    let task_total: usize = items.iter().map(|item| item.task_count()).sum();
    let experiment = config.experiment_name().to_string();

    let dispatcher = Dispatcher::from_config(&config)?;
    info!(
        experiment = %experiment,
        tasks = task_total,
        workers = dispatcher.worker_count(),
        resources = resources.len(),
        "starting experiment"
    );

    let report = dispatcher
        .run_items(config.backlog_capacity, items)
        .await
        .context("dispatcher failed")?;

    if args.no_summary {
        info!("summary disabled");
    } else {
        SummaryWriter::new(&config.summary_path)
            .flush(&report.results, &report.meta(experiment.as_str()))
            .context("failed to save summary")?;
    }

    if let Some(error) = report.fatal_error() {
        bail!("launch stopped early: {error}");
    }

    let failed = report.failed_tasks().count();
    if failed > 0 {
        warn!(failed, total = report.results.len(), "some tasks failed");
        if args.fail_on_task_error {
            return Ok(ExitCode::from(2));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn validate(plan: PathBuf) -> Result<ExitCode> {
    let mut plan_file = PlanFile::from_path(&plan)
        .with_context(|| format!("failed to load plan '{}'", plan.display()))?;
    plan_file.config.apply_env()?;
    plan_file.validate()?;

    println!(
        "{}: {} runs in {} entries, resources: [{}], paths relative to '{}'",
        plan_file.config.experiment_name(),
        plan_file.task_count(),
        plan_file.runs.len(),
        plan_file.resources.join(", "),
        plan_file.base_dir().display()
    );
    Ok(ExitCode::SUCCESS)
}

fn show_summary(path: Option<PathBuf>, json: bool) -> Result<ExitCode> {
    let path = path
        .or_else(|| std::env::var_os(SUMMARY_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SUMMARY_PATH));
    let summaries = SummaryWriter::new(&path)
        .load()
        .with_context(|| format!("failed to read '{}'", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(ExitCode::SUCCESS);
    }

    for summary in &summaries {
        let failed = summary
            .runs
            .iter()
            .filter(|run| run.status == TaskStatus::Failed)
            .count();
        println!(
            "{}  {}  {}s  {} runs  {} failed",
            summary.start,
            summary.experiment,
            summary.time,
            summary.runs.len(),
            failed
        );
    }
    Ok(ExitCode::SUCCESS)
}
