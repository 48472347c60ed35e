pub mod builder;
pub mod builtin;

pub use builder::PlanBuilder;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde::de::IgnoredAny;

use crate::config::LauncherConfig;
use crate::models::{CoreError, CoreErrorKind, CoreResult, Subsystem, Task, TaskSpec};
use crate::orchestration::BacklogItem;
use crate::resources::ResourceRegistry;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PlanFormat {
    Yaml,
    Json,
}

impl PlanFormat {
    pub fn from_path(path: &Path) -> CoreResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Ok(PlanFormat::Yaml),
            Some("json") => Ok(PlanFormat::Json),
            _ => Err(plan_error(format!(
                "cannot tell the format of '{}'; use .yaml, .yml or .json",
                path.display()
            ))),
        }
    }
}

/// A plan as written on disk: launcher settings at the top level, the named
/// resources, and the runs in submission order.
#[derive(Debug, Deserialize)]
pub struct PlanFile {
    #[serde(flatten)]
    pub config: LauncherConfig,
    #[serde(default)]
    pub resources: Vec<String>,
    pub runs: Vec<PlanEntry>,
    /// Top-level keys no setting claimed; any entry here fails validation.
    #[serde(flatten)]
    unknown: BTreeMap<String, IgnoredAny>,
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PlanEntry {
    Batch { batch: Vec<RunSpec> },
    Run(RunSpec),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSpec {
    pub name: String,
    pub command: String,
    #[serde(default = "current_dir")]
    pub cwd: PathBuf,
    #[serde(default = "current_dir")]
    pub output: PathBuf,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<f64>,
}

fn current_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Tasks built from a plan, ready to be pushed into a backlog.
#[derive(Debug)]
pub struct Plan {
    pub config: LauncherConfig,
    pub resources: ResourceRegistry,
    pub items: Vec<BacklogItem>,
}

impl Plan {
    pub fn task_count(&self) -> usize {
        self.items.iter().map(BacklogItem::task_count).sum()
    }
}

impl PlanFile {
    /// Reads a plan. Relative paths inside it resolve against the plan's own
    /// directory, and the experiment name defaults to the file stem.
    pub fn from_path(path: &Path) -> CoreResult<Self> {
        let format = PlanFormat::from_path(path)?;
        let text = std::fs::read_to_string(path).map_err(|error| {
            CoreError::new(
                Subsystem::Plan,
                CoreErrorKind::StorageFailure,
                format!("failed to read plan '{}': {error}", path.display()),
            )
        })?;

        let base_dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(current_dir);
        let mut plan = Self::parse(&text, format, base_dir)?;
        if plan.config.experiment.trim().is_empty()
            && let Some(stem) = path.file_stem().and_then(|stem| stem.to_str())
        {
            plan.config.experiment = stem.to_string();
        }
        Ok(plan)
    }

    pub fn parse(text: &str, format: PlanFormat, base_dir: impl Into<PathBuf>) -> CoreResult<Self> {
        let mut plan: PlanFile = match format {
            PlanFormat::Yaml => serde_yaml::from_str(text)
                .map_err(|error| plan_error(format!("invalid YAML plan: {error}")))?,
            PlanFormat::Json => serde_json::from_str(text)
                .map_err(|error| plan_error(format!("invalid JSON plan: {error}")))?,
        };
        plan.base_dir = base_dir.into();
        Ok(plan)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn task_count(&self) -> usize {
        self.runs
            .iter()
            .map(|entry| match entry {
                PlanEntry::Batch { batch } => batch.len(),
                PlanEntry::Run(_) => 1,
            })
            .sum()
    }

    /// Checks the plan without touching the filesystem.
    pub fn validate(&self) -> CoreResult<()> {
        self.config.validate()?;

        if let Some(key) = self.unknown.keys().next() {
            return Err(plan_error(format!("unknown top-level key '{key}'")));
        }
        if self.runs.is_empty() {
            return Err(plan_error("plan has no runs".to_string()));
        }

        for (index, entry) in self.runs.iter().enumerate() {
            match entry {
                PlanEntry::Batch { batch } if batch.is_empty() => {
                    return Err(plan_error(format!("batch at position {index} is empty")));
                }
                PlanEntry::Batch { batch } => {
                    for run in batch {
                        self.validate_run(run)?;
                    }
                }
                PlanEntry::Run(run) => self.validate_run(run)?,
            }
        }
        Ok(())
    }

    /// Builds every task, creating output directories on the way.
    pub fn into_plan(self) -> CoreResult<Plan> {
        self.validate()?;

        let mut registry = ResourceRegistry::new();
        for name in &self.resources {
            registry.register(name);
        }

        let mut items = Vec::with_capacity(self.runs.len());
        for entry in &self.runs {
            let item = match entry {
                PlanEntry::Run(run) => BacklogItem::Task(self.build_task(run, &registry)?),
                PlanEntry::Batch { batch } => BacklogItem::Batch(
                    batch
                        .iter()
                        .map(|run| self.build_task(run, &registry))
                        .collect::<CoreResult<Vec<Task>>>()?,
                ),
            };
            items.push(item);
        }

        Ok(Plan {
            config: self.config,
            resources: registry,
            items,
        })
    }

    fn validate_run(&self, run: &RunSpec) -> CoreResult<()> {
        if run.name.trim().is_empty() {
            return Err(plan_error(format!(
                "run with command '{}' has no name",
                run.command
            )));
        }
        if run.command.trim().is_empty() {
            return Err(plan_error(format!("run '{}' has an empty command", run.name)));
        }
        if let Some(resource) = &run.resource
            && !self.resources.iter().any(|declared| declared == resource)
        {
            return Err(plan_error(format!(
                "run '{}' uses undeclared resource '{resource}'",
                run.name
            )));
        }
        if let Some(timeout) = run.timeout_secs {
            run_timeout(run, timeout)?;
        }
        Ok(())
    }

    fn build_task(&self, run: &RunSpec, registry: &ResourceRegistry) -> CoreResult<Task> {
        let mut spec = TaskSpec::new(&run.name, &run.command)
            .working_dir(self.base_dir.join(&run.cwd))
            .output_dir(self.base_dir.join(&run.output))
            .envs(&self.config.env)
            .envs(&run.env);

        if let Some(name) = &run.resource {
            let resource = registry.get(name).ok_or_else(|| {
                plan_error(format!(
                    "run '{}' uses undeclared resource '{name}'",
                    run.name
                ))
            })?;
            spec = spec.resource(resource);
        }
        if let Some(timeout) = run.timeout_secs {
            spec = spec.timeout(run_timeout(run, timeout)?);
        }

        spec.build()
    }
}

fn run_timeout(run: &RunSpec, seconds: f64) -> CoreResult<Duration> {
    match Duration::try_from_secs_f64(seconds) {
        Ok(timeout) if !timeout.is_zero() => Ok(timeout),
        _ => Err(plan_error(format!(
            "run '{}' timeout must be a positive number of seconds, got {seconds}",
            run.name
        ))),
    }
}

fn plan_error(message: String) -> CoreError {
    CoreError::new(Subsystem::Plan, CoreErrorKind::InvalidInput, message)
}
