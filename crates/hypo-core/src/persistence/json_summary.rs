use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use serde::Serialize;
use serde_json::Value;
use serde_json::ser::PrettyFormatter;

use crate::models::{CoreError, CoreErrorKind, CoreResult, ExperimentSummary, Subsystem};
use crate::persistence::SummaryStore;

pub const DEFAULT_SUMMARY_PATH: &str = "summary.json";

static SUMMARY_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn summary_lock() -> &'static Mutex<()> {
    SUMMARY_LOCK.get_or_init(|| Mutex::new(()))
}

/// JSON array of experiment summaries, updated by read-modify-write.
///
/// Writers inside one process are serialised by a process-wide mutex. Two
/// processes flushing the same file at once can still lose an update.
#[derive(Clone, Debug)]
pub struct SummaryWriter {
    path: PathBuf,
}

impl Default for SummaryWriter {
    fn default() -> Self {
        Self::new(DEFAULT_SUMMARY_PATH)
    }
}

impl SummaryWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> CoreResult<Vec<Value>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(storage_error(format!(
                    "failed to read '{}': {error}",
                    self.path.display()
                )));
            }
        };

        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str::<Vec<Value>>(&text).map_err(|error| {
            CoreError::new(
                Subsystem::Summary,
                CoreErrorKind::SummaryCorruption,
                format!(
                    "'{}' is not a JSON array of summaries ({error}); refusing to overwrite it",
                    self.path.display()
                ),
            )
        })
    }

    fn write_entries(&self, entries: &[Value]) -> CoreResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|error| {
                storage_error(format!(
                    "failed to create '{}': {error}",
                    parent.display()
                ))
            })?;
        }

        let mut buffer = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
        entries.serialize(&mut serializer).map_err(|error| {
            storage_error(format!("failed to serialize summaries: {error}"))
        })?;
        buffer.push(b'\n');

        let staging = staging_path(&self.path);
        fs::write(&staging, &buffer).map_err(|error| {
            storage_error(format!("failed to write '{}': {error}", staging.display()))
        })?;
        fs::rename(&staging, &self.path).map_err(|error| {
            let _ = fs::remove_file(&staging);
            storage_error(format!(
                "failed to replace '{}': {error}",
                self.path.display()
            ))
        })
    }
}

impl SummaryStore for SummaryWriter {
    fn append(&self, summary: &ExperimentSummary) -> CoreResult<()> {
        let _guard = summary_lock().lock().map_err(|_| {
            CoreError::new(
                Subsystem::Summary,
                CoreErrorKind::Internal,
                "summary writer mutex poisoned",
            )
        })?;

        let mut entries = self.read_entries()?;
        let entry = serde_json::to_value(summary).map_err(|error| {
            storage_error(format!("failed to serialize summary: {error}"))
        })?;
        entries.push(entry);
        self.write_entries(&entries)?;

        tracing::info!(
            path = %self.path.display(),
            experiment = %summary.experiment,
            runs = summary.runs.len(),
            "saved summary"
        );
        Ok(())
    }

    fn load(&self) -> CoreResult<Vec<ExperimentSummary>> {
        self.read_entries()?
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                serde_json::from_value(entry).map_err(|error| {
                    CoreError::new(
                        Subsystem::Summary,
                        CoreErrorKind::SummaryCorruption,
                        format!(
                            "entry {index} of '{}' is not an experiment summary: {error}",
                            self.path.display()
                        ),
                    )
                })
            })
            .collect()
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| DEFAULT_SUMMARY_PATH.into());
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

fn storage_error(message: String) -> CoreError {
    CoreError::new(Subsystem::Summary, CoreErrorKind::StorageFailure, message)
}
