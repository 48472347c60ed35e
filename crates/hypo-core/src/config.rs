use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, CoreErrorKind, CoreResult, Subsystem};
use crate::orchestration::{DEFAULT_BACKLOG_CAPACITY, DEFAULT_DEVICE_ENV_VAR};
use crate::persistence::DEFAULT_SUMMARY_PATH;

pub const WORKERS_ENV: &str = "HYPO_WORKERS";
pub const DEVICES_ENV: &str = "HYPO_DEVICES";
pub const SUMMARY_PATH_ENV: &str = "HYPO_SUMMARY_PATH";
pub const DEFAULT_EXPERIMENT: &str = "experiment";

/// Launcher settings. Read from the top level of a plan file, then overridden
/// by the environment and finally by command-line flags.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub experiment: String,
    pub workers: Option<usize>,
    pub devices: Option<BTreeSet<u32>>,
    pub device_env_var: String,
    pub summary_path: PathBuf,
    pub backlog_capacity: usize,
    pub remove_failed_output: bool,
    pub env: BTreeMap<String, String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            experiment: String::new(),
            workers: None,
            devices: None,
            device_env_var: DEFAULT_DEVICE_ENV_VAR.to_string(),
            summary_path: PathBuf::from(DEFAULT_SUMMARY_PATH),
            backlog_capacity: DEFAULT_BACKLOG_CAPACITY,
            remove_failed_output: false,
            env: BTreeMap::new(),
        }
    }
}

impl LauncherConfig {
    pub fn apply_env(&mut self) -> CoreResult<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> CoreResult<()> {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(workers) = lookup(WORKERS_ENV) {
            self.workers = Some(parse_workers(&workers)?);
        }
        if let Some(devices) = lookup(DEVICES_ENV) {
            self.devices = Some(parse_devices(&devices)?);
        }
        if let Some(path) = lookup(SUMMARY_PATH_ENV) {
            self.summary_path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.workers == Some(0) {
            return Err(config_error("workers must be at least 1"));
        }
        if let Some(devices) = &self.devices
            && devices.is_empty()
        {
            return Err(config_error("device list must not be empty when given"));
        }
        if self.device_env_var.is_empty() || self.device_env_var.contains(['=', '\0']) {
            return Err(config_error(format!(
                "invalid device environment variable name '{}'",
                self.device_env_var
            )));
        }
        if self.backlog_capacity == 0 {
            return Err(config_error("backlog capacity must be at least 1"));
        }
        Ok(())
    }

    pub fn experiment_name(&self) -> &str {
        if self.experiment.trim().is_empty() {
            DEFAULT_EXPERIMENT
        } else {
            &self.experiment
        }
    }

    /// Configured devices, or the detected ones when none are configured.
    pub fn resolved_devices(&self) -> BTreeSet<u32> {
        match &self.devices {
            Some(devices) if !devices.is_empty() => devices.clone(),
            _ => detect_devices(),
        }
    }

    /// Configured worker count, defaulting to one worker per device.
    pub fn resolved_workers(&self, devices: &BTreeSet<u32>) -> usize {
        self.workers.unwrap_or(devices.len()).max(1)
    }
}

pub fn parse_workers(raw: &str) -> CoreResult<usize> {
    match raw.trim().parse::<usize>() {
        Ok(0) | Err(_) => Err(config_error(format!(
            "'{raw}' is not a positive worker count"
        ))),
        Ok(workers) => Ok(workers),
    }
}

/// Parses a comma-separated device list such as `0,1,3`.
pub fn parse_devices(raw: &str) -> CoreResult<BTreeSet<u32>> {
    let devices = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u32>()
                .map_err(|_| config_error(format!("'{part}' is not a device index")))
        })
        .collect::<CoreResult<BTreeSet<u32>>>()?;

    if devices.is_empty() {
        return Err(config_error(format!("'{raw}' names no devices")));
    }
    Ok(devices)
}

/// Asks `nvidia-smi` for GPU indices; falls back to a single device `0`.
pub fn detect_devices() -> BTreeSet<u32> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=index", "--format=csv,noheader"])
        .output();

    let detected = match output {
        Ok(output) if output.status.success() => {
            parse_gpu_indices(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(output) => {
            tracing::debug!(status = ?output.status.code(), "nvidia-smi reported failure");
            BTreeSet::new()
        }
        Err(error) => {
            tracing::debug!(%error, "nvidia-smi unavailable");
            BTreeSet::new()
        }
    };

    if detected.is_empty() {
        tracing::info!("no GPUs detected; using device 0");
        return BTreeSet::from([0]);
    }
    tracing::info!(devices = ?detected, "detected GPUs");
    detected
}

fn parse_gpu_indices(stdout: &str) -> BTreeSet<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect()
}

fn config_error(message: impl Into<String>) -> CoreError {
    CoreError::new(Subsystem::Config, CoreErrorKind::InvalidInput, message)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};
    use std::path::PathBuf;

    use super::{LauncherConfig, parse_devices, parse_gpu_indices, parse_workers};
    use crate::models::CoreErrorKind;

    #[test]
    fn device_lists_parse_and_dedupe() {
        assert_eq!(parse_devices("1, 0,1").unwrap(), BTreeSet::from([0, 1]));
        assert_eq!(
            parse_devices("a,1").unwrap_err().kind,
            CoreErrorKind::InvalidInput
        );
        assert!(parse_devices(" , ").is_err());
    }

    #[test]
    fn zero_workers_are_rejected() {
        assert!(parse_workers("0").is_err());
        assert_eq!(parse_workers(" 4 ").unwrap(), 4);
    }

    #[test]
    fn environment_overrides_file_values() {
        let vars = HashMap::from([
            ("HYPO_WORKERS", "3"),
            ("HYPO_DEVICES", "2,3"),
            ("HYPO_SUMMARY_PATH", "runs/summary.json"),
        ]);
        let mut config = LauncherConfig {
            workers: Some(1),
            ..LauncherConfig::default()
        };

        config
            .apply_env_from(|key| vars.get(key).map(|value| value.to_string()))
            .unwrap();

        assert_eq!(config.workers, Some(3));
        assert_eq!(config.devices, Some(BTreeSet::from([2, 3])));
        assert_eq!(config.summary_path, PathBuf::from("runs/summary.json"));
    }

    #[test]
    fn blank_environment_values_are_ignored() {
        let mut config = LauncherConfig::default();
        config
            .apply_env_from(|key| (key == "HYPO_WORKERS").then(|| "  ".to_string()))
            .unwrap();
        assert_eq!(config.workers, None);
    }

    #[test]
    fn workers_default_to_device_count() {
        let config = LauncherConfig {
            devices: Some(BTreeSet::from([0, 1, 2])),
            ..LauncherConfig::default()
        };
        let devices = config.resolved_devices();
        assert_eq!(config.resolved_workers(&devices), 3);
    }

    #[test]
    fn nvidia_smi_output_is_parsed_per_line() {
        assert_eq!(parse_gpu_indices("0\n1\n\n3\n"), BTreeSet::from([0, 1, 3]));
        assert!(parse_gpu_indices("No devices were found").is_empty());
    }

    #[test]
    fn validation_rejects_bad_env_var_name() {
        let config = LauncherConfig {
            device_env_var: "A=B".to_string(),
            ..LauncherConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().kind, CoreErrorKind::InvalidInput);
    }
}
