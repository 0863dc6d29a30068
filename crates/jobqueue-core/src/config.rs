//! jobqueue.toml configuration parser.
//!
//! Every section and field is optional. Durations, memory amounts and
//! walltimes are kept as strings in the file and validated by the
//! `resolve` methods into typed settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::units::{MemoryQuantity, Walltime, parse_duration};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobqueueConfig {
    pub defaults: DefaultsConfig,
    pub queues: QueuesConfig,
    pub acquire: AcquireConfig,
    pub scheduler: SchedulerConfig,
    pub pool: PoolConfig,
}

/// Per-job resource sizing used by the fallback configurations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub cores: u32,
    pub processes: u32,
    pub memory: String,
    pub walltime: String,
    pub extra_directives: Vec<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            cores: 10,
            processes: 1,
            memory: "20 GiB".to_string(),
            walltime: "00:30:00".to_string(),
            extra_directives: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuesConfig {
    /// Low-latency queue tried first among the fallbacks.
    pub short: String,
    /// Standard queue tried last.
    pub standard: String,
    /// Longest walltime the short queue accepts; any walltime whose hour
    /// field is 3 or less.
    pub short_max_walltime: String,
    pub short_worker_lifetime: String,
    pub standard_worker_lifetime: String,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            short: "short".to_string(),
            standard: "normal".to_string(),
            short_max_walltime: "03:59:59".to_string(),
            short_worker_lifetime: "25m".to_string(),
            standard_worker_lifetime: "1h".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquireConfig {
    /// Budget for each configuration attempt.
    pub wait_timeout: String,
    pub poll_interval: String,
    /// Delay before the first readiness check of an attempt.
    pub grace_period: String,
    /// Jobs started longer ago than this belong to an earlier attempt.
    pub recency_window: String,
    pub min_workers: u32,
    pub reservation: Option<String>,
    /// Leading component of every submitted job name.
    pub job_prefix: String,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            wait_timeout: "300s".to_string(),
            poll_interval: "10s".to_string(),
            grace_period: "10s".to_string(),
            recency_window: "120s".to_string(),
            min_workers: 1,
            reservation: None,
            job_prefix: "jq".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Owner of the jobs to poll; defaults to `$USER`.
    pub user: Option<String>,
    /// Directory holding the scheduler CLI; defaults to `$PATH` lookup.
    pub bin_dir: Option<PathBuf>,
    pub command_timeout: String,
    pub cancel_timeout: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            user: None,
            bin_dir: None,
            command_timeout: "10s".to_string(),
            cancel_timeout: "5s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Command each worker job runs. `{address}`, `{processes}`,
    /// `{threads}` and `{memory}` are substituted.
    pub worker_command: String,
    pub control_plane_host: Option<String>,
    pub control_plane_port: u16,
    pub log_directory: Option<PathBuf>,
    pub working_directory: Option<PathBuf>,
    /// Shell lines run before the worker command.
    pub prologue: Vec<String>,
    /// Total cores a pool may hold at once.
    pub core_budget: u32,
    pub adapt_interval: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_command: "worker {address} --nworkers {processes} --nthreads {threads} --memory-limit {memory}"
                .to_string(),
            control_plane_host: None,
            control_plane_port: 8786,
            log_directory: None,
            working_directory: None,
            prologue: Vec::new(),
            core_budget: 40,
            adapt_interval: "5s".to_string(),
        }
    }
}

// ── Resolved settings ──────────────────────────────────────────────

/// Caller-supplied default sizing, validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDefaults {
    pub cores: u32,
    pub processes: u32,
    pub memory: MemoryQuantity,
    pub walltime: Walltime,
    pub extra_directives: Vec<String>,
}

impl Default for ClusterDefaults {
    fn default() -> Self {
        Self {
            cores: 10,
            processes: 1,
            memory: MemoryQuantity::from_gib(20),
            walltime: Walltime::from_secs(30 * 60),
            extra_directives: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePolicy {
    pub short: String,
    pub standard: String,
    pub short_max_walltime: Walltime,
    pub short_worker_lifetime: String,
    pub standard_worker_lifetime: String,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            short: "short".to_string(),
            standard: "normal".to_string(),
            short_max_walltime: Walltime::from_secs(4 * 3600 - 1),
            short_worker_lifetime: "25m".to_string(),
            standard_worker_lifetime: "1h".to_string(),
        }
    }
}

/// Timing and threshold knobs for one acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireOptions {
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub grace_period: Duration,
    pub recency_window: Duration,
    pub min_workers: u32,
    pub reservation: Option<String>,
    pub job_prefix: String,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(10),
            grace_period: Duration::from_secs(10),
            recency_window: Duration::from_secs(120),
            min_workers: 1,
            reservation: None,
            job_prefix: "jq".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub user: Option<String>,
    pub bin_dir: Option<PathBuf>,
    pub command_timeout: Duration,
    pub cancel_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            user: None,
            bin_dir: None,
            command_timeout: Duration::from_secs(10),
            cancel_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub worker_command: String,
    pub control_plane_host: Option<String>,
    pub control_plane_port: u16,
    pub log_directory: Option<PathBuf>,
    pub working_directory: Option<PathBuf>,
    pub prologue: Vec<String>,
    pub core_budget: u32,
    pub adapt_interval: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        let file = PoolConfig::default();
        Self {
            worker_command: file.worker_command,
            control_plane_host: None,
            control_plane_port: file.control_plane_port,
            log_directory: None,
            working_directory: None,
            prologue: Vec::new(),
            core_budget: file.core_budget,
            adapt_interval: Duration::from_secs(5),
        }
    }
}

impl DefaultsConfig {
    pub fn resolve(&self) -> ConfigResult<ClusterDefaults> {
        Ok(ClusterDefaults {
            cores: self.cores,
            processes: self.processes,
            memory: self.memory.parse()?,
            walltime: self.walltime.parse()?,
            extra_directives: self.extra_directives.clone(),
        })
    }
}

impl QueuesConfig {
    pub fn resolve(&self) -> ConfigResult<QueuePolicy> {
        Ok(QueuePolicy {
            short: self.short.clone(),
            standard: self.standard.clone(),
            short_max_walltime: self.short_max_walltime.parse()?,
            short_worker_lifetime: self.short_worker_lifetime.clone(),
            standard_worker_lifetime: self.standard_worker_lifetime.clone(),
        })
    }
}

impl AcquireConfig {
    pub fn resolve(&self) -> ConfigResult<AcquireOptions> {
        Ok(AcquireOptions {
            wait_timeout: parse_duration(&self.wait_timeout)?,
            poll_interval: parse_duration(&self.poll_interval)?,
            grace_period: parse_duration(&self.grace_period)?,
            recency_window: parse_duration(&self.recency_window)?,
            min_workers: self.min_workers,
            reservation: self.reservation.clone(),
            job_prefix: self.job_prefix.clone(),
        })
    }
}

impl SchedulerConfig {
    pub fn resolve(&self) -> ConfigResult<SchedulerSettings> {
        Ok(SchedulerSettings {
            user: self.user.clone(),
            bin_dir: self.bin_dir.clone(),
            command_timeout: parse_duration(&self.command_timeout)?,
            cancel_timeout: parse_duration(&self.cancel_timeout)?,
        })
    }
}

impl PoolConfig {
    pub fn resolve(&self) -> ConfigResult<PoolSettings> {
        Ok(PoolSettings {
            worker_command: self.worker_command.clone(),
            control_plane_host: self.control_plane_host.clone(),
            control_plane_port: self.control_plane_port,
            log_directory: self.log_directory.clone(),
            working_directory: self.working_directory.clone(),
            prologue: self.prologue.clone(),
            core_budget: self.core_budget,
            adapt_interval: parse_duration(&self.adapt_interval)?,
        })
    }
}

impl JobqueueConfig {
    /// Load and parse a config file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: JobqueueConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Render the effective config as TOML.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: JobqueueConfig = toml::from_str("").unwrap();
        assert_eq!(config.defaults.resolve().unwrap(), ClusterDefaults::default());
        assert_eq!(config.queues.resolve().unwrap(), QueuePolicy::default());
        assert_eq!(config.acquire.resolve().unwrap(), AcquireOptions::default());
        assert_eq!(config.scheduler.resolve().unwrap(), SchedulerSettings::default());
        assert_eq!(config.pool.resolve().unwrap(), PoolSettings::default());
    }

    #[test]
    fn parse_partial_sections() {
        let toml_str = r#"
[defaults]
cores = 4
memory = "8 GiB"

[acquire]
wait_timeout = "5m"
reservation = "maintenance"
"#;
        let config: JobqueueConfig = toml::from_str(toml_str).unwrap();
        let defaults = config.defaults.resolve().unwrap();
        assert_eq!(defaults.cores, 4);
        assert_eq!(defaults.processes, 1);
        assert_eq!(defaults.memory, MemoryQuantity::from_gib(8));

        let acquire = config.acquire.resolve().unwrap();
        assert_eq!(acquire.wait_timeout, Duration::from_secs(300));
        assert_eq!(acquire.reservation.as_deref(), Some("maintenance"));
    }

    #[test]
    fn invalid_values_are_reported() {
        let toml_str = r#"
[defaults]
walltime = "forever"
"#;
        let config: JobqueueConfig = toml::from_str(toml_str).unwrap();
        assert!(config.defaults.resolve().is_err());
    }

    #[test]
    fn from_file_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobqueue.toml");
        std::fs::write(&path, "[queues]\nshort = \"express\"\n").unwrap();

        let config = JobqueueConfig::from_file(&path).unwrap();
        assert_eq!(config.queues.short, "express");
        assert_eq!(config.queues.standard, "normal");
        assert!(config.to_toml_string().unwrap().contains("express"));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = JobqueueConfig::from_file(Path::new("/nonexistent/jobqueue.toml")).unwrap_err();
        assert!(matches!(err, crate::ConfigError::Read(_)));
    }
}
