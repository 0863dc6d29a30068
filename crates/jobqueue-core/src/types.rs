//! Domain types shared by the gateway, pool, and supervisor crates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ConfigError, ConfigResult};
use crate::units::{MemoryQuantity, Walltime};

// ── Resource configuration ─────────────────────────────────────────

/// One bundle of resource-request parameters, tried as a single
/// acquisition attempt.
///
/// Immutable once built: `with_*` methods return a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceConfiguration {
    cores: u32,
    processes_per_job: u32,
    memory: MemoryQuantity,
    walltime: Walltime,
    queue: String,
    reservation: Option<String>,
    extra_directives: Vec<String>,
    /// Arguments appended to the worker command (e.g. `--lifetime 25m`).
    worker_args: Vec<String>,
}

impl ResourceConfiguration {
    /// Build a configuration, checking `0 < processes_per_job <= cores`.
    pub fn new(
        cores: u32,
        processes_per_job: u32,
        memory: MemoryQuantity,
        walltime: Walltime,
        queue: impl Into<String>,
    ) -> ConfigResult<Self> {
        if cores == 0 {
            return Err(ConfigError::InvalidResources(
                "cores must be greater than zero".to_string(),
            ));
        }
        if processes_per_job == 0 {
            return Err(ConfigError::InvalidResources(
                "processes must be greater than zero".to_string(),
            ));
        }
        if processes_per_job > cores {
            return Err(ConfigError::InvalidResources(format!(
                "processes ({processes_per_job}) exceed cores ({cores})"
            )));
        }
        let queue = queue.into();
        if queue.trim().is_empty() {
            return Err(ConfigError::InvalidResources(
                "queue name is empty".to_string(),
            ));
        }

        Ok(Self {
            cores,
            processes_per_job,
            memory,
            walltime,
            queue,
            reservation: None,
            extra_directives: Vec::new(),
            worker_args: Vec::new(),
        })
    }

    /// Submit into the named reservation.
    pub fn with_reservation(mut self, name: impl Into<String>) -> Self {
        self.reservation = Some(name.into());
        self
    }

    /// Extra `#SBATCH` lines copied into the job script.
    pub fn with_extra_directives(mut self, directives: Vec<String>) -> Self {
        self.extra_directives = directives;
        self
    }

    /// Arguments appended to the worker command.
    pub fn with_worker_args(mut self, args: Vec<String>) -> Self {
        self.worker_args = args;
        self
    }

    /// Replace the walltime.
    pub fn with_walltime(mut self, walltime: Walltime) -> Self {
        self.walltime = walltime;
        self
    }

    /// Cores requested per job.
    pub fn cores(&self) -> u32 {
        self.cores
    }

    /// Worker processes started in each job.
    pub fn processes_per_job(&self) -> u32 {
        self.processes_per_job
    }

    /// Memory requested per job.
    pub fn memory(&self) -> MemoryQuantity {
        self.memory
    }

    /// Walltime requested per job.
    pub fn walltime(&self) -> Walltime {
        self.walltime
    }

    /// Queue (partition) the jobs go to.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Reservation the jobs run in, if any.
    pub fn reservation(&self) -> Option<&str> {
        self.reservation.as_deref()
    }

    pub fn extra_directives(&self) -> &[String] {
        &self.extra_directives
    }

    /// Arguments appended to the worker command.
    pub fn worker_args(&self) -> &[String] {
        &self.worker_args
    }

    /// Threads available to each worker process.
    pub fn threads_per_process(&self) -> u32 {
        (self.cores / self.processes_per_job).max(1)
    }
}

impl fmt::Display for ResourceConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "queue={} cores={} processes={} memory={} walltime={}",
            self.queue, self.cores, self.processes_per_job, self.memory, self.walltime
        )?;
        if let Some(reservation) = &self.reservation {
            write!(f, " reservation={reservation}")?;
        }
        Ok(())
    }
}

// ── Jobs ───────────────────────────────────────────────────────────

/// Scheduler state of a job, as far as readiness cares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JobState {
    Pending,
    Running,
    /// Any other state (completing, failed, cancelled, ...) or one that
    /// could not be recognised. Carries the raw scheduler text.
    Unknown(String),
}

impl JobState {
    /// Parse the scheduler's long (`RUNNING`) or compact (`R`) state code.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "PD" => JobState::Pending,
            "RUNNING" | "R" => JobState::Running,
            other => JobState::Unknown(other.to_string()),
        }
    }

    /// Whether the scheduler reports the job as already finished or
    /// on its way out, so cancelling it again is pointless.
    pub fn is_finished(&self) -> bool {
        match self {
            JobState::Pending | JobState::Running => false,
            JobState::Unknown(raw) => matches!(
                raw.as_str(),
                "CANCELLED"
                    | "CA"
                    | "COMPLETED"
                    | "CD"
                    | "COMPLETING"
                    | "CG"
                    | "FAILED"
                    | "F"
                    | "TIMEOUT"
                    | "TO"
                    | "NODE_FAIL"
                    | "NF"
                    | "PREEMPTED"
                    | "PR"
                    | "OUT_OF_MEMORY"
                    | "OOM"
                    | "BOOT_FAIL"
                    | "BF"
                    | "DEADLINE"
                    | "DL"
            ),
        }
    }

    /// The scheduler's state code.
    pub fn label(&self) -> &str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Unknown(raw) => raw,
        }
    }
}

/// One row of the scheduler's job listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    pub job_id: String,
    pub name: String,
    pub state: JobState,
    /// `None` while the scheduler reports no start time (`N/A`).
    pub start_time: Option<DateTime<Utc>>,
}

/// Which jobs a listing or cancellation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFilter {
    /// Only jobs owned by this user; `None` means every user.
    pub user: Option<String>,
    /// Only jobs whose name starts with this prefix.
    pub name_prefix: Option<String>,
}

impl JobFilter {
    /// Jobs of one user.
    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            name_prefix: None,
        }
    }

    /// Narrow to job names starting with `prefix`.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    /// Whether a job name passes the prefix filter.
    pub fn matches_name(&self, name: &str) -> bool {
        self.name_prefix
            .as_deref()
            .is_none_or(|prefix| name.starts_with(prefix))
    }
}
