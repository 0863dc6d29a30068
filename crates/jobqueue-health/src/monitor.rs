//! Readiness monitor: one scheduler look per call.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use jobqueue_cluster::ClusterHandle;
use jobqueue_core::JobFilter;
use jobqueue_gateway::SchedulerGateway;

use crate::census::JobCensus;
use crate::error::ReadinessError;

/// Why a pool is or is not ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready { workers: u32 },
    /// Nothing under the prefix started within the recency window.
    NoRecentJobs,
    InsufficientWorkers { workers: u32, required: u32 },
    /// Every recent job is still queued.
    Pending { job_ids: Vec<String> },
    /// Only jobs in unrecognised states; ignored for this cycle.
    Unrecognized { job_ids: Vec<String> },
    /// Recent jobs exist but none are running or queued. The scheduler has
    /// dropped them and waiting longer will not help.
    JobsLost,
    /// The scheduler or control plane could not be queried this cycle.
    QueryFailed { error: String },
}

impl Readiness {
    /// Whether the threshold is met.
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }

    /// Whether the attempt's jobs are gone.
    pub fn is_lost(&self) -> bool {
        matches!(self, Readiness::JobsLost)
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Readiness::Ready { workers } => write!(f, "{workers} workers running"),
            Readiness::NoRecentJobs => write!(f, "no recent jobs"),
            Readiness::InsufficientWorkers { workers, required } => write!(
                f,
                "{workers} of {required} workers running, {} short",
                required - workers
            ),
            Readiness::Pending { job_ids } => write!(f, "jobs pending: {}", job_ids.join(", ")),
            Readiness::Unrecognized { job_ids } => {
                write!(f, "jobs in unrecognised states: {}", job_ids.join(", "))
            }
            Readiness::JobsLost => write!(f, "no running or pending jobs"),
            Readiness::QueryFailed { error } => write!(f, "query failed: {error}"),
        }
    }
}

/// Outcome of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessResult {
    pub ready: bool,
    pub running_workers: u32,
    pub reason: String,
    pub readiness: Readiness,
}

impl From<Readiness> for ReadinessResult {
    fn from(readiness: Readiness) -> Self {
        let running_workers = match &readiness {
            Readiness::Ready { workers } | Readiness::InsufficientWorkers { workers, .. } => {
                *workers
            }
            _ => 0,
        };
        Self {
            ready: readiness.is_ready(),
            running_workers,
            reason: readiness.to_string(),
            readiness,
        }
    }
}

/// Checks one cluster's jobs against the readiness threshold.
///
/// Borrows the gateway and handle for the duration of an attempt.
pub struct ReadinessMonitor<'a> {
    gateway: &'a dyn SchedulerGateway,
    handle: &'a ClusterHandle,
}

impl<'a> ReadinessMonitor<'a> {
    /// Create a monitor for one cluster.
    pub fn new(gateway: &'a dyn SchedulerGateway, handle: &'a ClusterHandle) -> Self {
        Self { gateway, handle }
    }

    /// Poll once against the current time.
    pub async fn poll_once(
        &self,
        job_name_prefix: &str,
        min_workers: u32,
        recency_window: Duration,
    ) -> Result<ReadinessResult, ReadinessError> {
        self.poll_at(job_name_prefix, min_workers, recency_window, Utc::now())
            .await
    }

    /// Poll once, judging recency against `now`.
    ///
    /// Transient failures come back as a not-ready result; only errors that
    /// will not clear up by themselves are returned as `Err`.
    pub async fn poll_at(
        &self,
        job_name_prefix: &str,
        min_workers: u32,
        recency_window: Duration,
        now: DateTime<Utc>,
    ) -> Result<ReadinessResult, ReadinessError> {
        let filter = JobFilter::for_user(self.gateway.user()).with_name_prefix(job_name_prefix);
        let jobs = match self.gateway.list_jobs(&filter).await {
            Ok(jobs) => jobs,
            Err(e) if e.is_transient() => {
                warn!(prefix = job_name_prefix, error = %e, "job listing failed, not ready this cycle");
                return Ok(Readiness::QueryFailed { error: e.to_string() }.into());
            }
            Err(e) => return Err(e.into()),
        };

        let census = JobCensus::take(&jobs, now, recency_window);
        debug!(
            prefix = job_name_prefix,
            running = census.running.len(),
            pending = census.pending.len(),
            finished = census.finished.len(),
            unrecognized = census.unrecognized.len(),
            stale = census.stale,
            "job census"
        );

        let readiness = if census.recent() == 0 {
            Readiness::NoRecentJobs
        } else if !census.running.is_empty() {
            match self.handle.worker_count().await {
                Ok(workers) if workers >= min_workers => Readiness::Ready { workers },
                Ok(workers) => Readiness::InsufficientWorkers {
                    workers,
                    required: min_workers,
                },
                Err(e) if e.is_transient() => {
                    warn!(job_name = self.handle.job_name(), error = %e, "worker count failed");
                    Readiness::QueryFailed { error: e.to_string() }
                }
                Err(e) => return Err(e.into()),
            }
        } else if !census.pending.is_empty() {
            Readiness::Pending {
                job_ids: census.pending,
            }
        } else if !census.unrecognized.is_empty() {
            Readiness::Unrecognized {
                job_ids: census.unrecognized,
            }
        } else {
            Readiness::JobsLost
        };

        Ok(readiness.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use jobqueue_cluster::{ClusterHandle, JobQueueLauncher};
    use jobqueue_core::{JobState, MemoryQuantity, PoolSettings, ResourceConfiguration, Walltime};
    use jobqueue_gateway::InMemoryScheduler;

    const WINDOW: Duration = Duration::from_secs(120);

    async fn setup(job_name: &str, processes: u32) -> (Arc<InMemoryScheduler>, ClusterHandle) {
        let sched = Arc::new(InMemoryScheduler::new("alice"));
        let launcher = JobQueueLauncher::new(sched.clone(), PoolSettings::default());
        let resources = ResourceConfiguration::new(
            10,
            processes,
            MemoryQuantity::from_gib(20),
            Walltime::from_secs(1800),
            "short",
        )
        .unwrap();
        let handle = ClusterHandle::create(&launcher, job_name, resources)
            .await
            .unwrap();
        (sched, handle)
    }

    #[tokio::test]
    async fn pending_jobs_are_not_ready() {
        let (sched, handle) = setup("jq-ab-00", 1).await;
        let monitor = ReadinessMonitor::new(sched.as_ref(), &handle);

        let result = monitor.poll_once("jq-ab-", 1, WINDOW).await.unwrap();
        assert!(!result.ready);
        assert!(matches!(result.readiness, Readiness::Pending { ref job_ids } if job_ids.len() == 1));
        assert!(result.reason.starts_with("jobs pending: "));
        handle.close().await;
    }

    #[tokio::test]
    async fn running_job_with_enough_workers_is_ready() {
        let (sched, handle) = setup("jq-ab-00", 2).await;
        sched.start_jobs("jq-ab-00");
        let monitor = ReadinessMonitor::new(sched.as_ref(), &handle);

        let result = monitor.poll_once("jq-ab-", 1, WINDOW).await.unwrap();
        assert!(result.ready);
        assert_eq!(result.running_workers, 2);

        let result = monitor.poll_once("jq-ab-", 3, WINDOW).await.unwrap();
        assert!(!result.ready);
        assert_eq!(result.reason, "2 of 3 workers running, 1 short");
        handle.close().await;
    }

    #[tokio::test]
    async fn stale_jobs_are_ignored() {
        let (sched, handle) = setup("jq-ab-00", 1).await;
        sched.cancel_jobs(&JobFilter::for_user("alice")).await;
        let now = Utc::now();
        let monitor = ReadinessMonitor::new(sched.as_ref(), &handle);

        sched.add_job("jq-ab-00", JobState::Running, Some(now - chrono::Duration::seconds(121)));
        let result = monitor.poll_at("jq-ab-", 1, WINDOW, now).await.unwrap();
        assert_eq!(result.readiness, Readiness::NoRecentJobs);

        sched.add_job("jq-ab-00", JobState::Running, Some(now - chrono::Duration::seconds(119)));
        let result = monitor.poll_at("jq-ab-", 1, WINDOW, now).await.unwrap();
        assert!(result.ready);
        handle.close().await;
    }

    #[tokio::test]
    async fn lost_jobs_are_reported() {
        let (sched, handle) = setup("jq-ab-00", 1).await;
        let id = sched.jobs()[0].job_id.clone();
        sched.set_state(&id, JobState::Unknown("FAILED".to_string()));
        let monitor = ReadinessMonitor::new(sched.as_ref(), &handle);

        let result = monitor.poll_once("jq-ab-", 1, WINDOW).await.unwrap();
        assert!(result.readiness.is_lost());
        assert_eq!(result.reason, "no running or pending jobs");

        sched.set_state(&id, JobState::Unknown("CONFIGURING".to_string()));
        let result = monitor.poll_once("jq-ab-", 1, WINDOW).await.unwrap();
        assert!(!result.ready);
        assert!(!result.readiness.is_lost());
        handle.close().await;
    }

    #[tokio::test]
    async fn transient_failure_is_absorbed() {
        let (sched, handle) = setup("jq-ab-00", 1).await;
        sched.fail_next_lists(1);
        let monitor = ReadinessMonitor::new(sched.as_ref(), &handle);

        let result = monitor.poll_once("jq-ab-", 1, WINDOW).await.unwrap();
        assert!(!result.ready);
        assert!(matches!(result.readiness, Readiness::QueryFailed { .. }));
        handle.close().await;
    }

    #[tokio::test]
    async fn broken_scheduler_is_an_error() {
        let (sched, handle) = setup("jq-ab-00", 1).await;
        sched.set_broken(true);
        let monitor = ReadinessMonitor::new(sched.as_ref(), &handle);

        let err = monitor.poll_once("jq-ab-", 1, WINDOW).await.unwrap_err();
        assert!(matches!(err, ReadinessError::Gateway(_)));
        sched.set_broken(false);
        handle.close().await;
    }
}
