//! The scheduler gateway contract.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use jobqueue_core::{JobFilter, JobRecord};

use crate::error::GatewayResult;
use crate::script::JobScript;

/// A scheduler reservation as reported by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInfo {
    pub name: String,
    /// Partition (queue) the reservation's capacity belongs to.
    pub partition: Option<String>,
    pub active: bool,
}

/// Outcome of a best-effort bulk cancellation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelReport {
    /// Job ids cancelled one by one.
    pub cancelled: Vec<String>,
    /// Job ids whose cancellation failed or timed out; a name when a
    /// cancellation by name failed.
    pub failed: Vec<String>,
    /// Job names cancelled as a whole because the jobs could not be listed.
    pub names: Vec<String>,
}

impl CancelReport {
    /// Whether nothing was attempted.
    pub fn is_empty(&self) -> bool {
        self.cancelled.is_empty() && self.failed.is_empty() && self.names.is_empty()
    }
}

/// Typed access to the external batch scheduler.
///
/// Implementations never retry; callers poll.
#[async_trait]
pub trait SchedulerGateway: Send + Sync {
    /// The user whose jobs this gateway submits and polls.
    fn user(&self) -> &str;

    /// Per-job budget used by `cancel_jobs`.
    fn cancel_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    /// List current jobs. An empty listing is not an error; lines that
    /// cannot be parsed are skipped.
    async fn list_jobs(&self, filter: &JobFilter) -> GatewayResult<Vec<JobRecord>>;

    /// Look up a single job; `GatewayError::NotFound` if the scheduler
    /// no longer knows it.
    async fn describe_job(&self, job_id: &str) -> GatewayResult<JobRecord>;

    /// Submit a job script, returning the scheduler's job id.
    async fn submit(&self, script: &JobScript) -> GatewayResult<String>;

    async fn cancel_job(&self, job_id: &str) -> GatewayResult<()>;

    /// Look up a reservation; `Ok(None)` if the scheduler does not know it.
    async fn reservation(&self, name: &str) -> GatewayResult<Option<ReservationInfo>>;

    /// Whether the reservation exists and is active. Any failure reads
    /// as inactive.
    async fn is_reservation_active(&self, name: &str) -> bool {
        match self.reservation(name).await {
            Ok(Some(info)) => info.active,
            Ok(None) => false,
            Err(e) => {
                warn!(reservation = %name, error = %e, "reservation query failed, treating as inactive");
                false
            }
        }
    }

    /// Cancel every live job matching the filter. Best-effort: failures are
    /// logged and collected, never raised.
    async fn cancel_jobs(&self, filter: &JobFilter) -> CancelReport {
        cancel_matching(self, filter).await
    }
}

/// Shared body of [`SchedulerGateway::cancel_jobs`].
///
/// A failed listing is logged and yields an empty report.
pub async fn cancel_matching<G>(gateway: &G, filter: &JobFilter) -> CancelReport
where
    G: SchedulerGateway + ?Sized,
{
    match cancel_listed(gateway, filter).await {
        Ok(report) => report,
        Err(e) => {
            warn!(
                name_prefix = ?filter.name_prefix,
                error = %e,
                "could not list jobs for cancellation"
            );
            CancelReport::default()
        }
    }
}

/// List the jobs matching `filter` and cancel each live one.
///
/// Jobs the scheduler already reports as finished are skipped, so running
/// the same cleanup twice cancels each job at most once. Only the listing
/// can fail; per-job failures land in the report.
pub async fn cancel_listed<G>(gateway: &G, filter: &JobFilter) -> GatewayResult<CancelReport>
where
    G: SchedulerGateway + ?Sized,
{
    let mut report = CancelReport::default();
    let jobs = gateway.list_jobs(filter).await?;

    let timeout = gateway.cancel_timeout();
    for job in jobs.iter().filter(|j| !j.state.is_finished()) {
        match tokio::time::timeout(timeout, gateway.cancel_job(&job.job_id)).await {
            Ok(Ok(())) => {
                debug!(job_id = %job.job_id, name = %job.name, "job cancelled");
                report.cancelled.push(job.job_id.clone());
            }
            Ok(Err(e)) => {
                warn!(job_id = %job.job_id, error = %e, "job cancellation failed");
                report.failed.push(job.job_id.clone());
            }
            Err(_) => {
                warn!(job_id = %job.job_id, ?timeout, "job cancellation timed out");
                report.failed.push(job.job_id.clone());
            }
        }
    }

    if !report.is_empty() {
        info!(
            name_prefix = ?filter.name_prefix,
            cancelled = report.cancelled.len(),
            failed = report.failed.len(),
            "cancelled scheduler jobs"
        );
    }

    Ok(report)
}
