//! Cluster supervisor: drives one acquisition across configurations.
//!
//! ```text
//! Attempting(0) ──ready──▶ Ready
//!      │ timeout / jobs lost / submission refused
//!      ▼
//! Attempting(1) ── ... ──▶ Attempting(n-1) ──timeout──▶ ExhaustedConfigurations
//!
//! any state ──cancel──▶ Cancelled      (cleanup every job name used)
//! any state ──error───▶ Failed         (same cleanup, error returned as-is)
//! ```
//!
//! Attempts run strictly one after another. Cancellation is checked at
//! every sleep and between attempts, so it is honoured within one poll
//! interval (plus one bounded scheduler call).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use jobqueue_cluster::{ClusterError, ClusterHandle, PoolLauncher};
use jobqueue_core::{
    AcquireOptions, ClusterDefaults, JobFilter, QueuePolicy, ResourceConfiguration,
};
use jobqueue_gateway::{GatewayError, SchedulerGateway};
use jobqueue_health::ReadinessMonitor;

use crate::error::{AcquireError, AcquireResult};
use crate::planner::ConfigurationPlanner;

/// Where an acquisition stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquirePhase {
    /// Trying the configuration at this index.
    Attempting(usize),
    /// A cluster met the readiness threshold and was handed back.
    Ready,
    /// Every configuration ran out of time or lost its jobs.
    ExhaustedConfigurations,
    Cancelled,
    /// A non-recoverable error, with its message.
    Failed(String),
}

impl AcquirePhase {
    /// Whether the acquisition has finished.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AcquirePhase::Attempting(_))
    }
}

/// Terminal result of an acquisition.
#[derive(Debug)]
pub enum AcquisitionOutcome {
    /// The caller now owns the cluster and must close it.
    Ready(ClusterHandle),
    /// No configuration became ready; `waited` spans every attempt.
    TimedOutAllConfigurations { attempts: usize, waited: Duration },
    Cancelled,
    /// A collaborator failed; its error is passed through unchanged.
    Error(AcquireError),
}

impl AcquisitionOutcome {
    /// Convert into a `Result`, mapping every non-ready outcome to an error.
    pub fn into_result(self) -> AcquireResult<ClusterHandle> {
        match self {
            AcquisitionOutcome::Ready(handle) => Ok(handle),
            AcquisitionOutcome::TimedOutAllConfigurations { attempts, waited } => {
                Err(AcquireError::timed_out(attempts, waited))
            }
            AcquisitionOutcome::Cancelled => Err(AcquireError::Cancelled),
            AcquisitionOutcome::Error(e) => Err(e),
        }
    }
}

/// How one attempt ended without becoming ready.
enum AttemptEnd {
    TimedOut,
    Lost,
    Unavailable,
}

/// What interrupted an attempt.
enum Interrupt {
    Cancelled,
    Failed(AcquireError),
}

/// Owns one acquisition: its token, the job names it used, its phases.
///
/// Concurrent acquisitions each use their own supervisor; the token in
/// every job name keeps their jobs apart.
pub struct ClusterSupervisor {
    gateway: Arc<dyn SchedulerGateway>,
    launcher: Arc<dyn PoolLauncher>,
    options: AcquireOptions,
    token: String,
    job_names: Vec<String>,
    history: Vec<AcquirePhase>,
}

impl ClusterSupervisor {
    /// Create a supervisor with a fresh random token.
    pub fn new(
        gateway: Arc<dyn SchedulerGateway>,
        launcher: Arc<dyn PoolLauncher>,
        options: AcquireOptions,
    ) -> Self {
        let mut token = Uuid::new_v4().simple().to_string();
        token.truncate(8);
        Self {
            gateway,
            launcher,
            options,
            token,
            job_names: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Use a fixed token instead of a random one.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    /// Token embedded in every job name of this acquisition.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Job names used so far, one per attempt.
    pub fn job_names(&self) -> &[String] {
        &self.job_names
    }

    /// Every phase entered, in order.
    pub fn history(&self) -> &[AcquirePhase] {
        &self.history
    }

    /// The current phase; `None` before `run`.
    pub fn phase(&self) -> Option<&AcquirePhase> {
        self.history.last()
    }

    fn job_name(&self, attempt: usize) -> String {
        format!("{}-{}-{:02}", self.options.job_prefix, self.token, attempt)
    }

    fn enter(&mut self, phase: AcquirePhase) {
        debug!(token = %self.token, ?phase, "acquisition phase");
        self.history.push(phase);
    }

    /// Try `configurations` in order until one becomes ready.
    pub async fn run(
        &mut self,
        configurations: &[ResourceConfiguration],
        mut cancel: watch::Receiver<bool>,
    ) -> AcquisitionOutcome {
        if configurations.is_empty() {
            self.enter(AcquirePhase::Failed(AcquireError::NoConfigurations.to_string()));
            return AcquisitionOutcome::Error(AcquireError::NoConfigurations);
        }

        let started = Instant::now();
        let last = configurations.len() - 1;

        for (index, config) in configurations.iter().enumerate() {
            self.enter(AcquirePhase::Attempting(index));

            match self.attempt(index, config, index == last, &mut cancel).await {
                Ok(Ok(handle)) => {
                    self.enter(AcquirePhase::Ready);
                    info!(
                        job_name = handle.job_name(),
                        address = handle.address(),
                        queue = config.queue(),
                        elapsed = ?started.elapsed(),
                        "cluster ready"
                    );
                    return AcquisitionOutcome::Ready(handle);
                }
                Ok(Err(end)) => {
                    let why = match end {
                        AttemptEnd::TimedOut => "timed out",
                        AttemptEnd::Lost => "jobs lost",
                        AttemptEnd::Unavailable => "configuration unavailable",
                    };
                    if index < last {
                        info!(attempt = index + 1, reason = why, "moving to next configuration");
                    } else {
                        warn!(attempt = index + 1, reason = why, "last configuration failed");
                    }
                }
                Err(Interrupt::Cancelled) => {
                    warn!(token = %self.token, "acquisition cancelled, cleaning up");
                    self.cleanup().await;
                    self.enter(AcquirePhase::Cancelled);
                    return AcquisitionOutcome::Cancelled;
                }
                Err(Interrupt::Failed(e)) => {
                    error!(token = %self.token, error = %e, "acquisition failed, cleaning up");
                    self.cleanup().await;
                    self.enter(AcquirePhase::Failed(e.to_string()));
                    return AcquisitionOutcome::Error(e);
                }
            }
        }

        let waited = started.elapsed();
        self.cleanup().await;
        self.enter(AcquirePhase::ExhaustedConfigurations);
        error!(attempts = configurations.len(), ?waited, "all configurations exhausted");
        AcquisitionOutcome::TimedOutAllConfigurations {
            attempts: configurations.len(),
            waited,
        }
    }

    /// Run one attempt. The handle is closed on every path that does not
    /// return it.
    async fn attempt(
        &mut self,
        index: usize,
        config: &ResourceConfiguration,
        is_last: bool,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Result<ClusterHandle, AttemptEnd>, Interrupt> {
        if *cancel.borrow() {
            return Err(Interrupt::Cancelled);
        }

        let job_name = self.job_name(index);
        // Recorded before submitting so cleanup covers a half-made attempt.
        self.job_names.push(job_name.clone());
        info!(attempt = index + 1, %job_name, %config, "attempting configuration");

        let handle = match ClusterHandle::create(self.launcher.as_ref(), &job_name, config.clone())
            .await
        {
            Ok(handle) => handle,
            Err(e) if !is_last && configuration_unavailable(&e) => {
                warn!(%job_name, error = %e, "could not start cluster");
                // The scheduler may have taken the job before the call failed.
                self.cancel_attempt_jobs(&job_name).await;
                return Ok(Err(AttemptEnd::Unavailable));
            }
            Err(e) => return Err(Interrupt::Failed(e.into())),
        };

        let end = self.wait_ready(&handle, &job_name, cancel).await;
        match end {
            Ok(Ok(())) => Ok(Ok(handle)),
            Ok(Err(end)) => {
                handle.close().await;
                Ok(Err(end))
            }
            Err(interrupt) => {
                handle.close().await;
                Err(interrupt)
            }
        }
    }

    /// Poll until the handle is ready, the attempt's budget runs out, or
    /// something interrupts.
    async fn wait_ready(
        &self,
        handle: &ClusterHandle,
        job_name: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Result<(), AttemptEnd>, Interrupt> {
        let attempt_start = Instant::now();
        let monitor = ReadinessMonitor::new(self.gateway.as_ref(), handle);

        if pause(self.options.grace_period, cancel).await {
            return Err(Interrupt::Cancelled);
        }

        loop {
            let result = monitor
                .poll_once(job_name, self.options.min_workers, self.options.recency_window)
                .await
                .map_err(|e| Interrupt::Failed(e.into()))?;

            if result.ready {
                return Ok(Ok(()));
            }
            if result.readiness.is_lost() {
                warn!(%job_name, reason = %result.reason, "abandoning attempt");
                return Ok(Err(AttemptEnd::Lost));
            }

            let elapsed = attempt_start.elapsed();
            debug!(%job_name, reason = %result.reason, ?elapsed, "not ready");
            if elapsed > self.options.wait_timeout {
                warn!(%job_name, ?elapsed, timeout = ?self.options.wait_timeout, "attempt timed out");
                return Ok(Err(AttemptEnd::TimedOut));
            }

            if pause(self.options.poll_interval, cancel).await {
                return Err(Interrupt::Cancelled);
            }
        }
    }

    /// Cancel every job this acquisition submitted. Never fails.
    async fn cleanup(&self) {
        for job_name in &self.job_names {
            self.cancel_attempt_jobs(job_name).await;
        }
    }

    /// Cancel the jobs of one attempt. Never fails.
    async fn cancel_attempt_jobs(&self, job_name: &str) {
        let filter = JobFilter::for_user(self.gateway.user()).with_name_prefix(job_name);
        let report = self.gateway.cancel_jobs(&filter).await;
        if !report.failed.is_empty() {
            warn!(%job_name, failed = ?report.failed, "some jobs could not be cancelled");
        }
    }
}

/// Whether a creation failure means "try the next configuration" rather
/// than "give up".
fn configuration_unavailable(e: &ClusterError) -> bool {
    e.is_transient() || matches!(e, ClusterError::Gateway(GatewayError::Rejected(_)))
}

/// Sleep for `duration`. Returns `true` if cancellation was requested.
async fn pause(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow_and_update() {
        return true;
    }

    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = cancel.changed() => match changed {
                Ok(()) if *cancel.borrow_and_update() => return true,
                Ok(()) => {}
                Err(_) => {
                    // Nobody can cancel any more.
                    (&mut sleep).await;
                    return false;
                }
            }
        }
    }
}

/// Plan configurations and acquire a ready cluster.
///
/// `cancel` flips to `true` to abandon the acquisition; every job
/// submitted so far is cancelled before this returns.
pub async fn acquire_cluster(
    gateway: Arc<dyn SchedulerGateway>,
    launcher: Arc<dyn PoolLauncher>,
    defaults: &ClusterDefaults,
    queues: QueuePolicy,
    options: AcquireOptions,
    cancel: watch::Receiver<bool>,
) -> AcquireResult<ClusterHandle> {
    let configurations = ConfigurationPlanner::new(gateway.as_ref(), queues)
        .plan(options.reservation.as_deref(), defaults)
        .await?;

    let mut supervisor = ClusterSupervisor::new(gateway, launcher, options);
    info!(
        token = supervisor.token(),
        configurations = configurations.len(),
        "acquiring cluster"
    );
    supervisor.run(&configurations, cancel).await.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;

    use jobqueue_cluster::JobQueueLauncher;
    use jobqueue_core::{MemoryQuantity, PoolSettings, Walltime};
    use jobqueue_gateway::InMemoryScheduler;

    fn config(queue: &str) -> ResourceConfiguration {
        ResourceConfiguration::new(
            4,
            1,
            MemoryQuantity::from_gib(8),
            Walltime::from_secs(1800),
            queue,
        )
        .unwrap()
    }

    fn supervisor(sched: &Arc<InMemoryScheduler>) -> ClusterSupervisor {
        // Keep the autoscale loop out of the way of scripted job states.
        let settings = PoolSettings {
            adapt_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let launcher = Arc::new(JobQueueLauncher::new(sched.clone(), settings));
        ClusterSupervisor::new(sched.clone(), launcher, AcquireOptions::default()).with_token("t0")
    }

    #[test]
    fn random_tokens_are_short_and_distinct() {
        let sched = Arc::new(InMemoryScheduler::new("alice"));
        let launcher = Arc::new(JobQueueLauncher::new(sched.clone(), PoolSettings::default()));
        let a = ClusterSupervisor::new(sched.clone(), launcher.clone(), AcquireOptions::default());
        let b = ClusterSupervisor::new(sched, launcher, AcquireOptions::default());
        assert_eq!(a.token().len(), 8);
        assert_ne!(a.token(), b.token());
        assert_eq!(a.job_name(3), format!("jq-{}-03", a.token()));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_on_first_configuration() {
        let sched = Arc::new(InMemoryScheduler::new("alice").with_start_after(Duration::from_secs(5)));
        let mut sup = supervisor(&sched);
        let (_tx, rx) = watch::channel(false);

        let outcome = sup.run(&[config("short"), config("normal")], rx).await;
        let handle = outcome.into_result().unwrap();
        assert_eq!(handle.job_name(), "jq-t0-00");
        assert_eq!(sup.history(), [AcquirePhase::Attempting(0), AcquirePhase::Ready]);
        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn lost_jobs_advance_without_waiting_for_timeout() {
        let sched = Arc::new(InMemoryScheduler::new("alice"));
        let mut sup = supervisor(&sched);
        let (_tx, rx) = watch::channel(false);

        let watcher = {
            let sched = sched.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                for job in sched.jobs() {
                    sched.set_state(&job.job_id, jobqueue_core::JobState::Unknown("FAILED".into()));
                }
                tokio::time::sleep(Duration::from_secs(20)).await;
                sched.start_jobs("jq-t0-01")
            })
        };

        let started = Instant::now();
        let handle = sup
            .run(&[config("short"), config("normal")], rx)
            .await
            .into_result()
            .unwrap();
        assert_eq!(handle.job_name(), "jq-t0-01");
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(watcher.await.unwrap(), 1);
        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_submission_moves_on_then_fails_on_last() {
        let sched = Arc::new(InMemoryScheduler::new("alice"));
        sched.set_reject_submissions(true);
        let mut sup = supervisor(&sched);
        let (_tx, rx) = watch::channel(false);

        let outcome = sup.run(&[config("bogus"), config("short")], rx).await;
        assert!(matches!(
            outcome,
            AcquisitionOutcome::Error(AcquireError::Cluster(ClusterError::Gateway(
                GatewayError::Rejected(_)
            )))
        ));
        assert_eq!(sup.job_names(), ["jq-t0-00", "jq-t0-01"]);
        assert_eq!(sup.history()[..2], [AcquirePhase::Attempting(0), AcquirePhase::Attempting(1)]);
        assert!(matches!(sup.phase(), Some(AcquirePhase::Failed(_))));
        assert_eq!(sched.cancel_requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_plan_is_an_error() {
        let sched = Arc::new(InMemoryScheduler::new("alice"));
        let mut sup = supervisor(&sched);
        let (_tx, rx) = watch::channel(false);

        let outcome = sup.run(&[], rx).await;
        assert!(matches!(outcome, AcquisitionOutcome::Error(AcquireError::NoConfigurations)));
        assert!(sup.phase().is_some_and(AcquirePhase::is_terminal));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_submits_nothing() {
        let sched = Arc::new(InMemoryScheduler::new("alice"));
        let mut sup = supervisor(&sched);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let outcome = sup.run(&[config("short")], rx).await;
        assert!(matches!(outcome, AcquisitionOutcome::Cancelled));
        assert!(sched.submissions().is_empty());
    }
}
