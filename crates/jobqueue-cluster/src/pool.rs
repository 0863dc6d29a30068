//! Worker pools: the control plane that submits worker jobs.
//!
//! `WorkerPool` is the seam to whatever actually manages workers. The
//! default `JobQueuePool` drives the scheduler directly: it submits worker
//! jobs through the gateway, counts live workers from running jobs, and
//! runs an autoscale loop that reconciles the job count with the
//! requested size inside the adaptive bounds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use jobqueue_core::{JobFilter, JobRecord, JobState, PoolSettings, ResourceConfiguration};
use jobqueue_gateway::{JobScript, SchedulerGateway};

use crate::error::{ClusterError, ClusterResult};
use crate::policy::{AdaptivePolicy, ScaleDecision};

/// A running worker pool.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Network endpoint of the pool's control plane.
    fn address(&self) -> &str;

    /// Workers currently connected and able to take work.
    async fn worker_count(&self) -> ClusterResult<u32>;

    /// Attach the scaling bounds and start adapting within them.
    async fn adapt(&self, policy: AdaptivePolicy) -> ClusterResult<()>;

    /// Request a number of workers; the pool clamps it to its bounds.
    async fn scale(&self, workers: u32) -> ClusterResult<()>;

    /// Stop scaling and release every job. Safe to call repeatedly.
    async fn close(&self) -> ClusterResult<()>;
}

/// Starts worker pools for a given configuration.
#[async_trait]
pub trait PoolLauncher: Send + Sync {
    /// Launch a pool whose jobs are all named `job_name`.
    async fn launch(
        &self,
        job_name: &str,
        resources: &ResourceConfiguration,
    ) -> ClusterResult<Arc<dyn WorkerPool>>;

    /// Total cores one pool may hold at once.
    fn core_budget(&self) -> u32 {
        40
    }
}

/// Launches `JobQueuePool`s against a scheduler gateway.
pub struct JobQueueLauncher {
    gateway: Arc<dyn SchedulerGateway>,
    settings: PoolSettings,
}

impl JobQueueLauncher {
    /// Create a launcher submitting through `gateway`.
    pub fn new(gateway: Arc<dyn SchedulerGateway>, settings: PoolSettings) -> Self {
        Self { gateway, settings }
    }
}

#[async_trait]
impl PoolLauncher for JobQueueLauncher {
    async fn launch(
        &self,
        job_name: &str,
        resources: &ResourceConfiguration,
    ) -> ClusterResult<Arc<dyn WorkerPool>> {
        let pool = JobQueuePool::start(
            self.gateway.clone(),
            job_name.to_string(),
            resources.clone(),
            self.settings.clone(),
        )
        .await?;
        Ok(Arc::new(pool))
    }

    fn core_budget(&self) -> u32 {
        self.settings.core_budget
    }
}

struct AdaptTask {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// A worker pool whose workers are scheduler jobs named `job_name`.
pub struct JobQueuePool {
    shared: Arc<PoolShared>,
    address: String,
    requested_tx: watch::Sender<u32>,
    adapt_task: Mutex<Option<AdaptTask>>,
    closed: AtomicBool,
}

/// State the autoscale loop shares with the pool.
struct PoolShared {
    gateway: Arc<dyn SchedulerGateway>,
    job_name: String,
    resources: ResourceConfiguration,
    settings: PoolSettings,
    address: String,
}

impl PoolShared {
    fn filter(&self) -> JobFilter {
        JobFilter::for_user(self.gateway.user()).with_name_prefix(self.job_name.clone())
    }

    /// Jobs belonging to exactly this pool.
    async fn jobs(&self) -> ClusterResult<Vec<JobRecord>> {
        let jobs = self.gateway.list_jobs(&self.filter()).await?;
        Ok(jobs.into_iter().filter(|j| j.name == self.job_name).collect())
    }

    fn script(&self) -> JobScript {
        let r = &self.resources;
        let command = self
            .settings
            .worker_command
            .replace("{address}", &self.address)
            .replace("{processes}", &r.processes_per_job().to_string())
            .replace("{threads}", &r.threads_per_process().to_string())
            .replace(
                "{memory}",
                &r.memory().split(r.processes_per_job()).bytes().to_string(),
            );

        JobScript {
            prologue: self.settings.prologue.clone(),
            log_directory: self.settings.log_directory.clone(),
            working_directory: self.settings.working_directory.clone(),
            ..JobScript::new(self.job_name.clone(), r.clone(), command)
        }
    }

    async fn submit_jobs(&self, count: u32) -> ClusterResult<()> {
        let script = self.script();
        for _ in 0..count {
            self.gateway.submit(&script).await?;
        }
        Ok(())
    }

    /// One reconciliation round of the autoscale loop.
    async fn reconcile(&self, policy: &AdaptivePolicy, requested: u32) -> ClusterResult<ScaleDecision> {
        let jobs = self.jobs().await?;
        let pending: Vec<&JobRecord> = jobs.iter().filter(|j| j.state == JobState::Pending).collect();
        let running = jobs.iter().filter(|j| j.state == JobState::Running).count();
        let live = (running + pending.len()) as u32;

        let decision = policy.decide(
            requested,
            self.resources.processes_per_job(),
            live,
            pending.len() as u32,
        );

        match decision {
            ScaleDecision::Submit(n) => {
                debug!(job_name = %self.job_name, from = live, add = n, "scaling up");
                self.submit_jobs(n).await?;
            }
            ScaleDecision::CancelPending(n) => {
                debug!(job_name = %self.job_name, from = live, remove = n, "scaling down");
                // Newest submissions first; they are furthest from starting.
                for job in pending.iter().rev().take(n as usize) {
                    if let Err(e) = self.gateway.cancel_job(&job.job_id).await {
                        warn!(job_id = %job.job_id, error = %e, "failed to cancel surplus job");
                    }
                }
            }
            ScaleDecision::NoChange => {}
        }

        Ok(decision)
    }
}

impl JobQueuePool {
    /// Submit the first job and return the pool.
    pub async fn start(
        gateway: Arc<dyn SchedulerGateway>,
        job_name: String,
        resources: ResourceConfiguration,
        settings: PoolSettings,
    ) -> ClusterResult<Self> {
        let host = settings
            .control_plane_host
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "localhost".to_string());
        let address = format!("tcp://{host}:{}", settings.control_plane_port);

        let shared = Arc::new(PoolShared {
            gateway,
            job_name,
            resources,
            settings,
            address: address.clone(),
        });
        shared.submit_jobs(1).await?;

        info!(
            job_name = %shared.job_name,
            %address,
            resources = %shared.resources,
            "worker pool started"
        );

        let (requested_tx, _) = watch::channel(1);
        Ok(Self {
            shared,
            address,
            requested_tx,
            adapt_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Name carried by every job of this pool.
    pub fn job_name(&self) -> &str {
        &self.shared.job_name
    }
}

#[async_trait]
impl WorkerPool for JobQueuePool {
    fn address(&self) -> &str {
        &self.address
    }

    async fn worker_count(&self) -> ClusterResult<u32> {
        let running = self
            .shared
            .jobs()
            .await?
            .iter()
            .filter(|j| j.state == JobState::Running)
            .count() as u32;
        Ok(running * self.shared.resources.processes_per_job())
    }

    async fn adapt(&self, policy: AdaptivePolicy) -> ClusterResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClusterError::Closed(self.shared.job_name.clone()));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = self.shared.clone();
        let requested_rx = self.requested_tx.subscribe();

        let handle = tokio::spawn(async move {
            run_adapt_loop(shared, policy, requested_rx, shutdown_rx).await;
        });

        let mut task = self.adapt_task.lock().await;
        if let Some(old) = task.replace(AdaptTask {
            handle,
            shutdown_tx,
        }) {
            // Replacing the policy restarts the loop.
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }
        Ok(())
    }

    async fn scale(&self, workers: u32) -> ClusterResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClusterError::Closed(self.shared.job_name.clone()));
        }
        self.requested_tx.send_replace(workers);
        Ok(())
    }

    async fn close(&self) -> ClusterResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(task) = self.adapt_task.lock().await.take() {
            let _ = task.shutdown_tx.send(true);
            task.handle.abort();
        }

        let report = self.shared.gateway.cancel_jobs(&self.shared.filter()).await;
        info!(
            job_name = %self.shared.job_name,
            cancelled = report.cancelled.len(),
            failed = report.failed.len(),
            "worker pool closed"
        );
        Ok(())
    }
}

/// The autoscale loop for one pool.
async fn run_adapt_loop(
    shared: Arc<PoolShared>,
    policy: AdaptivePolicy,
    mut requested: watch::Receiver<u32>,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = shared.settings.adapt_interval;
    debug!(
        job_name = %shared.job_name,
        minimum = policy.minimum(),
        maximum = policy.maximum(),
        ?interval,
        "autoscale loop starting"
    );

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = requested.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => {
                debug!(job_name = %shared.job_name, "autoscale loop shutting down");
                break;
            }
        }

        let target = *requested.borrow_and_update();
        if let Err(e) = shared.reconcile(&policy, target).await {
            warn!(job_name = %shared.job_name, error = %e, "autoscale round failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use jobqueue_core::{MemoryQuantity, Walltime};
    use jobqueue_gateway::InMemoryScheduler;

    fn resources(processes: u32) -> ResourceConfiguration {
        ResourceConfiguration::new(
            4,
            processes,
            MemoryQuantity::from_gib(8),
            Walltime::from_secs(1800),
            "short",
        )
        .unwrap()
    }

    fn settings() -> PoolSettings {
        PoolSettings {
            control_plane_host: Some("head".to_string()),
            adapt_interval: Duration::from_secs(1),
            ..Default::default()
        }
    }

    async fn start(sched: &Arc<InMemoryScheduler>, processes: u32) -> JobQueuePool {
        JobQueuePool::start(sched.clone(), "jq-test-00".to_string(), resources(processes), settings())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn start_submits_one_job_with_rendered_command() {
        let sched = Arc::new(InMemoryScheduler::new("alice"));
        let pool = start(&sched, 2).await;

        assert_eq!(pool.address(), "tcp://head:8786");
        let submitted = sched.submissions();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].name, "jq-test-00");
        assert!(submitted[0].command.contains("tcp://head:8786"));
        assert!(submitted[0].command.contains("--nworkers 2"));
        assert!(submitted[0].command.contains("--nthreads 2"));
        assert!(submitted[0].command.contains(&(4u64 * 1024 * 1024 * 1024).to_string()));
    }

    #[tokio::test]
    async fn worker_count_counts_running_processes() {
        let sched = Arc::new(InMemoryScheduler::new("alice"));
        let pool = start(&sched, 2).await;
        assert_eq!(pool.worker_count().await.unwrap(), 0);

        sched.start_jobs("jq-test-00");
        assert_eq!(pool.worker_count().await.unwrap(), 2);

        // Jobs of another pool with a longer name are not counted.
        sched.add_job("jq-test-001", JobState::Running, None);
        assert_eq!(pool.worker_count().await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn adapt_loop_scales_within_bounds() {
        let sched = Arc::new(InMemoryScheduler::new("alice"));
        let pool = start(&sched, 1).await;
        pool.adapt(AdaptivePolicy::new(1, 3).unwrap()).await.unwrap();

        pool.scale(10).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sched.submissions().len(), 3);

        pool.scale(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sched.jobs().len(), 1);

        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_cancels_jobs() {
        let sched = Arc::new(InMemoryScheduler::new("alice"));
        let pool = start(&sched, 1).await;
        pool.adapt(AdaptivePolicy::new(1, 2).unwrap()).await.unwrap();

        pool.close().await.unwrap();
        pool.close().await.unwrap();

        assert!(sched.jobs().is_empty());
        assert_eq!(sched.cancel_requests().len(), 1);
        assert!(matches!(pool.scale(2).await, Err(ClusterError::Closed(_))));
    }

    #[tokio::test]
    async fn start_fails_when_submission_is_rejected() {
        let sched = Arc::new(InMemoryScheduler::new("alice"));
        sched.set_reject_submissions(true);
        let result = JobQueuePool::start(
            sched.clone(),
            "jq-test-00".to_string(),
            resources(1),
            settings(),
        )
        .await;
        assert!(matches!(result, Err(ClusterError::Gateway(_))));
    }
}
