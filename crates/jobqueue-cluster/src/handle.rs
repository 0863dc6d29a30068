//! `ClusterHandle`: one running worker pool plus its scaling bounds.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use jobqueue_core::ResourceConfiguration;

use crate::error::ClusterResult;
use crate::policy::AdaptivePolicy;
use crate::pool::{PoolLauncher, WorkerPool};

/// Owns one running cluster instance.
///
/// Dropping a handle does not release its jobs; call [`ClusterHandle::close`].
pub struct ClusterHandle {
    job_name: String,
    resources: ResourceConfiguration,
    pool: Arc<dyn WorkerPool>,
    policy: AdaptivePolicy,
    closed: AtomicBool,
}

impl fmt::Debug for ClusterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterHandle")
            .field("job_name", &self.job_name)
            .field("address", &self.pool.address())
            .field("resources", &self.resources)
            .field("policy", &self.policy)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ClusterHandle {
    /// Launch a pool for `resources` and attach its adaptive policy.
    ///
    /// Every job the pool submits is named `job_name`. If the policy cannot
    /// be attached the pool is closed before the error is returned.
    pub async fn create(
        launcher: &dyn PoolLauncher,
        job_name: &str,
        resources: ResourceConfiguration,
    ) -> ClusterResult<Self> {
        let policy = AdaptivePolicy::for_configuration(&resources, launcher.core_budget());
        let pool = launcher.launch(job_name, &resources).await?;

        if let Err(e) = pool.adapt(policy.clone()).await {
            if let Err(close_err) = pool.close().await {
                warn!(job_name, error = %close_err, "failed to close half-started pool");
            }
            return Err(e);
        }

        info!(
            job_name,
            address = pool.address(),
            minimum = policy.minimum(),
            maximum = policy.maximum(),
            "cluster created"
        );
        Ok(Self::new(job_name, resources, pool, policy))
    }

    /// Wrap an already-running pool.
    pub fn new(
        job_name: impl Into<String>,
        resources: ResourceConfiguration,
        pool: Arc<dyn WorkerPool>,
        policy: AdaptivePolicy,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            resources,
            pool,
            policy,
            closed: AtomicBool::new(false),
        }
    }

    /// Control-plane endpoint workers connect to.
    pub fn address(&self) -> &str {
        self.pool.address()
    }

    /// Name carried by every job of this cluster.
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Configuration the cluster was created with.
    pub fn resources(&self) -> &ResourceConfiguration {
        &self.resources
    }

    /// Scaling bounds attached at creation.
    pub fn policy(&self) -> &AdaptivePolicy {
        &self.policy
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Live workers reported by the control plane.
    pub async fn worker_count(&self) -> ClusterResult<u32> {
        self.pool.worker_count().await
    }

    /// Ask the pool for `workers` workers, clamped to the policy bounds.
    pub async fn scale(&self, workers: u32) -> ClusterResult<()> {
        self.pool.scale(self.policy.target_workers(workers)).await
    }

    /// Release the pool and its jobs. Idempotent; failures are logged.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.pool.close().await {
            Ok(()) => info!(job_name = %self.job_name, "cluster closed"),
            Err(e) => warn!(job_name = %self.job_name, error = %e, "cluster close failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use jobqueue_core::{JobState, MemoryQuantity, PoolSettings, Walltime};
    use jobqueue_gateway::InMemoryScheduler;

    use crate::error::ClusterError;
    use crate::pool::JobQueueLauncher;

    fn resources(cores: u32, processes: u32) -> ResourceConfiguration {
        ResourceConfiguration::new(
            cores,
            processes,
            MemoryQuantity::from_gib(20),
            Walltime::from_secs(1800),
            "short",
        )
        .unwrap()
    }

    /// A pool whose `adapt` always fails and which counts closes.
    struct StubbornPool {
        closes: AtomicU32,
        scaled: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl WorkerPool for StubbornPool {
        fn address(&self) -> &str {
            "tcp://stub:1"
        }
        async fn worker_count(&self) -> ClusterResult<u32> {
            Ok(0)
        }
        async fn adapt(&self, _policy: AdaptivePolicy) -> ClusterResult<()> {
            Err(ClusterError::Closed("stub".to_string()))
        }
        async fn scale(&self, workers: u32) -> ClusterResult<()> {
            self.scaled.lock().unwrap().push(workers);
            Ok(())
        }
        async fn close(&self) -> ClusterResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Err(ClusterError::Closed("stub".to_string()))
        }
    }

    struct StubLauncher(Arc<StubbornPool>);

    #[async_trait]
    impl PoolLauncher for StubLauncher {
        async fn launch(
            &self,
            _job_name: &str,
            _resources: &ResourceConfiguration,
        ) -> ClusterResult<Arc<dyn WorkerPool>> {
            Ok(self.0.clone())
        }
    }

    fn stub() -> Arc<StubbornPool> {
        Arc::new(StubbornPool {
            closes: AtomicU32::new(0),
            scaled: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn create_attaches_bounds_from_configuration() {
        let sched = Arc::new(InMemoryScheduler::new("alice"));
        let launcher = JobQueueLauncher::new(sched.clone(), PoolSettings::default());

        let handle = ClusterHandle::create(&launcher, "jq-ab-00", resources(10, 2))
            .await
            .unwrap();
        assert_eq!(handle.policy().minimum(), 1);
        assert_eq!(handle.policy().maximum(), 8);
        assert_eq!(sched.submissions().len(), 1);
        assert_eq!(sched.submissions()[0].name, "jq-ab-00");

        sched.start_jobs("jq-ab-00");
        assert_eq!(handle.worker_count().await.unwrap(), 2);
        handle.close().await;
    }

    #[tokio::test]
    async fn failed_adapt_closes_the_pool() {
        let pool = stub();
        let err = ClusterHandle::create(&StubLauncher(pool.clone()), "jq-x-00", resources(4, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Closed(_)));
        assert_eq!(pool.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_swallows_errors() {
        let pool = stub();
        let handle = ClusterHandle::new(
            "jq-x-00",
            resources(4, 1),
            pool.clone(),
            AdaptivePolicy::new(1, 4).unwrap(),
        );
        handle.close().await;
        handle.close().await;
        assert!(handle.is_closed());
        assert_eq!(pool.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn scale_is_clamped_to_policy() {
        let pool = stub();
        let handle = ClusterHandle::new(
            "jq-x-00",
            resources(4, 1),
            pool.clone(),
            AdaptivePolicy::new(1, 4).unwrap(),
        );
        handle.scale(100).await.unwrap();
        handle.scale(0).await.unwrap();
        assert_eq!(*pool.scaled.lock().unwrap(), vec![4, 1]);
    }

    #[tokio::test]
    async fn close_cancels_scheduler_jobs() {
        let sched = Arc::new(InMemoryScheduler::new("alice"));
        let launcher = JobQueueLauncher::new(sched.clone(), PoolSettings::default());
        let handle = ClusterHandle::create(&launcher, "jq-cd-00", resources(10, 1))
            .await
            .unwrap();
        sched.add_job("unrelated", JobState::Running, None);

        handle.close().await;
        let left: Vec<_> = sched.jobs().into_iter().map(|j| j.name).collect();
        assert_eq!(left, vec!["unrelated".to_string()]);
    }
}
