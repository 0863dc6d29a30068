//! Adaptive scaling bounds for a worker pool.
//!
//! The pool grows and shrinks between `minimum` and `maximum` workers.
//! Jobs are the unit the scheduler sees; each job hosts
//! `processes_per_job` workers.
//!
//! ```text
//! target_workers = clamp(requested, minimum, maximum)
//! target_jobs    = ceil(target_workers / processes_per_job)
//!
//! live < target_jobs            → Submit(target_jobs - live)
//! live > target_jobs, pending>0 → CancelPending(min(live - target_jobs, pending))
//! otherwise                     → NoChange
//! ```

use std::fmt;
use std::sync::Arc;

use jobqueue_core::ResourceConfiguration;

use crate::error::{ClusterError, ClusterResult};

/// What the pool knows about a connected worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerDescriptor {
    pub address: String,
    pub host: String,
    pub job_id: Option<String>,
}

/// Maps a worker to the key the pool scales it by. Workers sharing a key
/// are added and retired together.
pub type ScalingKey = Arc<dyn Fn(&WorkerDescriptor) -> String + Send + Sync>;

/// A scaling decision for one reconciliation round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Submit this many more jobs.
    Submit(u32),
    /// Cancel this many pending jobs.
    CancelPending(u32),
    NoChange,
}

/// Min/max worker bounds plus the scaling key.
#[derive(Clone)]
pub struct AdaptivePolicy {
    minimum: u32,
    maximum: u32,
    scaling_key: ScalingKey,
}

impl fmt::Debug for AdaptivePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptivePolicy")
            .field("minimum", &self.minimum)
            .field("maximum", &self.maximum)
            .finish_non_exhaustive()
    }
}

/// Jobs a pool may hold at once: `ceil(core_budget / cores)`, at least one.
pub fn max_jobs(core_budget: u32, cores: u32) -> u32 {
    core_budget.div_ceil(cores.max(1)).max(1)
}

impl AdaptivePolicy {
    /// Create a policy; fails if `minimum > maximum`.
    pub fn new(minimum: u32, maximum: u32) -> ClusterResult<Self> {
        if minimum > maximum {
            return Err(ClusterError::InvalidBounds { minimum, maximum });
        }
        Ok(Self {
            minimum,
            maximum,
            scaling_key: Arc::new(|worker: &WorkerDescriptor| worker.host.clone()),
        })
    }

    /// Bounds for a configuration: at least one worker, at most
    /// `processes_per_job × max_jobs(core_budget, cores)`.
    pub fn for_configuration(resources: &ResourceConfiguration, core_budget: u32) -> Self {
        let maximum = resources.processes_per_job() * max_jobs(core_budget, resources.cores());
        Self {
            minimum: 1,
            maximum: maximum.max(1),
            scaling_key: Arc::new(|worker: &WorkerDescriptor| worker.host.clone()),
        }
    }

    /// Group workers by a custom key when scaling.
    pub fn with_scaling_key(mut self, key: ScalingKey) -> Self {
        self.scaling_key = key;
        self
    }

    /// Fewest workers the pool keeps.
    pub fn minimum(&self) -> u32 {
        self.minimum
    }

    /// Most workers the pool may grow to.
    pub fn maximum(&self) -> u32 {
        self.maximum
    }

    /// Key used to group `worker` when scaling; its host by default.
    pub fn scaling_key(&self, worker: &WorkerDescriptor) -> String {
        (self.scaling_key)(worker)
    }

    /// Clamp a requested worker count into the bounds.
    pub fn target_workers(&self, requested: u32) -> u32 {
        requested.clamp(self.minimum, self.maximum)
    }

    /// Decide how to move the job count toward the requested size.
    ///
    /// `live_jobs` counts pending and running jobs; `pending_jobs` is the
    /// pending subset, the only jobs that may be cancelled to shrink.
    pub fn decide(
        &self,
        requested_workers: u32,
        processes_per_job: u32,
        live_jobs: u32,
        pending_jobs: u32,
    ) -> ScaleDecision {
        let target_jobs = self
            .target_workers(requested_workers)
            .div_ceil(processes_per_job.max(1));

        if live_jobs < target_jobs {
            ScaleDecision::Submit(target_jobs - live_jobs)
        } else if live_jobs > target_jobs && pending_jobs > 0 {
            ScaleDecision::CancelPending((live_jobs - target_jobs).min(pending_jobs))
        } else {
            ScaleDecision::NoChange
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobqueue_core::{MemoryQuantity, Walltime};

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

    #[test]
    fn max_jobs_from_core_budget() {
        assert_eq!(max_jobs(40, 10), 4);
        assert_eq!(max_jobs(40, 12), 4);
        assert_eq!(max_jobs(40, 64), 1);
        assert_eq!(max_jobs(40, 0), 40);
    }

    #[test]
    fn bounds_scale_linearly_with_processes() {
        let one = AdaptivePolicy::for_configuration(&resources(10, 1), 40);
        let two = AdaptivePolicy::for_configuration(&resources(10, 2), 40);
        assert_eq!(one.minimum(), 1);
        assert_eq!(one.maximum(), 4);
        assert_eq!(two.maximum(), 8);
    }

    #[test]
    fn rejects_inverted_bounds() {
        assert!(matches!(
            AdaptivePolicy::new(5, 2),
            Err(ClusterError::InvalidBounds { minimum: 5, maximum: 2 })
        ));
    }

    #[test]
    fn submits_up_to_minimum() {
        let policy = AdaptivePolicy::new(1, 8).unwrap();
        assert_eq!(policy.decide(0, 1, 0, 0), ScaleDecision::Submit(1));
        assert_eq!(policy.decide(0, 1, 1, 1), ScaleDecision::NoChange);
    }

    #[test]
    fn caps_at_maximum() {
        let policy = AdaptivePolicy::new(1, 4).unwrap();
        // 100 workers requested, 2 per job, max 4 workers → 2 jobs.
        assert_eq!(policy.decide(100, 2, 0, 0), ScaleDecision::Submit(2));
        assert_eq!(policy.decide(100, 2, 2, 0), ScaleDecision::NoChange);
    }

    #[test]
    fn shrinks_only_through_pending_jobs() {
        let policy = AdaptivePolicy::new(1, 8).unwrap();
        assert_eq!(policy.decide(1, 1, 4, 2), ScaleDecision::CancelPending(2));
        assert_eq!(policy.decide(1, 1, 4, 0), ScaleDecision::NoChange);
        assert_eq!(policy.decide(3, 1, 4, 3), ScaleDecision::CancelPending(1));
    }

    #[test]
    fn scaling_key_defaults_to_host_and_can_be_replaced() {
        let worker = WorkerDescriptor {
            address: "tcp://10.0.0.5:40123".to_string(),
            host: "node05".to_string(),
            job_id: Some("77".to_string()),
        };
        let policy = AdaptivePolicy::new(1, 2).unwrap();
        assert_eq!(policy.scaling_key(&worker), "node05");

        let by_job = policy.with_scaling_key(Arc::new(|w: &WorkerDescriptor| {
            w.job_id.clone().unwrap_or_default()
        }));
        assert_eq!(by_job.scaling_key(&worker), "77");
    }
}
