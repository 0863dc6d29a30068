//! Configuration planner: the ordered list of configurations to try.
//!
//! ```text
//! reservation active?  ──yes──▶ [reserved (reduced), short, standard]
//!        │
//!        no / query failed ───▶ [short, standard]
//! ```
//!
//! The reserved configuration halves the default footprint because a
//! reservation holds little capacity. The short queue clamps walltime to
//! its limit; the standard queue takes the caller's walltime unchanged.

use tracing::{info, warn};

use jobqueue_core::{ClusterDefaults, ConfigResult, QueuePolicy, ResourceConfiguration, Walltime};
use jobqueue_gateway::{ReservationInfo, SchedulerGateway};

/// Builds candidate configurations, most preferred first.
pub struct ConfigurationPlanner<'a> {
    gateway: &'a dyn SchedulerGateway,
    queues: QueuePolicy,
}

impl<'a> ConfigurationPlanner<'a> {
    /// Create a planner that checks reservations through `gateway`.
    pub fn new(gateway: &'a dyn SchedulerGateway, queues: QueuePolicy) -> Self {
        Self { gateway, queues }
    }

    /// Plan the configurations for one acquisition.
    ///
    /// Never returns an empty list. Fails only if `defaults` themselves do
    /// not form a valid configuration.
    pub async fn plan(
        &self,
        reservation: Option<&str>,
        defaults: &ClusterDefaults,
    ) -> ConfigResult<Vec<ResourceConfiguration>> {
        let mut plan = Vec::with_capacity(3);

        if let Some(info) = self.active_reservation(reservation).await {
            plan.push(self.reserved(&info, defaults)?);
        }
        plan.push(self.short(defaults)?);
        plan.push(self.standard(defaults)?);

        for (index, config) in plan.iter().enumerate() {
            info!(position = index + 1, %config, "planned configuration");
        }
        Ok(plan)
    }

    async fn active_reservation(&self, name: Option<&str>) -> Option<ReservationInfo> {
        let name = name?;
        match self.gateway.reservation(name).await {
            Ok(Some(info)) if info.active => Some(info),
            Ok(Some(_)) => {
                info!(reservation = name, "reservation not active");
                None
            }
            Ok(None) => {
                info!(reservation = name, "reservation not found");
                None
            }
            Err(e) => {
                warn!(reservation = name, error = %e, "reservation query failed, treating as inactive");
                None
            }
        }
    }

    fn reserved(
        &self,
        info: &ReservationInfo,
        defaults: &ClusterDefaults,
    ) -> ConfigResult<ResourceConfiguration> {
        let cores = (defaults.cores / 2).max(1);
        let processes = defaults.processes.min(cores);
        let queue = info
            .partition
            .clone()
            .unwrap_or_else(|| self.queues.standard.clone());

        Ok(ResourceConfiguration::new(
            cores,
            processes,
            defaults.memory.halved(),
            defaults.walltime,
            queue,
        )?
        .with_reservation(info.name.clone())
        .with_extra_directives(defaults.extra_directives.clone())
        .with_worker_args(lifetime_args(self.lifetime_for(defaults.walltime))))
    }

    fn short(&self, defaults: &ClusterDefaults) -> ConfigResult<ResourceConfiguration> {
        let walltime = defaults.walltime.min(self.queues.short_max_walltime);
        Ok(ResourceConfiguration::new(
            defaults.cores,
            defaults.processes,
            defaults.memory,
            walltime,
            self.queues.short.clone(),
        )?
        .with_extra_directives(defaults.extra_directives.clone())
        .with_worker_args(lifetime_args(&self.queues.short_worker_lifetime)))
    }

    fn standard(&self, defaults: &ClusterDefaults) -> ConfigResult<ResourceConfiguration> {
        Ok(ResourceConfiguration::new(
            defaults.cores,
            defaults.processes,
            defaults.memory,
            defaults.walltime,
            self.queues.standard.clone(),
        )?
        .with_extra_directives(defaults.extra_directives.clone())
        .with_worker_args(lifetime_args(&self.queues.standard_worker_lifetime)))
    }

    /// Short lifetime when the walltime would fit the short queue.
    fn lifetime_for(&self, walltime: Walltime) -> &str {
        if walltime <= self.queues.short_max_walltime {
            &self.queues.short_worker_lifetime
        } else {
            &self.queues.standard_worker_lifetime
        }
    }
}

fn lifetime_args(lifetime: &str) -> Vec<String> {
    vec!["--lifetime".to_string(), lifetime.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobqueue_core::MemoryQuantity;
    use jobqueue_gateway::InMemoryScheduler;

    fn defaults() -> ClusterDefaults {
        ClusterDefaults::default()
    }

    #[tokio::test]
    async fn active_reservation_comes_first_with_reduced_footprint() {
        let sched = InMemoryScheduler::new("alice");
        sched.set_reservation("maint", Some("gpu"), true);
        let planner = ConfigurationPlanner::new(&sched, QueuePolicy::default());

        let plan = planner.plan(Some("maint"), &defaults()).await.unwrap();
        assert_eq!(plan.len(), 3);

        let first = &plan[0];
        assert_eq!(first.reservation(), Some("maint"));
        assert_eq!(first.queue(), "gpu");
        assert_eq!(first.cores(), 5);
        assert_eq!(first.memory(), MemoryQuantity::from_gib(10));

        assert!(plan[1..].iter().all(|c| c.reservation().is_none()));
        assert_eq!(plan[1].queue(), "short");
        assert_eq!(plan[2].queue(), "normal");
        assert_eq!(plan[1].cores(), 10);
    }

    #[tokio::test]
    async fn reservation_without_partition_uses_standard_queue() {
        let sched = InMemoryScheduler::new("alice");
        sched.set_reservation("maint", None, true);
        let planner = ConfigurationPlanner::new(&sched, QueuePolicy::default());

        let plan = planner.plan(Some("maint"), &defaults()).await.unwrap();
        assert_eq!(plan[0].queue(), "normal");
    }

    #[tokio::test]
    async fn inactive_missing_or_failing_reservation_falls_back() {
        let sched = InMemoryScheduler::new("alice");
        sched.set_reservation("maint", Some("gpu"), false);
        let planner = ConfigurationPlanner::new(&sched, QueuePolicy::default());

        for name in [Some("maint"), Some("nope"), None] {
            let plan = planner.plan(name, &defaults()).await.unwrap();
            assert_eq!(plan.len(), 2);
            assert!(plan.iter().all(|c| c.reservation().is_none()));
        }

        sched.set_broken(true);
        let plan = planner.plan(Some("maint"), &defaults()).await.unwrap();
        assert_eq!(plan.len(), 2);
    }

    #[tokio::test]
    async fn short_queue_clamps_walltime_and_sets_lifetimes() {
        let sched = InMemoryScheduler::new("alice");
        let planner = ConfigurationPlanner::new(&sched, QueuePolicy::default());
        let long = ClusterDefaults {
            walltime: "08:00:00".parse().unwrap(),
            ..defaults()
        };

        let plan = planner.plan(None, &long).await.unwrap();
        assert_eq!(plan[0].walltime().to_string(), "03:59:59");
        assert_eq!(plan[0].worker_args(), ["--lifetime", "25m"]);
        assert_eq!(plan[1].walltime().to_string(), "08:00:00");
        assert_eq!(plan[1].worker_args(), ["--lifetime", "1h"]);
    }

    #[tokio::test]
    async fn three_and_a_half_hours_still_fits_the_short_queue() {
        let sched = InMemoryScheduler::new("alice");
        sched.set_reservation("maint", Some("gpu"), true);
        let planner = ConfigurationPlanner::new(&sched, QueuePolicy::default());
        let defaults = ClusterDefaults {
            walltime: "03:30:00".parse().unwrap(),
            ..defaults()
        };

        let plan = planner.plan(Some("maint"), &defaults).await.unwrap();
        assert_eq!(plan[0].worker_args(), ["--lifetime", "25m"]);
        assert_eq!(plan[1].walltime().to_string(), "03:30:00");

        let four_hours = ClusterDefaults {
            walltime: "04:00:00".parse().unwrap(),
            ..self::defaults()
        };
        let plan = planner.plan(Some("maint"), &four_hours).await.unwrap();
        assert_eq!(plan[0].worker_args(), ["--lifetime", "1h"]);
        assert_eq!(plan[1].walltime().to_string(), "03:59:59");
    }

    #[tokio::test]
    async fn single_core_reservation_keeps_one_core() {
        let sched = InMemoryScheduler::new("alice");
        sched.set_reservation("maint", Some("gpu"), true);
        let planner = ConfigurationPlanner::new(&sched, QueuePolicy::default());
        let small = ClusterDefaults {
            cores: 1,
            processes: 1,
            ..defaults()
        };

        let plan = planner.plan(Some("maint"), &small).await.unwrap();
        assert_eq!(plan[0].cores(), 1);
        assert_eq!(plan[0].processes_per_job(), 1);
    }

    #[tokio::test]
    async fn invalid_defaults_are_rejected() {
        let sched = InMemoryScheduler::new("alice");
        let planner = ConfigurationPlanner::new(&sched, QueuePolicy::default());
        let bad = ClusterDefaults {
            cores: 2,
            processes: 4,
            ..defaults()
        };
        assert!(planner.plan(None, &bad).await.is_err());
    }
}
