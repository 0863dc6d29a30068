//! jobqueue-supervisor: acquire a ready worker pool from a batch scheduler.
//!
//! The supervisor plans an ordered list of resource configurations, then
//! tries them one at a time: create a cluster, poll readiness, and fall
//! back to the next configuration when the current one does not become
//! ready in time. Every failure path cancels the jobs it submitted.
//!
//! # Architecture
//!
//! ```text
//! acquire_cluster()
//!   ├── ConfigurationPlanner
//!   │   └── SchedulerGateway::reservation() → [reserved?, short, standard]
//!   └── ClusterSupervisor (one per acquisition, unique token)
//!       ├── ClusterHandle::create(config)  per attempt
//!       ├── ReadinessMonitor::poll_once()  every poll_interval
//!       └── cleanup: cancel_jobs() for every job name used
//! ```
//!
//! Job names follow `{prefix}-{token}-{attempt:02}` so concurrent
//! acquisitions never see each other's jobs.

pub mod error;
pub mod planner;
pub mod supervisor;

pub use error::{AcquireError, AcquireResult};
pub use planner::ConfigurationPlanner;
pub use supervisor::{AcquirePhase, AcquisitionOutcome, ClusterSupervisor, acquire_cluster};
