//! jobqueue-health: readiness checks for a worker pool.
//!
//! A pool is ready once the scheduler runs at least one of its jobs and
//! the control plane reports enough live workers. The monitor takes a
//! single look per call; the supervisor owns the polling cadence.
//!
//! # Architecture
//!
//! ```text
//! ReadinessMonitor (one poll per call)
//!   ├── SchedulerGateway::list_jobs(user, prefix)
//!   ├── JobCensus (recency filter, RUNNING / PENDING / other)
//!   ├── ClusterHandle::worker_count() when anything runs
//!   └── ReadinessResult { ready, running_workers, reason }
//! ```
//!
//! # Recency
//!
//! Job names are reused across acquisitions only by accident, but the
//! scheduler keeps finished jobs around for a while. Jobs that started
//! more than `recency_window` ago belong to someone else's attempt and are
//! ignored. Jobs with no start time yet always count.

pub mod census;
pub mod error;
pub mod monitor;

pub use census::{JobCensus, is_recent};
pub use error::ReadinessError;
pub use monitor::{Readiness, ReadinessMonitor, ReadinessResult};
