//! jobqueue-cluster: one running worker pool and its teardown.
//!
//! A `ClusterHandle` owns a `WorkerPool` (the control plane that submits
//! worker jobs) together with the `AdaptivePolicy` bounding how far the
//! pool may grow. The scaling itself belongs to the pool; the handle only
//! configures it and tears it down.
//!
//! # Architecture
//!
//! ```text
//! ClusterHandle
//!   ├── AdaptivePolicy (min = 1, max = processes × max_jobs)
//!   └── Arc<dyn WorkerPool>
//!       └── JobQueuePool (default)
//!           ├── SchedulerGateway (submit / list / cancel)
//!           └── autoscale loop (interval vs shutdown watch)
//! ```

pub mod error;
pub mod handle;
pub mod policy;
pub mod pool;

pub use error::{ClusterError, ClusterResult};
pub use handle::ClusterHandle;
pub use policy::{AdaptivePolicy, ScaleDecision, ScalingKey, WorkerDescriptor, max_jobs};
pub use pool::{JobQueueLauncher, JobQueuePool, PoolLauncher, WorkerPool};
