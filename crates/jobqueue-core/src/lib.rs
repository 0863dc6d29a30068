//! jobqueue-core: shared types for batch worker-pool acquisition.
//!
//! - **`types`** - `ResourceConfiguration`, `JobRecord`, `JobState`
//! - **`units`** - memory quantities, walltimes, duration strings
//! - **`config`** - `jobqueue.toml` parsing

pub mod config;
pub mod error;
pub mod types;
pub mod units;

pub use config::{
    AcquireOptions, ClusterDefaults, JobqueueConfig, PoolSettings, QueuePolicy, SchedulerSettings,
};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
pub use units::{MemoryQuantity, Walltime, parse_duration};
