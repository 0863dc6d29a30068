//! jobqueue-gateway: typed access to the batch scheduler.
//!
//! Everything above this crate talks to the scheduler through the
//! `SchedulerGateway` trait. The Slurm implementation shells out to the
//! scheduler CLI via a `CommandRunner`, so the output parsing can be
//! exercised without a live cluster.
//!
//! # Architecture
//!
//! ```text
//! SchedulerGateway (trait)
//!   ├── SlurmGateway
//!   │   ├── CommandRunner (tokio::process, per-call timeout)
//!   │   └── parse::{squeue, sbatch, scontrol}
//!   └── InMemoryScheduler (programmable fake)
//! ```
//!
//! The gateway never retries. Transient failures surface as
//! `GatewayError` and the caller's polling loop decides what to do.

pub mod error;
pub mod gateway;
pub mod memory;
pub mod parse;
pub mod runner;
pub mod script;
pub mod slurm;

pub use error::{GatewayError, GatewayResult};
pub use gateway::{CancelReport, ReservationInfo, SchedulerGateway, cancel_listed, cancel_matching};
pub use memory::InMemoryScheduler;
pub use runner::{CommandOutput, CommandRunner, Invocation, TokioCommandRunner};
pub use script::JobScript;
pub use slurm::SlurmGateway;
