//! Subcommand implementations and the helpers they share.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;

use jobqueue_core::JobqueueConfig;
use jobqueue_gateway::SlurmGateway;

pub mod acquire;
pub mod jobs;
pub mod plan;

const DEFAULT_CONFIG_FILE: &str = "jobqueue.toml";

/// Per-job sizing flags that override `[defaults]`.
#[derive(Args, Debug, Default)]
pub struct SizingArgs {
    /// Cores per job.
    #[arg(long)]
    pub cores: Option<u32>,

    /// Worker processes per job.
    #[arg(long)]
    pub processes: Option<u32>,

    /// Memory per job, e.g. "20 GiB".
    #[arg(long)]
    pub memory: Option<String>,

    /// Walltime per job, e.g. "01:30:00".
    #[arg(long)]
    pub walltime: Option<String>,
}

impl SizingArgs {
    pub fn apply(self, config: &mut JobqueueConfig) {
        let defaults = &mut config.defaults;
        if let Some(cores) = self.cores {
            defaults.cores = cores;
        }
        if let Some(processes) = self.processes {
            defaults.processes = processes;
        }
        if let Some(memory) = self.memory {
            defaults.memory = memory;
        }
        if let Some(walltime) = self.walltime {
            defaults.walltime = walltime;
        }
    }
}

/// Load the configuration file, or defaults when there is none.
///
/// An explicit path must exist; the implicit `./jobqueue.toml` is optional.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<JobqueueConfig> {
    match path {
        Some(path) => JobqueueConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => {
            let implicit = Path::new(DEFAULT_CONFIG_FILE);
            if implicit.exists() {
                JobqueueConfig::from_file(implicit)
                    .with_context(|| format!("loading {DEFAULT_CONFIG_FILE}"))
            } else {
                Ok(JobqueueConfig::default())
            }
        }
    }
}

/// Build the Slurm gateway from the scheduler section.
pub fn gateway(config: &JobqueueConfig) -> anyhow::Result<Arc<SlurmGateway>> {
    let settings = config.scheduler.resolve().context("invalid [scheduler] section")?;
    Ok(Arc::new(SlurmGateway::new(&settings)))
}
