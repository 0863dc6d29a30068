//! Slurm gateway: drives `squeue`, `sbatch`, `scancel` and `scontrol`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use jobqueue_core::{JobFilter, JobRecord, SchedulerSettings};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{CancelReport, ReservationInfo, SchedulerGateway, cancel_listed};
use crate::parse::{
    SQUEUE_FORMAT, parse_reservation, parse_sbatch_output, parse_squeue_line, parse_squeue_output,
};
use crate::runner::{CommandOutput, CommandRunner, Invocation, TokioCommandRunner};
use crate::script::JobScript;

/// Gateway to a Slurm cluster through its command-line tools.
pub struct SlurmGateway {
    runner: Arc<dyn CommandRunner>,
    user: String,
    bin_dir: Option<PathBuf>,
    command_timeout: Duration,
    cancel_timeout: Duration,
}

impl SlurmGateway {
    /// Create a gateway that runs the real scheduler CLI.
    ///
    /// The user falls back to `$USER` when the settings leave it unset.
    pub fn new(settings: &SchedulerSettings) -> Self {
        Self::with_runner(settings, Arc::new(TokioCommandRunner))
    }

    /// Create a gateway with a custom command runner.
    pub fn with_runner(settings: &SchedulerSettings, runner: Arc<dyn CommandRunner>) -> Self {
        let user = settings
            .user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_default();

        Self {
            runner,
            user,
            bin_dir: settings.bin_dir.clone(),
            command_timeout: settings.command_timeout,
            cancel_timeout: settings.cancel_timeout,
        }
    }

    fn invocation(&self, program: &str) -> Invocation {
        let path = match &self.bin_dir {
            Some(dir) => dir.join(program),
            None => PathBuf::from(program),
        };
        Invocation::new(path, self.command_timeout)
    }

    async fn run_checked(&self, invocation: Invocation) -> GatewayResult<CommandOutput> {
        debug!(program = %invocation.program_name(), args = ?invocation.args, "scheduler command");
        let output = self.runner.run(&invocation).await?;
        if !output.success {
            return Err(GatewayError::CommandFailed {
                program: invocation.program_name(),
                status: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// squeue's message for a job id it has already forgotten.
fn is_invalid_job_id(stderr: &str) -> bool {
    stderr.contains("Invalid job id")
}

/// sbatch errors that no amount of retrying will clear.
const PERMANENT_SUBMIT_ERRORS: &[&str] = &[
    "invalid partition",
    "invalid account",
    "invalid qos",
    "requested reservation is invalid",
    "requested node configuration is not available",
    "requested time limit is invalid",
    "memory required by task is not available",
    "more processors requested than permitted",
    "job violates accounting/qos policy",
    "access denied",
];

fn is_permanent_submit_error(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    PERMANENT_SUBMIT_ERRORS.iter().any(|p| stderr.contains(p))
}

#[async_trait]
impl SchedulerGateway for SlurmGateway {
    fn user(&self) -> &str {
        &self.user
    }

    fn cancel_timeout(&self) -> Duration {
        self.cancel_timeout
    }

    async fn list_jobs(&self, filter: &JobFilter) -> GatewayResult<Vec<JobRecord>> {
        let mut invocation = self
            .invocation("squeue")
            .arg("--noheader")
            .arg(format!("--format={SQUEUE_FORMAT}"));
        if let Some(user) = &filter.user {
            invocation = invocation.arg(format!("--user={user}"));
        }

        let output = self.run_checked(invocation).await?;
        Ok(parse_squeue_output(&output.stdout)
            .into_iter()
            .filter(|job| filter.matches_name(&job.name))
            .collect())
    }

    async fn describe_job(&self, job_id: &str) -> GatewayResult<JobRecord> {
        let invocation = self
            .invocation("squeue")
            .arg("--noheader")
            .arg(format!("--format={SQUEUE_FORMAT}"))
            .arg(format!("--jobs={job_id}"));

        let output = self.runner.run(&invocation).await?;
        if !output.success {
            if is_invalid_job_id(&output.stderr) {
                return Err(GatewayError::NotFound(job_id.to_string()));
            }
            return Err(GatewayError::CommandFailed {
                program: invocation.program_name(),
                status: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        output
            .stdout
            .lines()
            .filter_map(parse_squeue_line)
            .find(|job| job.job_id == job_id)
            .ok_or_else(|| GatewayError::NotFound(job_id.to_string()))
    }

    async fn submit(&self, script: &JobScript) -> GatewayResult<String> {
        let invocation = self
            .invocation("sbatch")
            .arg("--parsable")
            .stdin(script.render());

        let output = self.runner.run(&invocation).await?;
        if !output.success {
            let stderr = output.stderr.trim().to_string();
            if is_permanent_submit_error(&stderr) {
                return Err(GatewayError::Rejected(stderr));
            }
            // Controller outages and socket timeouts may clear up.
            return Err(GatewayError::CommandFailed {
                program: invocation.program_name(),
                status: output.code,
                stderr,
            });
        }

        let job_id = parse_sbatch_output(&output.stdout)?;
        info!(%job_id, name = %script.name, queue = %script.resources.queue(), "job submitted");
        Ok(job_id)
    }

    async fn cancel_job(&self, job_id: &str) -> GatewayResult<()> {
        let invocation = self.invocation("scancel").arg(job_id.to_string());
        self.run_checked(Invocation {
            timeout: self.cancel_timeout,
            ..invocation
        })
        .await?;
        Ok(())
    }

    /// Cancel by listing first; if `squeue` fails, fall back to
    /// `scancel --name`, which matches the prefix as an exact job name.
    async fn cancel_jobs(&self, filter: &JobFilter) -> CancelReport {
        let error = match cancel_listed(self, filter).await {
            Ok(report) => return report,
            Err(e) => e,
        };

        let Some(name) = filter.name_prefix.as_deref().filter(|n| !n.is_empty()) else {
            warn!(error = %error, "could not list jobs for cancellation");
            return CancelReport::default();
        };
        warn!(%name, error = %error, "could not list jobs, cancelling by name");

        let mut invocation = self.invocation("scancel").arg(format!("--name={name}"));
        if let Some(user) = &filter.user {
            invocation = invocation.arg(format!("--user={user}"));
        }
        let invocation = Invocation {
            timeout: self.cancel_timeout,
            ..invocation
        };

        let mut report = CancelReport::default();
        match self.run_checked(invocation).await {
            Ok(_) => {
                info!(%name, "cancelled scheduler jobs by name");
                report.names.push(name.to_string());
            }
            Err(e) => {
                warn!(%name, error = %e, "cancellation by name failed");
                report.failed.push(name.to_string());
            }
        }
        report
    }

    async fn reservation(&self, name: &str) -> GatewayResult<Option<ReservationInfo>> {
        let invocation = self
            .invocation("scontrol")
            .arg("show")
            .arg("reservation")
            .arg(name.to_string())
            .arg("--oneliner");

        let output = self.runner.run(&invocation).await?;
        if !output.success {
            // scontrol exits 1 with "Reservation <name> not found".
            if output.stdout.contains("not found") || output.stderr.contains("not found") {
                return Ok(None);
            }
            return Err(GatewayError::CommandFailed {
                program: invocation.program_name(),
                status: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        Ok(parse_reservation(&output.stdout, name))
    }
}
