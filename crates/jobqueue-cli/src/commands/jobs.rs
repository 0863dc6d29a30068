use jobqueue_core::{JobFilter, JobqueueConfig};
use jobqueue_gateway::SchedulerGateway;

/// Print the user's jobs, optionally narrowed by name prefix.
pub async fn list(config: JobqueueConfig, name: Option<String>) -> anyhow::Result<()> {
    let gateway = super::gateway(&config)?;
    let mut filter = JobFilter::for_user(gateway.user());
    if let Some(prefix) = name {
        filter = filter.with_name_prefix(prefix);
    }

    let jobs = gateway.list_jobs(&filter).await?;
    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }

    println!("{:<12} {:<28} {:<12} START", "JOBID", "NAME", "STATE");
    for job in jobs {
        let start = job
            .start_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<12} {:<28} {:<12} {}",
            job.job_id,
            job.name,
            job.state.label(),
            start
        );
    }
    Ok(())
}

/// Cancel every job whose name starts with `name`.
pub async fn cancel(config: JobqueueConfig, name: &str) -> anyhow::Result<()> {
    anyhow::ensure!(!name.is_empty(), "refusing to cancel with an empty name prefix");

    let gateway = super::gateway(&config)?;
    let filter = JobFilter::for_user(gateway.user()).with_name_prefix(name);
    let report = gateway.cancel_jobs(&filter).await;

    println!(
        "Cancelled {} job(s){}",
        report.cancelled.len(),
        if report.failed.is_empty() {
            String::new()
        } else {
            format!(", {} failed: {}", report.failed.len(), report.failed.join(", "))
        }
    );
    if !report.names.is_empty() {
        println!("Listing failed; cancelled by name: {}", report.names.join(", "));
    }
    Ok(())
}
