use anyhow::Context;

use jobqueue_core::JobqueueConfig;
use jobqueue_supervisor::ConfigurationPlanner;

use super::SizingArgs;

/// Print the planned configurations as JSON, most preferred first.
pub async fn plan(
    mut config: JobqueueConfig,
    reservation: Option<String>,
    sizing: SizingArgs,
) -> anyhow::Result<()> {
    sizing.apply(&mut config);
    let reservation = reservation.or_else(|| config.acquire.reservation.clone());

    let defaults = config.defaults.resolve().context("invalid [defaults] section")?;
    let queues = config.queues.resolve().context("invalid [queues] section")?;
    let gateway = super::gateway(&config)?;

    let plan = ConfigurationPlanner::new(gateway.as_ref(), queues)
        .plan(reservation.as_deref(), &defaults)
        .await?;

    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}
