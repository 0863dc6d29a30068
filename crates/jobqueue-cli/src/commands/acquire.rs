use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use jobqueue_cluster::JobQueueLauncher;
use jobqueue_core::JobqueueConfig;
use jobqueue_supervisor::acquire_cluster;

use super::SizingArgs;

/// Command-line overrides for `acquire`.
#[derive(Debug, Default)]
pub struct Overrides {
    pub reservation: Option<String>,
    pub wait_timeout: Option<String>,
    pub min_workers: Option<u32>,
    pub sizing: SizingArgs,
}

impl Overrides {
    fn apply(self, config: &mut JobqueueConfig) {
        if let Some(reservation) = self.reservation {
            config.acquire.reservation = Some(reservation);
        }
        if let Some(wait_timeout) = self.wait_timeout {
            config.acquire.wait_timeout = wait_timeout;
        }
        if let Some(min_workers) = self.min_workers {
            config.acquire.min_workers = min_workers;
        }
        self.sizing.apply(config);
    }
}

pub async fn acquire(
    mut config: JobqueueConfig,
    overrides: Overrides,
    hold: bool,
) -> anyhow::Result<()> {
    overrides.apply(&mut config);

    let defaults = config.defaults.resolve().context("invalid [defaults] section")?;
    let queues = config.queues.resolve().context("invalid [queues] section")?;
    let options = config.acquire.resolve().context("invalid [acquire] section")?;
    let pool = config.pool.resolve().context("invalid [pool] section")?;

    let gateway = super::gateway(&config)?;
    let launcher = Arc::new(JobQueueLauncher::new(gateway.clone(), pool));

    // Ctrl-C cancels a running acquisition, or releases a held cluster.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let mut hold_rx = cancel_rx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            let _ = cancel_tx.send(true);
        }
    });

    let handle = acquire_cluster(gateway, launcher, &defaults, queues, options, cancel_rx).await?;

    let summary = serde_json::json!({
        "address": handle.address(),
        "job_name": handle.job_name(),
        "configuration": handle.resources(),
        "minimum_workers": handle.policy().minimum(),
        "maximum_workers": handle.policy().maximum(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if hold {
        info!(job_name = handle.job_name(), "holding cluster until Ctrl-C");
        while !*hold_rx.borrow_and_update() {
            if hold_rx.changed().await.is_err() {
                break;
            }
        }
        handle.close().await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_file_values() {
        let mut config = JobqueueConfig::default();
        Overrides {
            reservation: Some("maint".to_string()),
            wait_timeout: Some("10m".to_string()),
            min_workers: Some(4),
            sizing: SizingArgs {
                walltime: Some("02:00:00".to_string()),
                ..Default::default()
            },
        }
        .apply(&mut config);

        let options = config.acquire.resolve().unwrap();
        assert_eq!(options.reservation.as_deref(), Some("maint"));
        assert_eq!(options.wait_timeout.as_secs(), 600);
        assert_eq!(options.min_workers, 4);
        assert_eq!(config.defaults.resolve().unwrap().walltime.to_string(), "02:00:00");
    }

    #[test]
    fn absent_overrides_keep_file_values() {
        let mut config = JobqueueConfig::default();
        config.acquire.reservation = Some("from-file".to_string());
        Overrides::default().apply(&mut config);
        assert_eq!(config.acquire.reservation.as_deref(), Some("from-file"));
        assert_eq!(config.acquire.min_workers, 1);
    }
}
