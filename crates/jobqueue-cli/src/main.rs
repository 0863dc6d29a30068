//! jobqueue: acquire a ready worker pool from a batch scheduler.
//!
//! # Usage
//!
//! ```text
//! jobqueue acquire --reservation maint --wait-timeout 10m --hold
//! jobqueue plan --cores 8 --processes 2
//! jobqueue jobs --name jq-
//! jobqueue cancel --name jq-1a2b3c4d-
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::SizingArgs;

#[derive(Parser)]
#[command(
    name = "jobqueue",
    about = "Acquire batch-scheduled worker pools",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file (default: ./jobqueue.toml if present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Acquire a ready cluster and print its address.
    Acquire {
        /// Scheduler reservation to try first.
        #[arg(long)]
        reservation: Option<String>,

        /// Budget per configuration, e.g. "300s" or "10m".
        #[arg(long)]
        wait_timeout: Option<String>,

        /// Workers required before the cluster counts as ready.
        #[arg(long)]
        min_workers: Option<u32>,

        #[command(flatten)]
        sizing: SizingArgs,

        /// Keep the cluster until Ctrl-C, then release it.
        #[arg(long)]
        hold: bool,
    },
    /// Print the configurations an acquisition would try, in order.
    Plan {
        #[arg(long)]
        reservation: Option<String>,

        #[command(flatten)]
        sizing: SizingArgs,
    },
    /// List the current user's jobs.
    Jobs {
        /// Only jobs whose name starts with this prefix.
        #[arg(long)]
        name: Option<String>,
    },
    /// Cancel the current user's jobs matching a name prefix.
    Cancel {
        #[arg(long)]
        name: String,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,jobqueue=debug"))?,
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Acquire {
            reservation,
            wait_timeout,
            min_workers,
            sizing,
            hold,
        } => {
            let overrides = commands::acquire::Overrides {
                reservation,
                wait_timeout,
                min_workers,
                sizing,
            };
            commands::acquire::acquire(config, overrides, hold).await
        }
        Command::Plan { reservation, sizing } => {
            commands::plan::plan(config, reservation, sizing).await
        }
        Command::Jobs { name } => commands::jobs::list(config, name).await,
        Command::Cancel { name } => commands::jobs::cancel(config, &name).await,
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
