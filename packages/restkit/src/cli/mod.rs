//! Operator CLI: start workers and renewers, prune finished tasks.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Settings;
use crate::queue::{cleanup, QueueKind, Renewer, RenewerConfig, Worker, WorkerConfig};
use crate::sharding::{ConnectionRouter, ShardDirectory};
use crate::tasks::{SharedTaskRegistry, TaskStatus};

#[derive(Parser, Debug)]
#[command(name = "restkit")]
#[command(about = "Task queue administration for restkit services")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, global = true, default_value = "restkit.yml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Task queue administration (priority variant)
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },
    /// Jobs queue administration (scheduled variant)
    Mule {
        #[command(subcommand)]
        command: MuleCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum WorkerCommands {
    /// Start the background worker threads
    Start {
        /// Gap between polling sweeps, in seconds
        #[arg(short, long)]
        gap: Option<f64>,
        /// Task status to process (repeatable)
        #[arg(short, long = "status")]
        status: Vec<TaskStatus>,
        /// Number of worker threads
        #[arg(short = 'n', long)]
        number_of_threads: Option<usize>,
        /// Custom SQL filter for tasks
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Renew in-progress tasks whose lease went stale
    Renew {
        /// Gap between renewal sweeps, in seconds
        #[arg(short, long)]
        gap: Option<f64>,
    },
    /// Delete successful tasks older than the retention window
    Cleanup {
        /// Days of successful tasks to keep
        #[arg(short, long)]
        days: Option<i64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum MuleCommands {
    /// Start the scheduled-queue worker
    Start {
        /// Gap between polling sweeps, in seconds
        #[arg(short = 'i', long)]
        query_interval: Option<f64>,
        /// Task status to process (repeatable)
        #[arg(short, long = "status")]
        status: Vec<TaskStatus>,
    },
    /// Renew in-progress scheduled tasks whose lease went stale
    Renew {
        /// Gap between renewal sweeps, in seconds
        #[arg(short, long)]
        gap: Option<f64>,
    },
}

/// Execute a parsed command until completion or cancellation.
pub async fn run(cli: Cli, registry: SharedTaskRegistry, shutdown: CancellationToken) -> Result<()> {
    let mut settings = Settings::load(&cli.config)?;

    match cli.command {
        Commands::Worker { command } => match command {
            WorkerCommands::Start {
                gap,
                status,
                number_of_threads,
                filter,
            } => {
                if let Some(gap) = gap {
                    settings.worker.gap = gap;
                }
                let threads = number_of_threads.unwrap_or(settings.worker.number_of_threads);
                start_workers(
                    QueueKind::Priority,
                    &settings,
                    registry,
                    shutdown,
                    settings.worker.gap_duration(),
                    status,
                    filter,
                    threads,
                )
                .await
            }
            WorkerCommands::Renew { gap } => {
                if let Some(gap) = gap {
                    settings.renew_worker.gap = gap;
                }
                start_renewer(
                    QueueKind::Priority,
                    &settings,
                    shutdown,
                    RenewerConfig {
                        window: settings.renew_worker.window(),
                        gap: settings.renew_worker.gap_duration(),
                    },
                )
                .await
            }
            WorkerCommands::Cleanup { days } => {
                let days = days.unwrap_or(settings.worker.cleanup_time_limitation);
                run_cleanup(QueueKind::Priority, &settings, &registry, days).await
            }
        },
        Commands::Mule { command } => match command {
            MuleCommands::Start {
                query_interval,
                status,
            } => {
                if let Some(interval) = query_interval {
                    settings.jobs.interval = interval;
                }
                start_workers(
                    QueueKind::Scheduled,
                    &settings,
                    registry,
                    shutdown,
                    settings.jobs.interval_duration(),
                    status,
                    None,
                    1,
                )
                .await
            }
            MuleCommands::Renew { gap } => {
                if let Some(gap) = gap {
                    settings.renew_mule_worker.gap = gap;
                }
                start_renewer(
                    QueueKind::Scheduled,
                    &settings,
                    shutdown,
                    RenewerConfig {
                        window: settings.renew_mule_worker.window(),
                        gap: settings.renew_mule_worker.gap_duration(),
                    },
                )
                .await
            }
        },
    }
}

async fn build_topology(
    settings: &Settings,
) -> Result<(Arc<ShardDirectory>, Arc<ConnectionRouter>)> {
    let directory = Arc::new(
        ShardDirectory::from_settings(settings)
            .await
            .context("failed to open the shard directory")?,
    );
    let router = Arc::new(ConnectionRouter::new(
        directory.clone(),
        settings.process_name.clone(),
        settings.db.max_connections,
    ));
    Ok((directory, router))
}

#[allow(clippy::too_many_arguments)]
async fn start_workers(
    queue: QueueKind,
    settings: &Settings,
    registry: SharedTaskRegistry,
    shutdown: CancellationToken,
    gap: std::time::Duration,
    statuses: Vec<TaskStatus>,
    filter: Option<String>,
    threads: usize,
) -> Result<()> {
    let statuses = if statuses.is_empty() {
        vec![TaskStatus::New]
    } else {
        statuses
    };

    let status_list = statuses
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(",");
    info!(
        queue = queue.label(),
        threads,
        gap_ms = gap.as_millis() as u64,
        statuses = %status_list,
        "starting workers"
    );

    let (directory, router) = build_topology(settings).await?;

    let mut handles = Vec::with_capacity(threads);
    for i in 0..threads {
        let worker = Worker::new(
            queue,
            directory.clone(),
            router.clone(),
            registry.clone(),
            WorkerConfig {
                gap,
                worker_id: format!("{}-{}", queue.label(), i),
            },
            shutdown.clone(),
        );
        let statuses = statuses.clone();
        let filter = filter.clone();
        handles.push(tokio::spawn(async move {
            worker.run(&statuses, filter.as_deref(), -1).await
        }));
    }

    // Workers are isolated: one loop aborting (a bookkeeping failure kills
    // only its own task, leaving the lease for the renewer) must not mask
    // or outlive-block the others, so every handle is joined concurrently
    // and reported independently.
    let mut failed = 0usize;
    for (i, result) in futures::future::join_all(handles)
        .await
        .into_iter()
        .enumerate()
    {
        let worker_id = format!("{}-{}", queue.label(), i);
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                failed += 1;
                error!(
                    queue = queue.label(),
                    worker_id = %worker_id,
                    error = %e,
                    "worker exited with error"
                );
            }
            Err(e) => {
                failed += 1;
                error!(
                    queue = queue.label(),
                    worker_id = %worker_id,
                    error = %e,
                    "worker task panicked"
                );
            }
        }
    }

    router.dispose_all().await;

    if failed > 0 {
        anyhow::bail!("{failed} of {threads} workers exited with errors");
    }
    Ok(())
}

async fn start_renewer(
    queue: QueueKind,
    settings: &Settings,
    shutdown: CancellationToken,
    config: RenewerConfig,
) -> Result<()> {
    let (directory, router) = build_topology(settings).await?;

    let renewer = Renewer::new(queue, directory, router.clone(), config, shutdown);
    renewer.run().await?;

    router.dispose_all().await;
    Ok(())
}

async fn run_cleanup(
    queue: QueueKind,
    settings: &Settings,
    registry: &SharedTaskRegistry,
    days: i64,
) -> Result<()> {
    let older_than = Utc::now() - chrono::Duration::days(days);
    let (directory, router) = build_topology(settings).await?;

    let deleted = cleanup(queue, &directory, &router, registry, older_than).await?;
    info!(queue = queue.label(), days, deleted, "cleanup finished");

    router.dispose_all().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_worker_start_flags() {
        let cli = Cli::try_parse_from([
            "restkit", "worker", "start", "--gap", "2", "--status", "new", "--status",
            "failed", "--number-of-threads", "4", "--filter", "type = 'awesome_task'",
        ])
        .unwrap();

        match cli.command {
            Commands::Worker {
                command:
                    WorkerCommands::Start {
                        gap,
                        status,
                        number_of_threads,
                        filter,
                    },
            } => {
                assert_eq!(gap, Some(2.0));
                assert_eq!(status, vec![TaskStatus::New, TaskStatus::Failed]);
                assert_eq!(number_of_threads, Some(4));
                assert_eq!(filter.as_deref(), Some("type = 'awesome_task'"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_mule_start_interval() {
        let cli =
            Cli::try_parse_from(["restkit", "mule", "start", "--query-interval", "0.5"]).unwrap();

        match cli.command {
            Commands::Mule {
                command: MuleCommands::Start { query_interval, .. },
            } => assert_eq!(query_interval, Some(0.5)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_cleanup_days() {
        let cli = Cli::try_parse_from(["restkit", "worker", "cleanup", "--days", "30"]).unwrap();

        match cli.command {
            Commands::Worker {
                command: WorkerCommands::Cleanup { days },
            } => assert_eq!(days, Some(30)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_status() {
        let result =
            Cli::try_parse_from(["restkit", "worker", "start", "--status", "done"]);
        assert!(result.is_err());
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from([
            "restkit", "worker", "renew", "--config", "/etc/restkit/production.yml",
        ])
        .unwrap();
        assert_eq!(
            cli.config,
            PathBuf::from("/etc/restkit/production.yml")
        );
    }
}
