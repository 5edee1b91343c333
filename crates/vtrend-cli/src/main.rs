use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vtrend_storage::PgStore;
use vtrend_sync::{retention, LogFormat, PipelineConfig, StatsPipeline};

#[derive(Debug, Parser)]
#[command(name = "vtrend-cli")]
#[command(about = "Competition view-statistics pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the hourly/daily (and optional cleanup) jobs until SIGINT/SIGTERM.
    ServeScheduler,
    /// Serve the HTTP trigger surface; also runs the scheduler when enabled.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Reconcile, aggregate and snapshot every active competition.
    UpdateAll,
    /// Reconcile and aggregate one competition.
    Update { competition_id: String },
    /// Snapshot one competition, or every active one, from stored counts.
    Snapshot {
        #[arg(long)]
        competition: Option<String>,
    },
    /// Write today's system-wide rollup.
    Daily,
    /// Delete snapshots older than `--days` (default: retention_days) or before `--before`.
    Cleanup {
        #[arg(long, conflicts_with = "before")]
        days: Option<i64>,
        /// YYYY-MM-DD
        #[arg(long)]
        before: Option<String>,
    },
    /// Delete snapshots strictly between two dates (at most 90 days apart).
    DeleteRange {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },
    /// Delete the whole snapshot history of one competition.
    Purge {
        competition_id: String,
        #[arg(long)]
        yes: bool,
    },
    /// Collection counts and snapshot age range.
    StorageStats {
        /// Include cleanup recommendations.
        #[arg(long)]
        advice: bool,
    },
    /// Apply database migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = PipelineConfig::from_env().context("loading configuration")?;
    init_tracing(&config);

    if let Commands::Migrate = cli.command {
        let store = PgStore::connect(&config.database_url, config.max_db_connections)
            .await
            .context("connecting to postgres")?;
        store.migrate().await.context("running migrations")?;
        println!("migrations applied");
        return Ok(());
    }

    let pipeline = vtrend_sync::build_pipeline(&config)
        .await
        .context("initializing pipeline")?;

    match cli.command {
        Commands::ServeScheduler => {
            let config = PipelineConfig {
                scheduler_enabled: true,
                ..config
            };
            run_scheduler(&pipeline, &config).await?;
        }
        Commands::Serve { port } => {
            let sched = pipeline.maybe_build_scheduler(&config).await?;
            if let Some(sched) = &sched {
                sched.start().await.context("starting scheduler")?;
            }
            let port = port.unwrap_or(config.web_port);
            vtrend_web::serve(vtrend_web::AppState::new(pipeline), port).await?;
            if let Some(mut sched) = sched {
                sched.shutdown().await.context("stopping scheduler")?;
            }
        }
        Commands::UpdateAll => {
            let summary = pipeline.update_all_active_competitions().await?;
            println!(
                "update complete: run_id={} success={} total={}",
                summary.run_id, summary.success_count, summary.total_count
            );
            for id in &summary.failed_competitions {
                println!("  failed: {id}");
            }
        }
        Commands::Update { competition_id } => {
            print_json(&pipeline.update_competition_stats(&competition_id).await?)?;
        }
        Commands::Snapshot { competition } => match competition {
            Some(id) => print_json(&pipeline.save_competition_hourly_snapshot(&id).await?)?,
            None => print_json(&pipeline.save_all_hourly_snapshots().await?)?,
        },
        Commands::Daily => {
            print_json(&pipeline.save_daily_aggregation().await?)?;
        }
        Commands::Cleanup { days, before } => {
            let cancel = cancel_on_ctrl_c();
            let report = match before {
                Some(date) => {
                    let cutoff = retention::parse_date(&date, pipeline.context().bucket_offset)?;
                    pipeline.cleanup_old_snapshots(cutoff, &cancel).await?
                }
                None => {
                    let days = days.unwrap_or(i64::from(config.retention_days));
                    pipeline.cleanup_snapshots_older_than(days, &cancel).await?
                }
            };
            print_json(&report)?;
        }
        Commands::DeleteRange { start, end } => {
            let cancel = cancel_on_ctrl_c();
            print_json(&pipeline.delete_data_by_dates(&start, &end, &cancel).await?)?;
        }
        Commands::Purge { competition_id, yes } => {
            let cancel = cancel_on_ctrl_c();
            let report = pipeline
                .delete_competition_history_data(&competition_id, yes, &cancel)
                .await?;
            print_json(&report)?;
        }
        Commands::StorageStats { advice } => {
            if advice {
                print_json(&pipeline.backup_info().await?)?;
            } else {
                print_json(&pipeline.get_storage_stats().await?)?;
            }
        }
        Commands::Migrate => {}
    }

    Ok(())
}

fn init_tracing(config: &PipelineConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init(),
        LogFormat::Console => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init(),
    }
}

async fn run_scheduler(pipeline: &StatsPipeline, config: &PipelineConfig) -> Result<()> {
    let Some(mut sched) = pipeline.maybe_build_scheduler(config).await? else {
        return Ok(());
    };
    sched.start().await.context("starting scheduler")?;
    info!("scheduler running; waiting for shutdown signal");
    shutdown_signal().await;
    info!("shutdown signal received; stopping scheduler");
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Ctrl-C stops a retention scan after the current record; committed deletes stay.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling");
            trigger.cancel();
        }
    });
    token
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cleanup_flags_are_exclusive() {
        let parsed = Cli::try_parse_from(["vtrend-cli", "cleanup", "--days", "7"]).unwrap();
        assert!(matches!(
            parsed.command,
            Commands::Cleanup { days: Some(7), before: None }
        ));
        assert!(
            Cli::try_parse_from(["vtrend-cli", "cleanup", "--days", "7", "--before", "2024-08-01"])
                .is_err()
        );
    }

    #[test]
    fn purge_defaults_to_unconfirmed() {
        let parsed = Cli::try_parse_from(["vtrend-cli", "purge", "c1"]).unwrap();
        assert!(matches!(parsed.command, Commands::Purge { yes: false, .. }));
    }
}
