//! Cron wiring. Jobs only trigger; a firing that finds the previous run of
//! the same job still holding its guard is skipped.

use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::StatsPipeline;

/// Outcome of one scheduled firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Firing {
    Completed,
    Failed,
    Skipped,
}

impl StatsPipeline {
    /// Builds (but does not start) the job scheduler, or `None` when disabled.
    /// Cron expressions have a seconds field and are evaluated on the wall
    /// clock of the bucket offset, so `0 0 0 * * *` fires at local midnight.
    pub async fn maybe_build_scheduler(
        &self,
        config: &PipelineConfig,
    ) -> PipelineResult<Option<JobScheduler>> {
        if !config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new()
            .await
            .map_err(|e| PipelineError::initialization(format!("creating scheduler: {e}")))?;

        let offset = self.ctx.bucket_offset;
        let pipeline = self.clone();
        let hourly = Job::new_async_tz(config.hourly_cron.as_str(), offset, move |_uuid, _l| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                pipeline.run_scheduled_hourly().await;
            })
        })
        .map_err(|e| invalid_cron("hourly", &config.hourly_cron, e))?;
        add_job(&sched, hourly).await?;

        let pipeline = self.clone();
        let daily = Job::new_async_tz(config.daily_cron.as_str(), offset, move |_uuid, _l| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                pipeline.run_scheduled_daily().await;
            })
        })
        .map_err(|e| invalid_cron("daily", &config.daily_cron, e))?;
        add_job(&sched, daily).await?;

        if let Some(cron) = &config.cleanup_cron {
            let pipeline = self.clone();
            let days = i64::from(config.retention_days);
            let cleanup = Job::new_async_tz(cron.as_str(), offset, move |_uuid, _l| {
                let pipeline = pipeline.clone();
                Box::pin(async move {
                    pipeline.run_scheduled_cleanup(days).await;
                })
            })
            .map_err(|e| invalid_cron("cleanup", cron, e))?;
            add_job(&sched, cleanup).await?;
        }

        info!(
            hourly = %config.hourly_cron,
            daily = %config.daily_cron,
            cleanup = config.cleanup_cron.as_deref().unwrap_or("off"),
            %offset,
            "scheduler jobs registered"
        );
        Ok(Some(sched))
    }

    pub async fn run_scheduled_hourly(&self) -> Firing {
        let Ok(_running) = self.guards.hourly.try_lock() else {
            warn!(job = "hourly", "previous run still in progress; skipping");
            return Firing::Skipped;
        };
        match self.snapshots.update_all_active().await {
            Ok(summary) => {
                info!(
                    job = "hourly",
                    run_id = %summary.run_id,
                    success_count = summary.success_count,
                    total_count = summary.total_count,
                    "scheduled fleet run finished"
                );
                Firing::Completed
            }
            Err(err) => {
                error!(job = "hourly", kind = %err.kind(), error = %err, "scheduled fleet run failed");
                Firing::Failed
            }
        }
    }

    pub async fn run_scheduled_daily(&self) -> Firing {
        let Ok(_running) = self.guards.daily.try_lock() else {
            warn!(job = "daily", "previous run still in progress; skipping");
            return Firing::Skipped;
        };
        match self.system.save_daily_aggregation().await {
            Ok(stats) => {
                info!(job = "daily", date = %stats.date, "scheduled daily aggregation finished");
                Firing::Completed
            }
            Err(err) => {
                error!(job = "daily", kind = %err.kind(), error = %err, "scheduled daily aggregation failed");
                Firing::Failed
            }
        }
    }

    pub async fn run_scheduled_cleanup(&self, days: i64) -> Firing {
        let Ok(_running) = self.guards.retention.try_lock() else {
            warn!(job = "cleanup", "retention work already in progress; skipping");
            return Firing::Skipped;
        };
        let result = match crate::retention::cleanup_cutoff(days, self.ctx.now()) {
            Ok(cutoff) => {
                self.retention
                    .cleanup_old_snapshots(cutoff, &CancellationToken::new())
                    .await
            }
            Err(err) => Err(err),
        };
        match result {
            Ok(report) => {
                info!(job = "cleanup", days, deleted = report.deleted, "scheduled cleanup finished");
                Firing::Completed
            }
            Err(err) => {
                error!(job = "cleanup", kind = %err.kind(), error = %err, "scheduled cleanup failed");
                Firing::Failed
            }
        }
    }
}

fn invalid_cron(job: &str, cron: &str, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::initialization(format!("invalid {job} cron `{cron}`: {err}"))
}

async fn add_job(sched: &JobScheduler, job: Job) -> PipelineResult<()> {
    sched
        .add(job)
        .await
        .map(|_| ())
        .map_err(|e| PipelineError::initialization(format!("adding scheduler job: {e}")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::PipelineContext;
    use chrono::FixedOffset;
    use vtrend_adapters::{MetricsSourceAdapter, ProviderRegistry};
    use vtrend_storage::MemoryStore;

    fn pipeline() -> StatsPipeline {
        let ctx = PipelineContext::new(
            Arc::new(MemoryStore::new()),
            MetricsSourceAdapter::new(ProviderRegistry::new()),
        );
        StatsPipeline::new(ctx)
    }

    fn enabled() -> PipelineConfig {
        PipelineConfig {
            scheduler_enabled: true,
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn disabled_scheduler_builds_nothing() {
        let sched = pipeline()
            .maybe_build_scheduler(&PipelineConfig::default())
            .await
            .unwrap();
        assert!(sched.is_none());
    }

    #[tokio::test]
    async fn default_crons_register() {
        let config = PipelineConfig {
            cleanup_cron: Some("0 30 3 * * *".to_string()),
            ..enabled()
        };
        let sched = pipeline().maybe_build_scheduler(&config).await.unwrap();
        assert!(sched.is_some());
    }

    #[tokio::test]
    async fn jobs_register_on_a_local_offset() {
        let ctx = PipelineContext::new(
            Arc::new(MemoryStore::new()),
            MetricsSourceAdapter::new(ProviderRegistry::new()),
        )
        .with_bucket_offset(FixedOffset::east_opt(9 * 3600).unwrap());
        let pipeline = StatsPipeline::new(ctx);
        assert_eq!(pipeline.ctx.bucket_offset.local_minus_utc(), 9 * 3600);

        let config = PipelineConfig {
            daily_cron: "0 0 0 * * *".to_string(),
            cleanup_cron: Some("0 30 3 * * *".to_string()),
            ..enabled()
        };
        let sched = pipeline.maybe_build_scheduler(&config).await.unwrap();
        assert!(sched.is_some());
    }

    #[tokio::test]
    async fn invalid_cron_is_an_initialization_error() {
        let config = PipelineConfig {
            hourly_cron: "every hour please".to_string(),
            ..enabled()
        };
        let Err(err) = pipeline().maybe_build_scheduler(&config).await else {
            panic!("invalid cron accepted");
        };
        assert!(matches!(err, PipelineError::Initialization(_)));
        assert!(err.to_string().contains("hourly"));
    }

    #[tokio::test]
    async fn overlapping_firing_of_the_same_job_is_skipped() {
        let pipeline = pipeline();
        let held = pipeline.guards.hourly.clone().lock_owned().await;
        assert_eq!(pipeline.run_scheduled_hourly().await, Firing::Skipped);
        assert_eq!(pipeline.run_scheduled_daily().await, Firing::Completed);
        drop(held);
        assert_eq!(pipeline.run_scheduled_hourly().await, Firing::Completed);
    }

    #[tokio::test]
    async fn scheduled_cleanup_runs_against_an_empty_store() {
        assert_eq!(pipeline().run_scheduled_cleanup(30).await, Firing::Completed);
        assert_eq!(pipeline().run_scheduled_cleanup(0).await, Firing::Failed);
    }
}
