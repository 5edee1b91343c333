//! Hourly competition snapshots, daily system rollups and snapshot retention,
//! driven by cron jobs or manual triggers through [`StatsPipeline`].

pub mod bootstrap;
pub mod config;
pub mod context;
pub mod error;
pub mod inventory;
pub mod retention;
pub mod scheduler;
pub mod snapshot;
pub mod system;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use vtrend_core::{DailySystemStats, HourlySnapshot, Platform};

pub use bootstrap::{build_pipeline, build_pipeline_from_env};
pub use config::{LogFormat, PipelineConfig, StorageBackend};
pub use context::{Clock, FixedClock, PipelineContext, SystemClock};
pub use error::{ErrorKind, PipelineError, PipelineResult};
pub use inventory::{BackupAdvice, CollectionCounts, StorageStats};
pub use retention::{DeletionReport, RetentionManager, MAX_RANGE_DAYS};
pub use snapshot::{FleetSummary, SnapshotEngine, StatsUpdate};
pub use system::SystemAggregator;

pub const CRATE_NAME: &str = "vtrend-sync";

/// One lock per job. Scheduled firings skip while the lock is held; manual
/// triggers wait for it.
#[derive(Debug, Clone, Default)]
pub(crate) struct JobGuards {
    pub(crate) hourly: Arc<Mutex<()>>,
    pub(crate) daily: Arc<Mutex<()>>,
    pub(crate) retention: Arc<Mutex<()>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub providers: Vec<Platform>,
    pub checked_at: DateTime<Utc>,
}

/// The operations an owning service layer calls. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StatsPipeline {
    ctx: Arc<PipelineContext>,
    snapshots: SnapshotEngine,
    system: SystemAggregator,
    retention: RetentionManager,
    guards: JobGuards,
}

impl StatsPipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        let ctx = Arc::new(ctx);
        Self {
            snapshots: SnapshotEngine::new(ctx.clone()),
            system: SystemAggregator::new(ctx.clone()),
            retention: RetentionManager::new(ctx.clone()),
            ctx,
            guards: JobGuards::default(),
        }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub async fn update_all_active_competitions(&self) -> PipelineResult<FleetSummary> {
        let _running = self.guards.hourly.lock().await;
        self.snapshots.update_all_active().await
    }

    pub async fn update_competition_stats(&self, competition_id: &str) -> PipelineResult<StatsUpdate> {
        self.snapshots.update_competition_stats(competition_id).await
    }

    pub async fn save_competition_hourly_snapshot(
        &self,
        competition_id: &str,
    ) -> PipelineResult<HourlySnapshot> {
        self.snapshots.save_hourly_snapshot(competition_id).await
    }

    /// Snapshots every active competition from stored counts.
    pub async fn save_all_hourly_snapshots(&self) -> PipelineResult<FleetSummary> {
        let _running = self.guards.hourly.lock().await;
        self.snapshots.snapshot_all_active().await
    }

    pub async fn save_daily_aggregation(&self) -> PipelineResult<DailySystemStats> {
        let _running = self.guards.daily.lock().await;
        self.system.save_daily_aggregation().await
    }

    pub async fn cleanup_old_snapshots(
        &self,
        cutoff: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> PipelineResult<DeletionReport> {
        let _running = self.guards.retention.lock().await;
        self.retention.cleanup_old_snapshots(cutoff, cancel).await
    }

    /// Cutoff cleanup with `now - days` as the cutoff.
    pub async fn cleanup_snapshots_older_than(
        &self,
        days: i64,
        cancel: &CancellationToken,
    ) -> PipelineResult<DeletionReport> {
        let cutoff = retention::cleanup_cutoff(days, self.ctx.now())?;
        self.cleanup_old_snapshots(cutoff, cancel).await
    }

    pub async fn delete_data_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> PipelineResult<DeletionReport> {
        let _running = self.guards.retention.lock().await;
        self.retention.delete_by_date_range(start, end, cancel).await
    }

    /// Range deletion from `YYYY-MM-DD` strings, read in the bucket offset.
    pub async fn delete_data_by_dates(
        &self,
        start_date: &str,
        end_date: &str,
        cancel: &CancellationToken,
    ) -> PipelineResult<DeletionReport> {
        let start = retention::parse_date(start_date, self.ctx.bucket_offset)?;
        let end = retention::parse_date(end_date, self.ctx.bucket_offset)?;
        self.delete_data_by_date_range(start, end, cancel).await
    }

    pub async fn delete_competition_history_data(
        &self,
        competition_id: &str,
        confirmed: bool,
        cancel: &CancellationToken,
    ) -> PipelineResult<DeletionReport> {
        let _running = self.guards.retention.lock().await;
        self.retention
            .delete_competition_history(competition_id, confirmed, cancel)
            .await
    }

    pub async fn get_storage_stats(&self) -> PipelineResult<StorageStats> {
        inventory::storage_stats(&self.ctx).await
    }

    pub async fn backup_info(&self) -> PipelineResult<BackupAdvice> {
        let stats = self.get_storage_stats().await?;
        Ok(inventory::backup_advice(&stats, self.ctx.now()))
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "healthy",
            providers: self.ctx.metrics.registry().platforms(),
            checked_at: self.ctx.now(),
        }
    }
}
