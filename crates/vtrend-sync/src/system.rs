use std::sync::Arc;

use tracing::{info, warn};
use vtrend_core::{date_key, daily_stats_path, DailySystemStats, UserRole};
use vtrend_storage::StorageError;

use crate::context::PipelineContext;
use crate::error::PipelineResult;

/// Full-scan daily rollup across competitions and users.
#[derive(Debug, Clone)]
pub struct SystemAggregator {
    ctx: Arc<PipelineContext>,
}

impl SystemAggregator {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Scans every competition and user and upserts today's `systemStats` record.
    ///
    /// Every stored document is counted. A field that fails to decode is
    /// logged and contributes nothing; the rest of its document still counts.
    pub async fn save_daily_aggregation(&self) -> PipelineResult<DailySystemStats> {
        let now = self.ctx.now();
        let date = date_key(now, self.ctx.bucket_offset);

        let mut total_competitions = 0u64;
        let mut active_competitions = 0u64;
        let mut total_prize_amount = 0f64;
        let mut total_views = 0u64;
        let mut cursor = self.ctx.store.scan_competition_tallies();
        while let Some(tally) = cursor.next().await? {
            for issue in &tally.issues {
                warn!(id = %tally.id, error = %issue, "competition field ignored in daily rollup");
            }
            total_competitions += 1;
            if tally.is_active() {
                active_competitions += 1;
            }
            total_prize_amount += tally.prize_pool;
            total_views = total_views.saturating_add(tally.total_views);
        }

        let mut total_users = 0u64;
        let mut total_brands = 0u64;
        let mut total_creators = 0u64;
        let mut users = self.ctx.store.scan_users();
        loop {
            let user = match users.next().await {
                Ok(Some(user)) => user,
                Ok(None) => break,
                Err(StorageError::Decode(err)) => {
                    warn!(id = %err.id, error = %err, "user counted without a role");
                    total_users += 1;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            total_users += 1;
            match user.role {
                Some(UserRole::Brand) => total_brands += 1,
                Some(UserRole::Creator) => total_creators += 1,
                _ => {}
            }
        }

        let stats = DailySystemStats {
            date,
            total_competitions,
            active_competitions,
            total_users,
            total_brands,
            total_creators,
            total_prize_amount,
            total_views,
            updated_at: now,
        };
        self.ctx.store.upsert_daily_stats(&stats).await?;
        info!(
            path = %daily_stats_path(&stats.date),
            total_competitions,
            active_competitions,
            total_users,
            total_views,
            "daily aggregation saved"
        );
        Ok(stats)
    }
}
