//! Storage statistics and the backup/cleanup advice derived from them.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use vtrend_storage::{BoxCursor, CompetitionFilter, StorageError};

use crate::context::PipelineContext;
use crate::error::PipelineResult;

pub const SNAPSHOT_VOLUME_THRESHOLD: u64 = 10_000;
pub const STALE_SNAPSHOT_DAYS: i64 = 90;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionCounts {
    pub competitions: u64,
    pub users: u64,
    /// Competitions with at least one stored snapshot.
    pub hourly_stats: u64,
    pub daily_stats: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub collections: CollectionCounts,
    pub total_snapshots: u64,
    pub oldest_snapshot: Option<DateTime<Utc>>,
    pub newest_snapshot: Option<DateTime<Utc>>,
    pub calculated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupAdvice {
    pub total_snapshots: u64,
    pub oldest_snapshot: Option<DateTime<Utc>>,
    pub newest_snapshot: Option<DateTime<Utc>>,
    pub collections: CollectionCounts,
    pub recommended_actions: Vec<String>,
}

/// Counts documents, including ones that fail to decode.
async fn count_documents<T: Send + 'static>(mut cursor: BoxCursor<T>) -> Result<u64, StorageError> {
    let mut total = 0u64;
    loop {
        match cursor.next().await {
            Ok(Some(_)) | Err(StorageError::Decode(_)) => total += 1,
            Ok(None) => return Ok(total),
            Err(err) => return Err(err),
        }
    }
}

pub async fn storage_stats(ctx: &PipelineContext) -> PipelineResult<StorageStats> {
    let competitions = count_documents(ctx.store.scan_competitions(CompetitionFilter::All)).await?;
    let users = count_documents(ctx.store.scan_users()).await?;
    let daily_stats = ctx.store.count_daily_stats().await?;

    let mut with_history = BTreeSet::new();
    let mut total_snapshots = 0u64;
    let mut oldest: Option<DateTime<Utc>> = None;
    let mut newest: Option<DateTime<Utc>> = None;
    let mut index = ctx.store.scan_snapshot_index(None);
    loop {
        let entry = match index.next().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(StorageError::Decode(_)) => {
                total_snapshots += 1;
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        total_snapshots += 1;
        if let Some(at) = entry.captured_at(ctx.bucket_offset) {
            oldest = Some(oldest.map_or(at, |o| o.min(at)));
            newest = Some(newest.map_or(at, |n| n.max(at)));
        }
        with_history.insert(entry.competition_id);
    }

    Ok(StorageStats {
        collections: CollectionCounts {
            competitions,
            users,
            hourly_stats: with_history.len() as u64,
            daily_stats,
        },
        total_snapshots,
        oldest_snapshot: oldest,
        newest_snapshot: newest,
        calculated_at: ctx.now(),
    })
}

pub fn backup_advice(stats: &StorageStats, now: DateTime<Utc>) -> BackupAdvice {
    let mut recommended_actions = Vec::new();
    if stats.total_snapshots > SNAPSHOT_VOLUME_THRESHOLD {
        recommended_actions.push(
            "Hourly snapshot volume is high; consider cleaning up data older than 30 days."
                .to_string(),
        );
    }
    if let Some(oldest) = stats.oldest_snapshot {
        if now - oldest > Duration::days(STALE_SNAPSHOT_DAYS) {
            recommended_actions.push(
                "Snapshots older than 90 days are present; consider cleaning them up.".to_string(),
            );
        }
    }
    BackupAdvice {
        total_snapshots: stats.total_snapshots,
        oldest_snapshot: stats.oldest_snapshot,
        newest_snapshot: stats.newest_snapshot,
        collections: stats.collections.clone(),
        recommended_actions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stats(total: u64, oldest: Option<DateTime<Utc>>) -> StorageStats {
        StorageStats {
            collections: CollectionCounts::default(),
            total_snapshots: total,
            oldest_snapshot: oldest,
            newest_snapshot: oldest,
            calculated_at: Utc.with_ymd_and_hms(2024, 8, 18, 0, 0, 0).single().unwrap(),
        }
    }

    #[test]
    fn quiet_store_gets_no_advice() {
        let now = Utc.with_ymd_and_hms(2024, 8, 18, 0, 0, 0).single().unwrap();
        let advice = backup_advice(&stats(10_000, Some(now - Duration::days(90))), now);
        assert!(advice.recommended_actions.is_empty());
    }

    #[test]
    fn volume_and_age_each_add_a_recommendation() {
        let now = Utc.with_ymd_and_hms(2024, 8, 18, 0, 0, 0).single().unwrap();
        let advice = backup_advice(&stats(10_001, Some(now - Duration::days(91))), now);
        assert_eq!(advice.recommended_actions.len(), 2);

        let advice = backup_advice(&stats(12, Some(now - Duration::days(120))), now);
        assert_eq!(advice.recommended_actions.len(), 1);
        assert!(advice.recommended_actions[0].contains("90 days"));
    }
}
