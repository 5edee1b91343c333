//! Snapshot retention: cutoff cleanup, bounded date-range deletion and the
//! confirmed per-competition purge. Only snapshot history is touched.
//!
//! A snapshot is aged by the hour named in its key; the stored timestamp is
//! only consulted for keys that do not parse. Snapshots with neither are kept.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vtrend_core::DATE_KEY_FORMAT;
use vtrend_storage::{SnapshotKey, StorageError};

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};

pub const MAX_RANGE_DAYS: i64 = 90;
pub const DEFAULT_RETENTION_DAYS: i64 = 30;
pub const DELETE_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionReport {
    pub deleted: u64,
    pub scanned: u64,
    /// Set when the scan stopped early on cancellation; `deleted` is what was committed.
    pub cancelled: bool,
}

/// Parses `YYYY-MM-DD` as midnight in `offset`.
pub fn parse_date(raw: &str, offset: FixedOffset) -> PipelineResult<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw.trim(), DATE_KEY_FORMAT).map_err(|_| {
        PipelineError::validation(format!("invalid date `{raw}`, expected YYYY-MM-DD"))
    })?;
    date.and_hms_opt(0, 0, 0)
        .and_then(|midnight| offset.from_local_datetime(&midnight).single())
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| PipelineError::validation(format!("date `{raw}` is out of range")))
}

/// `now - days`, for `days >= 1`.
pub fn cleanup_cutoff(days: i64, now: DateTime<Utc>) -> PipelineResult<DateTime<Utc>> {
    if days < 1 {
        return Err(PipelineError::validation(format!(
            "days must be at least 1, got {days}"
        )));
    }
    Duration::try_days(days)
        .and_then(|span| now.checked_sub_signed(span))
        .ok_or_else(|| PipelineError::validation(format!("days value {days} is out of range")))
}

#[derive(Debug, Clone)]
pub struct RetentionManager {
    ctx: Arc<PipelineContext>,
}

impl RetentionManager {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Deletes every snapshot with `timestamp < cutoff` across all competitions.
    pub async fn cleanup_old_snapshots(
        &self,
        cutoff: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> PipelineResult<DeletionReport> {
        let now = self.ctx.now();
        if cutoff > now {
            return Err(PipelineError::validation(format!(
                "cutoff {cutoff} is in the future"
            )));
        }
        let report = self
            .delete_matching(None, |at| at.is_some_and(|at| at < cutoff), cancel)
            .await?;
        info!(%cutoff, deleted = report.deleted, cancelled = report.cancelled, "old snapshots cleaned up");
        Ok(report)
    }

    /// Deletes snapshots with `start < timestamp < end`; the span may not exceed 90 days.
    pub async fn delete_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> PipelineResult<DeletionReport> {
        if end < start {
            return Err(PipelineError::validation(
                "end date must not be before start date",
            ));
        }
        if end - start > Duration::days(MAX_RANGE_DAYS) {
            return Err(PipelineError::validation(format!(
                "date range may span at most {MAX_RANGE_DAYS} days"
            )));
        }
        let report = self
            .delete_matching(
                None,
                |at| at.is_some_and(|at| at > start && at < end),
                cancel,
            )
            .await?;
        info!(%start, %end, deleted = report.deleted, cancelled = report.cancelled, "snapshot range deleted");
        Ok(report)
    }

    pub async fn delete_competition_history(
        &self,
        competition_id: &str,
        confirmed: bool,
        cancel: &CancellationToken,
    ) -> PipelineResult<DeletionReport> {
        if !confirmed {
            return Err(PipelineError::validation(
                "deleting competition history requires explicit confirmation",
            ));
        }
        if competition_id.trim().is_empty() {
            return Err(PipelineError::validation("competition id is required"));
        }
        let report = self
            .delete_matching(Some(competition_id), |_| true, cancel)
            .await?;
        warn!(competition_id, deleted = report.deleted, cancelled = report.cancelled, "competition snapshot history purged");
        Ok(report)
    }

    async fn delete_matching(
        &self,
        competition_id: Option<&str>,
        matches: impl Fn(Option<DateTime<Utc>>) -> bool,
        cancel: &CancellationToken,
    ) -> PipelineResult<DeletionReport> {
        let mut report = DeletionReport::default();
        let mut cursor = self.ctx.store.scan_snapshot_index(competition_id);
        let mut pending: Vec<SnapshotKey> = Vec::with_capacity(DELETE_BATCH_SIZE);

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match cursor.next().await {
                Ok(Some(entry)) => {
                    report.scanned += 1;
                    let captured_at = entry.captured_at(self.ctx.bucket_offset);
                    if captured_at.is_none() && competition_id.is_none() {
                        warn!(path = %entry.key().path(), "snapshot has no usable hour key or timestamp");
                    }
                    if matches(captured_at) {
                        pending.push(entry.key());
                    }
                }
                Ok(None) => break,
                Err(StorageError::Decode(err)) => {
                    warn!(id = %err.id, error = %err, "skipping undecodable snapshot");
                    continue;
                }
                Err(err) => {
                    warn!(deleted = report.deleted, "retention scan aborted");
                    return Err(err.into());
                }
            }

            if pending.len() >= DELETE_BATCH_SIZE {
                report.deleted += self.flush(&mut pending, report.deleted).await?;
            }
        }

        if !report.cancelled && !pending.is_empty() {
            report.deleted += self.flush(&mut pending, report.deleted).await?;
        }
        Ok(report)
    }

    async fn flush(&self, pending: &mut Vec<SnapshotKey>, deleted_so_far: u64) -> PipelineResult<u64> {
        match self.ctx.store.delete_snapshots(pending.as_slice()).await {
            Ok(n) => {
                pending.clear();
                Ok(n)
            }
            Err(err) => {
                warn!(deleted = deleted_so_far, "snapshot delete batch failed");
                Err(err.into())
            }
        }
    }
}
