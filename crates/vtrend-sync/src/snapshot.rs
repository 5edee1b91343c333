//! Snapshot engine: reconcile view counts, aggregate, rank, diff against the
//! previous hour and upsert the hourly snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;
use vtrend_adapters::MAX_PROVIDER_BATCH;
use vtrend_core::{
    aggregate_submissions, rank_submissions, top_submissions, CompetitionStats, HourBucket,
    HourlyGrowth, HourlySnapshot, Platform, Submission, ViewCountUpdate, MAX_TOP_SUBMISSIONS,
};
use vtrend_storage::{CompetitionFilter, StorageError};

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsUpdate {
    pub competition_id: String,
    pub stats: CompetitionStats,
    pub reconciled_submissions: usize,
    pub failed_batches: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSummary {
    pub run_id: Uuid,
    pub success_count: usize,
    pub total_count: usize,
    pub failed_competitions: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
enum FleetMode {
    Full,
    SnapshotOnly,
}

#[derive(Debug, Default)]
struct Reconciliation {
    reconciled: usize,
    failed_batches: usize,
}

#[derive(Debug, Clone)]
pub struct SnapshotEngine {
    ctx: Arc<PipelineContext>,
}

impl SnapshotEngine {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Reconciles provider view counts and rewrites the competition's `stats`.
    pub async fn update_competition_stats(&self, competition_id: &str) -> PipelineResult<StatsUpdate> {
        let now = self.ctx.now();
        let (update, _) = self.refresh_stats(competition_id, now).await?;
        Ok(update)
    }

    /// Snapshots the currently stored submission set without calling providers.
    pub async fn save_hourly_snapshot(&self, competition_id: &str) -> PipelineResult<HourlySnapshot> {
        let now = self.ctx.now();
        self.snapshot_stored_at(competition_id, now).await
    }

    async fn snapshot_stored_at(
        &self,
        competition_id: &str,
        now: DateTime<Utc>,
    ) -> PipelineResult<HourlySnapshot> {
        self.ctx.store.get_competition(competition_id).await?;
        let submissions = self.ctx.store.list_submissions(competition_id).await?;
        self.write_snapshot(competition_id, &submissions, now).await
    }

    /// Full per-competition sequence: reconcile, aggregate, snapshot.
    pub async fn run_competition(&self, competition_id: &str) -> PipelineResult<HourlySnapshot> {
        let now = self.ctx.now();
        self.run_competition_at(competition_id, now).await
    }

    async fn run_competition_at(
        &self,
        competition_id: &str,
        now: DateTime<Utc>,
    ) -> PipelineResult<HourlySnapshot> {
        let (_, submissions) = self.refresh_stats(competition_id, now).await?;
        self.write_snapshot(competition_id, &submissions, now).await
    }

    /// Runs every active competition with bounded parallelism. Only a failure
    /// to list competitions is returned as an error.
    pub async fn update_all_active(&self) -> PipelineResult<FleetSummary> {
        self.run_fleet(FleetMode::Full).await
    }

    /// Snapshots every active competition from stored counts, without provider calls.
    pub async fn snapshot_all_active(&self) -> PipelineResult<FleetSummary> {
        self.run_fleet(FleetMode::SnapshotOnly).await
    }

    async fn run_fleet(&self, mode: FleetMode) -> PipelineResult<FleetSummary> {
        let run_id = Uuid::new_v4();
        let started_at = self.ctx.now();
        let mut failed_competitions = Vec::new();

        let mut cursor = self.ctx.store.scan_competitions(CompetitionFilter::Active);
        let mut ids = Vec::new();
        loop {
            match cursor.next().await {
                Ok(Some(competition)) => ids.push(competition.id),
                Ok(None) => break,
                Err(StorageError::Decode(err)) => {
                    warn!(%run_id, competition_id = %err.id, error = %err, "skipping undecodable competition");
                    failed_competitions.push(err.id);
                }
                Err(err) => return Err(PipelineError::Storage(err)),
            }
        }

        let total_count = ids.len() + failed_competitions.len();
        info!(%run_id, ?mode, total_count, concurrency = self.ctx.fleet_concurrency, "fleet run started");

        let results: Vec<(String, PipelineResult<HourlySnapshot>)> =
            stream::iter(ids.into_iter().map(|competition_id| {
                let engine = self.clone();
                let span = info_span!("competition_run", %run_id, competition_id = %competition_id);
                async move {
                    let result = async {
                        match mode {
                            FleetMode::Full => {
                                engine.run_competition_at(&competition_id, started_at).await
                            }
                            FleetMode::SnapshotOnly => {
                                engine.snapshot_stored_at(&competition_id, started_at).await
                            }
                        }
                    }
                    .instrument(span)
                    .await;
                    (competition_id, result)
                }
            }))
            .buffer_unordered(self.ctx.fleet_concurrency.max(1))
            .collect()
            .await;

        let mut success_count = 0;
        for (competition_id, result) in results {
            match result {
                Ok(_) => success_count += 1,
                Err(err) => {
                    error!(%run_id, competition_id = %competition_id, kind = %err.kind(), error = %err, "competition update failed");
                    failed_competitions.push(competition_id);
                }
            }
        }
        failed_competitions.sort();

        let finished_at = self.ctx.now();
        info!(%run_id, success_count, total_count, "fleet run finished");
        Ok(FleetSummary {
            run_id,
            success_count,
            total_count,
            failed_competitions,
            started_at,
            finished_at,
        })
    }

    async fn refresh_stats(
        &self,
        competition_id: &str,
        now: DateTime<Utc>,
    ) -> PipelineResult<(StatsUpdate, Vec<Submission>)> {
        self.ctx.store.get_competition(competition_id).await?;
        let mut submissions = self.ctx.store.list_submissions(competition_id).await?;
        let reconciliation = self
            .reconcile(competition_id, &mut submissions, now)
            .await;

        let stats = aggregate_submissions(&submissions, now);
        self.ctx
            .store
            .save_competition_stats(competition_id, &stats)
            .await?;
        info!(
            competition_id,
            total_submissions = stats.total_submissions,
            total_views = stats.total_views,
            unique_creators = stats.unique_creators,
            "competition stats updated"
        );

        Ok((
            StatsUpdate {
                competition_id: competition_id.to_string(),
                stats,
                reconciled_submissions: reconciliation.reconciled,
                failed_batches: reconciliation.failed_batches,
            },
            submissions,
        ))
    }

    /// Provider and write-back failures here are logged; the caller continues
    /// with whatever counts are known.
    async fn reconcile(
        &self,
        competition_id: &str,
        submissions: &mut [Submission],
        now: DateTime<Utc>,
    ) -> Reconciliation {
        let mut wanted: BTreeMap<Platform, Vec<String>> = BTreeMap::new();
        for submission in submissions.iter() {
            if let Some(video_id) = &submission.external_video_id {
                if self.ctx.metrics.reconciles(submission.platform) {
                    wanted
                        .entry(submission.platform)
                        .or_default()
                        .push(video_id.clone());
                }
            }
        }

        let mut outcome = Reconciliation::default();
        let mut observed: HashMap<(Platform, String), u64> = HashMap::new();
        for (platform, video_ids) in wanted {
            match self.ctx.metrics.fetch_view_counts(platform, &video_ids).await {
                Ok(report) => {
                    outcome.failed_batches += report.failed_batches;
                    observed.extend(
                        report
                            .counts
                            .into_iter()
                            .map(|(video_id, views)| ((platform, video_id), views)),
                    );
                }
                Err(err) => {
                    warn!(competition_id, platform = %platform, error = %err, "view count lookup failed");
                }
            }
        }

        let mut updates = Vec::new();
        for submission in submissions.iter_mut() {
            let Some(video_id) = submission.external_video_id.clone() else {
                continue;
            };
            let Some(&views) = observed.get(&(submission.platform, video_id)) else {
                continue;
            };
            if views < submission.current_view_count {
                debug!(
                    competition_id,
                    submission_id = %submission.id,
                    stored = submission.current_view_count,
                    observed = views,
                    "provider reported fewer views than stored"
                );
            }
            submission.current_view_count = views;
            submission.last_updated_at = Some(now);
            updates.push(ViewCountUpdate {
                submission_id: submission.id.clone(),
                platform: submission.platform,
                view_count: views,
                observed_at: now,
            });
        }
        outcome.reconciled = updates.len();

        for chunk in updates.chunks(MAX_PROVIDER_BATCH) {
            if let Err(err) = self.ctx.store.apply_view_counts(competition_id, chunk).await {
                warn!(
                    competition_id,
                    batch = chunk.len(),
                    error = %err,
                    "persisting reconciled view counts failed"
                );
            }
        }
        outcome
    }

    async fn write_snapshot(
        &self,
        competition_id: &str,
        submissions: &[Submission],
        now: DateTime<Utc>,
    ) -> PipelineResult<HourlySnapshot> {
        let bucket = HourBucket::containing(now, self.ctx.bucket_offset);
        let current = aggregate_submissions(submissions, now).baseline();
        let previous_key = bucket.previous().key();
        let previous = match self.ctx.store.get_snapshot(competition_id, &previous_key).await {
            Ok(found) => found.map(|snapshot| snapshot.baseline()).unwrap_or_default(),
            Err(StorageError::Decode(err)) => {
                warn!(competition_id, hour_key = %previous_key, error = %err, "previous snapshot unreadable, diffing against zero");
                Default::default()
            }
            Err(err) => return Err(err.into()),
        };

        let ranked = rank_submissions(submissions);
        let snapshot = HourlySnapshot {
            competition_id: competition_id.to_string(),
            hour_key: bucket.key(),
            timestamp: bucket.start(),
            total_views: current.total_views,
            total_submissions: current.total_submissions,
            unique_creators: current.unique_creators,
            top_submissions: top_submissions(&ranked, MAX_TOP_SUBMISSIONS),
            hourly_growth: HourlyGrowth::between(&current, &previous),
        };
        self.ctx.store.upsert_snapshot(&snapshot).await?;
        info!(
            competition_id,
            hour_key = %snapshot.hour_key,
            path = %snapshot.path(),
            views_gain = snapshot.hourly_growth.views_gain,
            "hourly snapshot saved"
        );
        Ok(snapshot)
    }
}
