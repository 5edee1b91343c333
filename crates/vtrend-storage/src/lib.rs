//! Store contracts, document backends and rate-limited HTTP fetch utilities.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use vtrend_core::{
    snapshot_path, Competition, CompetitionStats, CompetitionTally, DailySystemStats, HourBucket,
    HourlySnapshot, Submission, UserRecord, ViewCountUpdate,
};

pub mod cursor;
mod error;
pub mod http;
pub mod memory;
pub mod postgres;

pub use cursor::{BoxCursor, PageEntry, PageKey, PageSource, PagedCursor, RecordCursor};
pub use error::StorageError;
pub use http::{
    FetchError, FetchedResponse, HttpClientConfig, HttpFetcher, RequestQuota, RetryPolicy,
    Transience,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "vtrend-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompetitionFilter {
    All,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotKey {
    pub competition_id: String,
    pub hour_key: String,
}

impl SnapshotKey {
    pub fn path(&self) -> String {
        snapshot_path(&self.competition_id, &self.hour_key)
    }
}

/// Lightweight projection of a stored snapshot used by retention scans.
///
/// `timestamp` is `None` when the document body has no readable timestamp;
/// the entry is still listed so it can be aged by its hour key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotIndexEntry {
    pub competition_id: String,
    pub hour_key: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl SnapshotIndexEntry {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey {
            competition_id: self.competition_id.clone(),
            hour_key: self.hour_key.clone(),
        }
    }

    /// Start of the hour named by the key, falling back to the stored
    /// timestamp when the key is not a `YYYY-MM-DD-HH` bucket.
    pub fn captured_at(&self, offset: FixedOffset) -> Option<DateTime<Utc>> {
        HourBucket::from_key(&self.hour_key, offset)
            .map(|bucket| bucket.start())
            .or(self.timestamp)
    }
}

#[async_trait]
pub trait CompetitionStore: Send + Sync {
    fn scan_competitions(&self, filter: CompetitionFilter) -> BoxCursor<Competition>;

    /// Every competition document, decoded leniently for rollups.
    fn scan_competition_tallies(&self) -> BoxCursor<CompetitionTally>;

    async fn get_competition(&self, id: &str) -> Result<Competition, StorageError>;

    /// Writes `stats` plus the denormalized `participantCount`/`totalViews`.
    async fn save_competition_stats(
        &self,
        id: &str,
        stats: &CompetitionStats,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn list_submissions(&self, competition_id: &str) -> Result<Vec<Submission>, StorageError>;

    /// Applies one batch of view-count writes; returns the number of documents touched.
    async fn apply_view_counts(
        &self,
        competition_id: &str,
        updates: &[ViewCountUpdate],
    ) -> Result<u64, StorageError>;
}

pub trait UserStore: Send + Sync {
    fn scan_users(&self) -> BoxCursor<UserRecord>;
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get_snapshot(
        &self,
        competition_id: &str,
        hour_key: &str,
    ) -> Result<Option<HourlySnapshot>, StorageError>;

    /// Last-write-wins upsert keyed by (competition, hour key).
    async fn upsert_snapshot(&self, snapshot: &HourlySnapshot) -> Result<(), StorageError>;

    fn scan_snapshot_index(&self, competition_id: Option<&str>) -> BoxCursor<SnapshotIndexEntry>;

    async fn delete_snapshots(&self, keys: &[SnapshotKey]) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait DailyStatsStore: Send + Sync {
    async fn upsert_daily_stats(&self, stats: &DailySystemStats) -> Result<(), StorageError>;

    async fn get_daily_stats(&self, date_key: &str)
        -> Result<Option<DailySystemStats>, StorageError>;

    async fn count_daily_stats(&self) -> Result<u64, StorageError>;
}

/// Everything the pipeline needs from one storage backend.
pub trait StatsBackend:
    CompetitionStore + SubmissionStore + UserStore + SnapshotStore + DailyStatsStore
{
}

impl<T> StatsBackend for T where
    T: CompetitionStore + SubmissionStore + UserStore + SnapshotStore + DailyStatsStore
{
}
