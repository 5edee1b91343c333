//! In-process document backend. Holds raw JSON documents and decodes them on
//! read through the same typed decode step as the Postgres backend.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use vtrend_core::{
    Competition, CompetitionStats, CompetitionTally, DailySystemStats, DocumentReader,
    HourlySnapshot, Submission, UserRecord, ViewCountUpdate,
};

use crate::cursor::{BoxCursor, PageEntry, PageKey, PageSource, PagedCursor, DEFAULT_PAGE_SIZE};
use crate::{
    CompetitionFilter, CompetitionStore, DailyStatsStore, SnapshotIndexEntry, SnapshotKey,
    SnapshotStore, StorageError, SubmissionStore, UserStore,
};

#[derive(Debug, Default)]
struct MemoryState {
    competitions: BTreeMap<String, JsonValue>,
    submissions: BTreeMap<(String, String), JsonValue>,
    users: BTreeMap<String, JsonValue>,
    snapshots: BTreeMap<(String, String), JsonValue>,
    daily_stats: BTreeMap<String, JsonValue>,
    failing_competitions: HashSet<String>,
}

impl MemoryState {
    fn check_writable(&self, competition_id: &str) -> Result<(), StorageError> {
        if self.failing_competitions.contains(competition_id) {
            return Err(StorageError::Unavailable(format!(
                "writes rejected for competition {competition_id}"
            )));
        }
        Ok(())
    }
}

/// Cloning shares the underlying collections.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    page_size: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub async fn put_competition(&self, id: &str, doc: JsonValue) {
        self.state
            .write()
            .await
            .competitions
            .insert(id.to_string(), doc);
    }

    pub async fn put_submission(&self, competition_id: &str, id: &str, doc: JsonValue) {
        self.state
            .write()
            .await
            .submissions
            .insert((competition_id.to_string(), id.to_string()), doc);
    }

    pub async fn put_user(&self, id: &str, doc: JsonValue) {
        self.state.write().await.users.insert(id.to_string(), doc);
    }

    /// Stores a raw snapshot document, bypassing the typed upsert.
    pub async fn put_snapshot_document(&self, competition_id: &str, hour_key: &str, doc: JsonValue) {
        self.state
            .write()
            .await
            .snapshots
            .insert((competition_id.to_string(), hour_key.to_string()), doc);
    }

    pub async fn competition_document(&self, id: &str) -> Option<JsonValue> {
        self.state.read().await.competitions.get(id).cloned()
    }

    pub async fn submission_document(&self, competition_id: &str, id: &str) -> Option<JsonValue> {
        self.state
            .read()
            .await
            .submissions
            .get(&(competition_id.to_string(), id.to_string()))
            .cloned()
    }

    pub async fn snapshot_document(&self, competition_id: &str, hour_key: &str) -> Option<JsonValue> {
        self.state
            .read()
            .await
            .snapshots
            .get(&(competition_id.to_string(), hour_key.to_string()))
            .cloned()
    }

    pub async fn snapshot_count(&self) -> usize {
        self.state.read().await.snapshots.len()
    }

    /// Makes every write touching `competition_id` fail with `Unavailable`.
    pub async fn fail_writes_for(&self, competition_id: &str) {
        self.state
            .write()
            .await
            .failing_competitions
            .insert(competition_id.to_string());
    }

    pub async fn clear_write_failures(&self) {
        self.state.write().await.failing_competitions.clear();
    }

    fn page_size(&self) -> usize {
        if self.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.page_size
        }
    }
}

fn merge_patch(doc: &mut JsonValue, patch: &JsonValue) {
    if let (Some(target), Some(fields)) = (doc.as_object_mut(), patch.as_object()) {
        for (key, value) in fields {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Writes `youtubeData.statistics.viewCount`, creating either level when it
/// is missing or not an object.
fn mirror_statistics(doc: &mut JsonValue, view_count: u64) {
    let Some(root) = doc.as_object_mut() else {
        return;
    };
    let youtube = root
        .entry("youtubeData")
        .or_insert_with(|| JsonValue::Object(Default::default()));
    if !youtube.is_object() {
        *youtube = JsonValue::Object(Default::default());
    }
    let Some(youtube) = youtube.as_object_mut() else {
        return;
    };
    let stats = youtube
        .entry("statistics")
        .or_insert_with(|| JsonValue::Object(Default::default()));
    if !stats.is_object() {
        *stats = JsonValue::Object(Default::default());
    }
    if let Some(stats) = stats.as_object_mut() {
        stats.insert("viewCount".to_string(), JsonValue::from(view_count));
    }
}

struct CompetitionPages<T> {
    state: Arc<RwLock<MemoryState>>,
    filter: CompetitionFilter,
    decode: fn(&str, &JsonValue) -> Result<T, StorageError>,
}

fn decode_competition(id: &str, doc: &JsonValue) -> Result<Competition, StorageError> {
    Competition::from_document(id, doc).map_err(StorageError::from)
}

fn decode_tally(id: &str, doc: &JsonValue) -> Result<CompetitionTally, StorageError> {
    Ok(CompetitionTally::from_document(id, doc))
}

#[async_trait]
impl<T: Send + 'static> PageSource for CompetitionPages<T> {
    type Item = T;

    async fn fetch_page(
        &self,
        after: Option<&PageKey>,
        limit: usize,
    ) -> Result<Vec<PageEntry<T>>, StorageError> {
        let state = self.state.read().await;
        let lower = after.map_or(Unbounded, |k| Excluded(k.0.clone()));
        Ok(state
            .competitions
            .range((lower, Unbounded))
            .filter(|(_, doc)| match self.filter {
                CompetitionFilter::All => true,
                CompetitionFilter::Active => {
                    doc.get("status").and_then(JsonValue::as_str) == Some("active")
                }
            })
            .take(limit)
            .map(|(id, doc)| PageEntry {
                key: (id.clone(), String::new()),
                item: (self.decode)(id, doc),
            })
            .collect())
    }
}

struct UserPages {
    state: Arc<RwLock<MemoryState>>,
}

#[async_trait]
impl PageSource for UserPages {
    type Item = UserRecord;

    async fn fetch_page(
        &self,
        after: Option<&PageKey>,
        limit: usize,
    ) -> Result<Vec<PageEntry<UserRecord>>, StorageError> {
        let state = self.state.read().await;
        let lower = after.map_or(Unbounded, |k| Excluded(k.0.clone()));
        Ok(state
            .users
            .range((lower, Unbounded))
            .take(limit)
            .map(|(id, doc)| PageEntry {
                key: (id.clone(), String::new()),
                item: UserRecord::from_document(id, doc).map_err(StorageError::from),
            })
            .collect())
    }
}

struct SnapshotIndexPages {
    state: Arc<RwLock<MemoryState>>,
    competition_id: Option<String>,
}

#[async_trait]
impl PageSource for SnapshotIndexPages {
    type Item = SnapshotIndexEntry;

    async fn fetch_page(
        &self,
        after: Option<&PageKey>,
        limit: usize,
    ) -> Result<Vec<PageEntry<SnapshotIndexEntry>>, StorageError> {
        let state = self.state.read().await;
        let lower = after.map_or(Unbounded, |k| Excluded(k.clone()));
        Ok(state
            .snapshots
            .range((lower, Unbounded))
            .filter(|((competition_id, _), _)| {
                self.competition_id
                    .as_deref()
                    .map_or(true, |wanted| wanted == competition_id)
            })
            .take(limit)
            .map(|((competition_id, hour_key), doc)| PageEntry {
                key: (competition_id.clone(), hour_key.clone()),
                item: decode_index_entry(competition_id, hour_key, doc),
            })
            .collect())
    }
}

/// Never fails: an unreadable body still yields an entry keyed by its path.
fn decode_index_entry(
    competition_id: &str,
    hour_key: &str,
    doc: &JsonValue,
) -> Result<SnapshotIndexEntry, StorageError> {
    let id = format!("{competition_id}/{hour_key}");
    let timestamp = DocumentReader::new("hourlyStats", &id, doc)
        .and_then(|reader| reader.optional_timestamp("timestamp"))
        .ok()
        .flatten();
    Ok(SnapshotIndexEntry {
        competition_id: competition_id.to_string(),
        hour_key: hour_key.to_string(),
        timestamp,
    })
}

#[async_trait]
impl CompetitionStore for MemoryStore {
    fn scan_competitions(&self, filter: CompetitionFilter) -> BoxCursor<Competition> {
        PagedCursor::boxed(
            CompetitionPages {
                state: self.state.clone(),
                filter,
                decode: decode_competition,
            },
            self.page_size(),
        )
    }

    fn scan_competition_tallies(&self) -> BoxCursor<CompetitionTally> {
        PagedCursor::boxed(
            CompetitionPages {
                state: self.state.clone(),
                filter: CompetitionFilter::All,
                decode: decode_tally,
            },
            self.page_size(),
        )
    }

    async fn get_competition(&self, id: &str) -> Result<Competition, StorageError> {
        let state = self.state.read().await;
        let doc = state
            .competitions
            .get(id)
            .ok_or_else(|| StorageError::not_found("competitions", id))?;
        Ok(Competition::from_document(id, doc)?)
    }

    async fn save_competition_stats(
        &self,
        id: &str,
        stats: &CompetitionStats,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        state.check_writable(id)?;
        let doc = state
            .competitions
            .get_mut(id)
            .ok_or_else(|| StorageError::not_found("competitions", id))?;
        merge_patch(doc, &stats.competition_patch());
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn list_submissions(&self, competition_id: &str) -> Result<Vec<Submission>, StorageError> {
        let state = self.state.read().await;
        let lower = (competition_id.to_string(), String::new());
        state
            .submissions
            .range(lower..)
            .take_while(|((cid, _), _)| cid == competition_id)
            .map(|((cid, id), doc)| Submission::from_document(cid, id, doc).map_err(StorageError::from))
            .collect()
    }

    async fn apply_view_counts(
        &self,
        competition_id: &str,
        updates: &[ViewCountUpdate],
    ) -> Result<u64, StorageError> {
        let mut state = self.state.write().await;
        state.check_writable(competition_id)?;
        let mut touched = 0u64;
        for update in updates {
            let key = (competition_id.to_string(), update.submission_id.clone());
            let Some(doc) = state.submissions.get_mut(&key) else {
                continue;
            };
            merge_patch(doc, &update.patch());
            if update.mirrors_platform_statistics() {
                mirror_statistics(doc, update.view_count);
            }
            touched += 1;
        }
        Ok(touched)
    }
}

impl UserStore for MemoryStore {
    fn scan_users(&self) -> BoxCursor<UserRecord> {
        PagedCursor::boxed(
            UserPages {
                state: self.state.clone(),
            },
            self.page_size(),
        )
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn get_snapshot(
        &self,
        competition_id: &str,
        hour_key: &str,
    ) -> Result<Option<HourlySnapshot>, StorageError> {
        let state = self.state.read().await;
        state
            .snapshots
            .get(&(competition_id.to_string(), hour_key.to_string()))
            .map(|doc| HourlySnapshot::from_document(competition_id, hour_key, doc))
            .transpose()
            .map_err(Into::into)
    }

    async fn upsert_snapshot(&self, snapshot: &HourlySnapshot) -> Result<(), StorageError> {
        let doc = serde_json::to_value(snapshot)?;
        let mut state = self.state.write().await;
        state.check_writable(&snapshot.competition_id)?;
        state.snapshots.insert(
            (snapshot.competition_id.clone(), snapshot.hour_key.clone()),
            doc,
        );
        Ok(())
    }

    fn scan_snapshot_index(&self, competition_id: Option<&str>) -> BoxCursor<SnapshotIndexEntry> {
        PagedCursor::boxed(
            SnapshotIndexPages {
                state: self.state.clone(),
                competition_id: competition_id.map(ToString::to_string),
            },
            self.page_size(),
        )
    }

    async fn delete_snapshots(&self, keys: &[SnapshotKey]) -> Result<u64, StorageError> {
        let mut state = self.state.write().await;
        let mut removed = 0u64;
        for key in keys {
            state.check_writable(&key.competition_id)?;
            if state
                .snapshots
                .remove(&(key.competition_id.clone(), key.hour_key.clone()))
                .is_some()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl DailyStatsStore for MemoryStore {
    async fn upsert_daily_stats(&self, stats: &DailySystemStats) -> Result<(), StorageError> {
        let doc = serde_json::to_value(stats)?;
        self.state
            .write()
            .await
            .daily_stats
            .insert(stats.date.clone(), doc);
        Ok(())
    }

    async fn get_daily_stats(
        &self,
        date_key: &str,
    ) -> Result<Option<DailySystemStats>, StorageError> {
        let state = self.state.read().await;
        state
            .daily_stats
            .get(date_key)
            .map(|doc| DailySystemStats::from_document(date_key, doc))
            .transpose()
            .map_err(Into::into)
    }

    async fn count_daily_stats(&self) -> Result<u64, StorageError> {
        Ok(self.state.read().await.daily_stats.len() as u64)
    }
}
