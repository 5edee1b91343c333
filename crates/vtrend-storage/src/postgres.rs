//! Postgres document backend: one JSONB document per row, keyed like the
//! collection paths, paged with keyset queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use vtrend_core::{
    Competition, CompetitionStats, CompetitionTally, DailySystemStats, HourlySnapshot, Submission,
    UserRecord, ViewCountUpdate,
};

use crate::cursor::{BoxCursor, PageEntry, PageKey, PageSource, PagedCursor, DEFAULT_PAGE_SIZE};
use crate::{
    CompetitionFilter, CompetitionStore, DailyStatsStore, SnapshotIndexEntry, SnapshotKey,
    SnapshotStore, StorageError, SubmissionStore, UserStore,
};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    page_size: usize,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn page_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn row_document(row: &PgRow) -> Result<JsonValue, StorageError> {
    row.try_get::<JsonValue, _>("doc").map_err(StorageError::from)
}

struct CompetitionPages<T> {
    pool: PgPool,
    active_only: bool,
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
        let rows = sqlx::query(
            r#"
            SELECT id, doc
              FROM competitions
             WHERE ($1::text IS NULL OR id > $1)
               AND (NOT $2::bool OR doc->>'status' = 'active')
             ORDER BY id
             LIMIT $3
            "#,
        )
        .bind(after.map(|k| k.0.clone()))
        .bind(self.active_only)
        .bind(page_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<PageEntry<T>, StorageError> {
                let id: String = row.try_get("id")?;
                let item = row_document(row).and_then(|doc| (self.decode)(&id, &doc));
                Ok(PageEntry {
                    key: (id, String::new()),
                    item,
                })
            })
            .collect()
    }
}

struct UserPages {
    pool: PgPool,
}

#[async_trait]
impl PageSource for UserPages {
    type Item = UserRecord;

    async fn fetch_page(
        &self,
        after: Option<&PageKey>,
        limit: usize,
    ) -> Result<Vec<PageEntry<UserRecord>>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, doc
              FROM users
             WHERE ($1::text IS NULL OR id > $1)
             ORDER BY id
             LIMIT $2
            "#,
        )
        .bind(after.map(|k| k.0.clone()))
        .bind(page_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<PageEntry<UserRecord>, StorageError> {
                let id: String = row.try_get("id")?;
                let item = row_document(row)
                    .and_then(|doc| UserRecord::from_document(&id, &doc).map_err(Into::into));
                Ok(PageEntry {
                    key: (id, String::new()),
                    item,
                })
            })
            .collect()
    }
}

struct SnapshotIndexPages {
    pool: PgPool,
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
        let rows = sqlx::query(
            r#"
            SELECT competition_id, hour_key, captured_at
              FROM hourly_snapshots
             WHERE ($1::text IS NULL OR (competition_id, hour_key) > ($1, $2::text))
               AND ($3::text IS NULL OR competition_id = $3)
             ORDER BY competition_id, hour_key
             LIMIT $4
            "#,
        )
        .bind(after.map(|k| k.0.clone()))
        .bind(after.map(|k| k.1.clone()))
        .bind(self.competition_id.as_deref())
        .bind(page_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<PageEntry<SnapshotIndexEntry>, StorageError> {
                let competition_id: String = row.try_get("competition_id")?;
                let hour_key: String = row.try_get("hour_key")?;
                let item = row
                    .try_get::<DateTime<Utc>, _>("captured_at")
                    .map(|timestamp| SnapshotIndexEntry {
                        competition_id: competition_id.clone(),
                        hour_key: hour_key.clone(),
                        timestamp: Some(timestamp),
                    })
                    .map_err(StorageError::from);
                Ok(PageEntry {
                    key: (competition_id, hour_key),
                    item,
                })
            })
            .collect()
    }
}

#[async_trait]
impl CompetitionStore for PgStore {
    fn scan_competitions(&self, filter: CompetitionFilter) -> BoxCursor<Competition> {
        PagedCursor::boxed(
            CompetitionPages {
                pool: self.pool.clone(),
                active_only: filter == CompetitionFilter::Active,
                decode: decode_competition,
            },
            self.page_size,
        )
    }

    fn scan_competition_tallies(&self) -> BoxCursor<CompetitionTally> {
        PagedCursor::boxed(
            CompetitionPages {
                pool: self.pool.clone(),
                active_only: false,
                decode: decode_tally,
            },
            self.page_size,
        )
    }

    async fn get_competition(&self, id: &str) -> Result<Competition, StorageError> {
        let row = sqlx::query("SELECT doc FROM competitions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::not_found("competitions", id))?;
        Ok(Competition::from_document(id, &row_document(&row)?)?)
    }

    async fn save_competition_stats(
        &self,
        id: &str,
        stats: &CompetitionStats,
    ) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE competitions SET doc = doc || $2 WHERE id = $1")
            .bind(id)
            .bind(stats.competition_patch())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("competitions", id));
        }
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for PgStore {
    async fn list_submissions(&self, competition_id: &str) -> Result<Vec<Submission>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, doc FROM submissions WHERE competition_id = $1 ORDER BY id",
        )
        .bind(competition_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            out.push(Submission::from_document(
                competition_id,
                &id,
                &row_document(&row)?,
            )?);
        }
        Ok(out)
    }

    async fn apply_view_counts(
        &self,
        competition_id: &str,
        updates: &[ViewCountUpdate],
    ) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut touched = 0u64;
        for update in updates {
            let result = sqlx::query(
                "UPDATE submissions SET doc = doc || $3 WHERE competition_id = $1 AND id = $2",
            )
            .bind(competition_id)
            .bind(&update.submission_id)
            .bind(update.patch())
            .execute(&mut *tx)
            .await?;
            touched += result.rows_affected();

            if update.mirrors_platform_statistics() {
                sqlx::query(
                    r#"
                    UPDATE submissions
                       SET doc = doc || jsonb_build_object(
                               'youtubeData',
                               COALESCE(
                                   CASE WHEN jsonb_typeof(doc -> 'youtubeData') = 'object'
                                        THEN doc -> 'youtubeData' END,
                                   '{}'::jsonb
                               ) || jsonb_build_object(
                                   'statistics',
                                   COALESCE(
                                       CASE WHEN jsonb_typeof(doc #> '{youtubeData,statistics}') = 'object'
                                            THEN doc #> '{youtubeData,statistics}' END,
                                       '{}'::jsonb
                                   ) || jsonb_build_object('viewCount', $3::jsonb)
                               )
                           )
                     WHERE competition_id = $1
                       AND id = $2
                       AND jsonb_typeof(doc) = 'object'
                    "#,
                )
                .bind(competition_id)
                .bind(&update.submission_id)
                .bind(JsonValue::from(update.view_count))
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(touched)
    }
}

impl UserStore for PgStore {
    fn scan_users(&self) -> BoxCursor<UserRecord> {
        PagedCursor::boxed(
            UserPages {
                pool: self.pool.clone(),
            },
            self.page_size,
        )
    }
}

#[async_trait]
impl SnapshotStore for PgStore {
    async fn get_snapshot(
        &self,
        competition_id: &str,
        hour_key: &str,
    ) -> Result<Option<HourlySnapshot>, StorageError> {
        let row = sqlx::query(
            "SELECT doc FROM hourly_snapshots WHERE competition_id = $1 AND hour_key = $2",
        )
        .bind(competition_id)
        .bind(hour_key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(HourlySnapshot::from_document(
                competition_id,
                hour_key,
                &row_document(&row)?,
            )?)),
            None => Ok(None),
        }
    }

    async fn upsert_snapshot(&self, snapshot: &HourlySnapshot) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO hourly_snapshots (competition_id, hour_key, captured_at, doc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (competition_id, hour_key)
            DO UPDATE SET captured_at = EXCLUDED.captured_at, doc = EXCLUDED.doc
            "#,
        )
        .bind(&snapshot.competition_id)
        .bind(&snapshot.hour_key)
        .bind(snapshot.timestamp)
        .bind(serde_json::to_value(snapshot)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn scan_snapshot_index(&self, competition_id: Option<&str>) -> BoxCursor<SnapshotIndexEntry> {
        PagedCursor::boxed(
            SnapshotIndexPages {
                pool: self.pool.clone(),
                competition_id: competition_id.map(ToString::to_string),
            },
            self.page_size,
        )
    }

    async fn delete_snapshots(&self, keys: &[SnapshotKey]) -> Result<u64, StorageError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let competition_ids: Vec<String> = keys.iter().map(|k| k.competition_id.clone()).collect();
        let hour_keys: Vec<String> = keys.iter().map(|k| k.hour_key.clone()).collect();
        let result = sqlx::query(
            r#"
            DELETE FROM hourly_snapshots AS s
             USING UNNEST($1::text[], $2::text[]) AS k(competition_id, hour_key)
             WHERE s.competition_id = k.competition_id
               AND s.hour_key = k.hour_key
            "#,
        )
        .bind(competition_ids)
        .bind(hour_keys)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DailyStatsStore for PgStore {
    async fn upsert_daily_stats(&self, stats: &DailySystemStats) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO system_stats (date_key, doc, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (date_key)
            DO UPDATE SET doc = EXCLUDED.doc, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&stats.date)
        .bind(serde_json::to_value(stats)?)
        .bind(stats.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_daily_stats(
        &self,
        date_key: &str,
    ) -> Result<Option<DailySystemStats>, StorageError> {
        let row = sqlx::query("SELECT doc FROM system_stats WHERE date_key = $1")
            .bind(date_key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(DailySystemStats::from_document(
                date_key,
                &row_document(&row)?,
            )?)),
            None => Ok(None),
        }
    }

    async fn count_daily_stats(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM system_stats")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}
