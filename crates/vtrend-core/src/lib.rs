//! Core domain model for vtrend: competitions, submissions, hourly snapshots
//! and the daily system rollup, plus the pure aggregation and ranking steps.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

pub mod aggregate;
pub mod decode;

pub use aggregate::{aggregate_submissions, rank_submissions, top_submissions};
pub use decode::{
    coerce_amount, coerce_count, CoercionError, CompetitionTally, DecodeError, DocumentReader,
};

pub const CRATE_NAME: &str = "vtrend-core";

/// Number of ranked entries persisted with each hourly snapshot.
pub const MAX_TOP_SUBMISSIONS: usize = 10;

pub const HOUR_KEY_FORMAT: &str = "%Y-%m-%d-%H";
pub const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompetitionStatus {
    Active,
    Inactive,
    Other,
}

impl CompetitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Other => "other",
        }
    }

    /// Unknown status strings collapse into `Other`; only `active` drives the fleet run.
    pub fn from_document_value(value: &str) -> Self {
        match value {
            "active" => Self::Active,
            "inactive" => Self::Inactive,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Tiktok,
    Instagram,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Youtube, Platform::Tiktok, Platform::Instagram];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Tiktok => "tiktok",
            Self::Instagram => "instagram",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unsupported platform `{s}`"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Brand,
    Creator,
    Admin,
    Other,
}

impl UserRole {
    pub fn from_document_value(value: &str) -> Self {
        match value {
            "brand" => Self::Brand,
            "creator" => Self::Creator,
            "admin" => Self::Admin,
            _ => Self::Other,
        }
    }
}

/// Aggregated competition statistics as stored in the competition's `stats` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitionStats {
    pub total_submissions: u64,
    pub total_views: u64,
    pub unique_creators: u64,
    pub average_views: f64,
    pub last_updated: DateTime<Utc>,
}

impl CompetitionStats {
    pub fn empty(at: DateTime<Utc>) -> Self {
        Self {
            total_submissions: 0,
            total_views: 0,
            unique_creators: 0,
            average_views: 0.0,
            last_updated: at,
        }
    }

    /// Merge patch applied to the competition document: the `stats` block plus
    /// the denormalized `participantCount`/`totalViews` read by external clients.
    pub fn competition_patch(&self) -> JsonValue {
        json!({
            "stats": self,
            "participantCount": self.total_submissions,
            "totalViews": self.total_views as f64,
        })
    }

    pub fn baseline(&self) -> SnapshotBaseline {
        SnapshotBaseline {
            total_views: self.total_views,
            total_submissions: self.total_submissions,
            unique_creators: self.unique_creators,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Competition {
    pub id: String,
    pub status: CompetitionStatus,
    /// `None` until the competition has been aggregated at least once.
    pub stats: Option<CompetitionStats>,
    pub prize: Option<f64>,
    pub prize_amount: Option<f64>,
}

impl Competition {
    pub fn is_active(&self) -> bool {
        self.status == CompetitionStatus::Active
    }

    /// Missing prize fields contribute 0; both are summed when both are present.
    pub fn prize_pool(&self) -> f64 {
        self.prize.unwrap_or(0.0) + self.prize_amount.unwrap_or(0.0)
    }

    pub fn aggregated_views(&self) -> u64 {
        self.stats.as_ref().map(|s| s.total_views).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub id: String,
    pub competition_id: String,
    pub creator_id: String,
    pub platform: Platform,
    pub external_video_id: Option<String>,
    pub current_view_count: u64,
    pub last_updated_at: Option<DateTime<Utc>>,
}

/// A reconciled view count to be written back to one submission document.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewCountUpdate {
    pub submission_id: String,
    pub platform: Platform,
    pub view_count: u64,
    pub observed_at: DateTime<Utc>,
}

impl ViewCountUpdate {
    pub fn patch(&self) -> JsonValue {
        json!({
            "currentViewCount": self.view_count,
            "lastUpdatedAt": self.observed_at,
        })
    }

    /// YouTube submissions mirror the count into `youtubeData.statistics.viewCount`.
    pub fn mirrors_platform_statistics(&self) -> bool {
        self.platform == Platform::Youtube
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub role: Option<UserRole>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedSubmission {
    pub submission_id: String,
    pub rank: u32,
    pub view_count: u64,
    pub platform: Platform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotBaseline {
    pub total_views: u64,
    pub total_submissions: u64,
    pub unique_creators: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HourlyGrowth {
    /// Negative when the provider reports lower counts than the previous hour.
    pub views_gain: i64,
    pub new_submissions: i64,
    /// Always 0; rank deltas are not computed.
    pub ranking_changes: i64,
}

impl HourlyGrowth {
    pub fn between(current: &SnapshotBaseline, previous: &SnapshotBaseline) -> Self {
        Self {
            views_gain: signed_delta(current.total_views, previous.total_views),
            new_submissions: signed_delta(current.total_submissions, previous.total_submissions),
            ranking_changes: 0,
        }
    }
}

fn signed_delta(current: u64, previous: u64) -> i64 {
    let delta = i128::from(current) - i128::from(previous);
    delta.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlySnapshot {
    pub competition_id: String,
    pub hour_key: String,
    pub timestamp: DateTime<Utc>,
    pub total_views: u64,
    pub total_submissions: u64,
    pub unique_creators: u64,
    pub top_submissions: Vec<RankedSubmission>,
    pub hourly_growth: HourlyGrowth,
}

impl HourlySnapshot {
    pub fn baseline(&self) -> SnapshotBaseline {
        SnapshotBaseline {
            total_views: self.total_views,
            total_submissions: self.total_submissions,
            unique_creators: self.unique_creators,
        }
    }

    pub fn path(&self) -> String {
        snapshot_path(&self.competition_id, &self.hour_key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySystemStats {
    pub date: String,
    pub total_competitions: u64,
    pub active_competitions: u64,
    pub total_users: u64,
    pub total_brands: u64,
    pub total_creators: u64,
    pub total_prize_amount: f64,
    pub total_views: u64,
    pub updated_at: DateTime<Utc>,
}

/// An hour-aligned time partition in a fixed local offset.
///
/// Truncation happens on the local wall clock, so a `+05:30` offset yields
/// buckets starting at `hh:30` UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourBucket {
    start: DateTime<Utc>,
    offset: FixedOffset,
}

impl HourBucket {
    pub fn containing(at: DateTime<Utc>, offset: FixedOffset) -> Self {
        let local_secs = at.timestamp() + i64::from(offset.local_minus_utc());
        let into_hour = Duration::seconds(local_secs.rem_euclid(3600))
            + Duration::nanoseconds(i64::from(at.timestamp_subsec_nanos()));
        Self {
            start: at - into_hour,
            offset,
        }
    }

    /// Inverse of [`HourBucket::key`]: `None` unless `key` is `YYYY-MM-DD-HH`.
    pub fn from_key(key: &str, offset: FixedOffset) -> Option<Self> {
        let (date, hour) = key.rsplit_once('-')?;
        if hour.len() != 2 || !hour.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let local = NaiveDate::parse_from_str(date, DATE_KEY_FORMAT)
            .ok()?
            .and_hms_opt(hour.parse().ok()?, 0, 0)?;
        let start = offset.from_local_datetime(&local).single()?;
        Some(Self {
            start: start.with_timezone(&Utc),
            offset,
        })
    }

    pub fn previous(&self) -> Self {
        Self {
            start: self.start - Duration::hours(1),
            offset: self.offset,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn key(&self) -> String {
        self.start
            .with_timezone(&self.offset)
            .format(HOUR_KEY_FORMAT)
            .to_string()
    }
}

pub fn date_key(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset).format(DATE_KEY_FORMAT).to_string()
}

pub fn snapshot_path(competition_id: &str, hour_key: &str) -> String {
    format!("hourlyStats/{competition_id}/snapshots/{hour_key}")
}

pub fn daily_stats_path(date_key: &str) -> String {
    format!("systemStats/{date_key}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).single().unwrap()
    }

    #[test]
    fn hour_bucket_truncates_instead_of_rounding() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let bucket = HourBucket::containing(utc(2024, 8, 18, 14, 59, 59), offset);
        assert_eq!(bucket.key(), "2024-08-18-14");
        assert_eq!(bucket.start(), utc(2024, 8, 18, 14, 0, 0));
    }

    #[test]
    fn hour_bucket_uses_local_offset() {
        let kst = FixedOffset::east_opt(9 * 3600).unwrap();
        let bucket = HourBucket::containing(utc(2024, 8, 18, 23, 10, 0), kst);
        assert_eq!(bucket.key(), "2024-08-19-08");

        let ist = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let bucket = HourBucket::containing(utc(2024, 8, 18, 10, 10, 0), ist);
        assert_eq!(bucket.key(), "2024-08-18-15");
        assert_eq!(bucket.start(), utc(2024, 8, 18, 9, 30, 0));
    }

    #[test]
    fn hour_keys_parse_back_to_their_bucket() {
        let ist = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let bucket = HourBucket::containing(utc(2024, 8, 18, 10, 10, 0), ist);
        assert_eq!(HourBucket::from_key(&bucket.key(), ist), Some(bucket));

        let utc_offset = FixedOffset::east_opt(0).unwrap();
        let parsed = HourBucket::from_key("2024-08-01-08", utc_offset).unwrap();
        assert_eq!(parsed.start(), utc(2024, 8, 1, 8, 0, 0));

        for bad in ["2024-08-01", "2024-08-01-8", "2024-08-01-24", "2024-13-01-08", "latest"] {
            assert!(HourBucket::from_key(bad, utc_offset).is_none(), "{bad}");
        }
    }

    #[test]
    fn previous_bucket_crosses_midnight() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let bucket = HourBucket::containing(utc(2024, 3, 1, 0, 5, 0), offset);
        assert_eq!(bucket.previous().key(), "2024-02-29-23");
    }

    #[test]
    fn growth_is_signed() {
        let previous = SnapshotBaseline {
            total_views: 100,
            total_submissions: 4,
            unique_creators: 2,
        };
        let current = SnapshotBaseline {
            total_views: 140,
            total_submissions: 3,
            unique_creators: 2,
        };
        let growth = HourlyGrowth::between(&current, &previous);
        assert_eq!(growth.views_gain, 40);
        assert_eq!(growth.new_submissions, -1);
        assert_eq!(growth.ranking_changes, 0);

        let regressed = HourlyGrowth::between(&previous, &current);
        assert_eq!(regressed.views_gain, -40);
    }

    #[test]
    fn compatibility_paths() {
        assert_eq!(
            snapshot_path("comp-1", "2024-08-18-14"),
            "hourlyStats/comp-1/snapshots/2024-08-18-14"
        );
        assert_eq!(daily_stats_path("2024-08-18"), "systemStats/2024-08-18");
    }

    #[test]
    fn prize_pool_sums_both_fields() {
        let competition = Competition {
            id: "c".into(),
            status: CompetitionStatus::Active,
            stats: None,
            prize: Some(100.0),
            prize_amount: Some(50.5),
        };
        assert_eq!(competition.prize_pool(), 150.5);
        assert_eq!(competition.aggregated_views(), 0);
    }
}
