//! Typed decode step for stored JSON documents.
//!
//! Every numeric field read from storage or from a provider response goes
//! through [`coerce_count`] or [`coerce_amount`]; this is the single coercion
//! table for the crate:
//!
//! | JSON value                  | count (`u64`)                 | amount (`f64`) |
//! |-----------------------------|-------------------------------|----------------|
//! | unsigned integer            | value                         | value          |
//! | negative integer            | error                         | value          |
//! | finite float                | truncated if `>= 0`, else error | value        |
//! | decimal-digit string        | parsed                        | parsed         |
//! | `-`? digits (`.` digits)?    | error                         | parsed         |
//! | anything else               | error                         | error          |
//!
//! Strings are never trimmed, and exponents are rejected.
//!
//! Decoding fails closed. The only zero defaults are the documented ones:
//! a missing `prize`/`prizeAmount`, a missing `stats` block and a missing
//! `currentViewCount`. [`CompetitionTally`] is the one lenient reader: it
//! reports bad fields instead of rejecting the document.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::{
    Competition, CompetitionStats, CompetitionStatus, DailySystemStats, HourlySnapshot, Platform,
    Submission, UserRecord, UserRole,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoercionError {
    #[error("expected a non-negative count, found {0}")]
    NotACount(String),
    #[error("expected a numeric amount, found {0}")]
    NotAnAmount(String),
}

pub fn coerce_count(value: &JsonValue) -> Result<u64, CoercionError> {
    match value {
        JsonValue::Number(n) => {
            if let Some(v) = n.as_u64() {
                Ok(v)
            } else if let Some(f) = n.as_f64().filter(|f| f.is_finite() && *f >= 0.0) {
                Ok(f.trunc() as u64)
            } else {
                Err(CoercionError::NotACount(value.to_string()))
            }
        }
        JsonValue::String(s) if is_decimal_digits(s) => s
            .parse::<u64>()
            .map_err(|_| CoercionError::NotACount(value.to_string())),
        other => Err(CoercionError::NotACount(other.to_string())),
    }
}

pub fn coerce_amount(value: &JsonValue) -> Result<f64, CoercionError> {
    match value {
        JsonValue::Number(n) => n
            .as_f64()
            .filter(|f| f.is_finite())
            .ok_or_else(|| CoercionError::NotAnAmount(value.to_string())),
        JsonValue::String(s) if is_decimal_amount(s) => s
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .ok_or_else(|| CoercionError::NotAnAmount(value.to_string())),
        other => Err(CoercionError::NotAnAmount(other.to_string())),
    }
}

fn is_decimal_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_decimal_amount(s: &str) -> bool {
    let unsigned = s.strip_prefix('-').unwrap_or(s);
    match unsigned.split_once('.') {
        Some((whole, fraction)) => is_decimal_digits(whole) && is_decimal_digits(fraction),
        None => is_decimal_digits(unsigned),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("decoding {collection}/{id}: field `{field}`: {reason}")]
pub struct DecodeError {
    pub collection: &'static str,
    pub id: String,
    pub field: String,
    pub reason: String,
}

/// Read-only view over one stored document with typed accessors.
///
/// Paths are dotted (`youtubeData.videoId`); an explicit JSON `null` is
/// treated the same as a missing field.
pub struct DocumentReader<'a> {
    collection: &'static str,
    id: &'a str,
    body: &'a Map<String, JsonValue>,
}

impl<'a> DocumentReader<'a> {
    pub fn new(
        collection: &'static str,
        id: &'a str,
        value: &'a JsonValue,
    ) -> Result<Self, DecodeError> {
        match value.as_object() {
            Some(body) => Ok(Self {
                collection,
                id,
                body,
            }),
            None => Err(DecodeError {
                collection,
                id: id.to_string(),
                field: "<document>".to_string(),
                reason: "expected a JSON object".to_string(),
            }),
        }
    }

    pub fn error(&self, field: &str, reason: impl Into<String>) -> DecodeError {
        DecodeError {
            collection: self.collection,
            id: self.id.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    fn lookup(&self, path: &str) -> Option<&'a JsonValue> {
        let mut segments = path.split('.');
        let mut cur = self.body.get(segments.next()?)?;
        for segment in segments {
            cur = cur.get(segment)?;
        }
        (!cur.is_null()).then_some(cur)
    }

    pub fn has(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    pub fn optional_str(&self, path: &str) -> Result<Option<&'a str>, DecodeError> {
        match self.lookup(path) {
            None => Ok(None),
            Some(JsonValue::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(self.error(path, format!("expected a string, found {other}"))),
        }
    }

    pub fn required_str(&self, path: &str) -> Result<&'a str, DecodeError> {
        self.optional_str(path)?
            .ok_or_else(|| self.error(path, "missing required field"))
    }

    pub fn optional_count(&self, path: &str) -> Result<Option<u64>, DecodeError> {
        self.lookup(path)
            .map(|v| coerce_count(v).map_err(|e| self.error(path, e.to_string())))
            .transpose()
    }

    pub fn required_count(&self, path: &str) -> Result<u64, DecodeError> {
        self.optional_count(path)?
            .ok_or_else(|| self.error(path, "missing required field"))
    }

    pub fn optional_amount(&self, path: &str) -> Result<Option<f64>, DecodeError> {
        self.lookup(path)
            .map(|v| coerce_amount(v).map_err(|e| self.error(path, e.to_string())))
            .transpose()
    }

    pub fn optional_timestamp(&self, path: &str) -> Result<Option<DateTime<Utc>>, DecodeError> {
        match self.optional_str(path)? {
            None => Ok(None),
            Some(text) => DateTime::parse_from_rfc3339(text)
                .map(|ts| Some(ts.with_timezone(&Utc)))
                .map_err(|e| self.error(path, format!("invalid RFC 3339 timestamp: {e}"))),
        }
    }

    pub fn required_timestamp(&self, path: &str) -> Result<DateTime<Utc>, DecodeError> {
        self.optional_timestamp(path)?
            .ok_or_else(|| self.error(path, "missing required field"))
    }

    /// Deserializes a nested value with serde.
    pub fn optional_nested<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, DecodeError> {
        self.lookup(path)
            .map(|v| T::deserialize(v).map_err(|e| self.error(path, e.to_string())))
            .transpose()
    }
}

impl Competition {
    pub fn from_document(id: &str, doc: &JsonValue) -> Result<Self, DecodeError> {
        let reader = DocumentReader::new("competitions", id, doc)?;
        let status = CompetitionStatus::from_document_value(reader.required_str("status")?);
        let stats = if reader.has("stats") {
            Some(decode_stats(&reader)?)
        } else {
            None
        };
        Ok(Self {
            id: id.to_string(),
            status,
            stats,
            prize: reader.optional_amount("prize")?,
            prize_amount: reader.optional_amount("prizeAmount")?,
        })
    }
}

fn decode_stats(reader: &DocumentReader<'_>) -> Result<CompetitionStats, DecodeError> {
    let total_submissions = reader.required_count("stats.totalSubmissions")?;
    let total_views = reader.required_count("stats.totalViews")?;
    let average_views = match reader.optional_amount("stats.averageViews")? {
        Some(avg) => avg,
        None if total_submissions > 0 => total_views as f64 / total_submissions as f64,
        None => 0.0,
    };
    Ok(CompetitionStats {
        total_submissions,
        total_views,
        unique_creators: reader.required_count("stats.uniqueCreators")?,
        average_views,
        last_updated: reader.required_timestamp("stats.lastUpdated")?,
    })
}

impl Submission {
    pub fn from_document(
        competition_id: &str,
        id: &str,
        doc: &JsonValue,
    ) -> Result<Self, DecodeError> {
        let reader = DocumentReader::new("submissions", id, doc)?;
        let platform_raw = reader.required_str("platform")?;
        let platform = Platform::from_str(platform_raw).map_err(|e| reader.error("platform", e))?;

        let mut video_id = reader.optional_str("videoId")?;
        if platform == Platform::Youtube {
            if let Some(nested) = reader.optional_str("youtubeData.videoId")? {
                video_id = Some(nested);
            }
        }

        Ok(Self {
            id: id.to_string(),
            competition_id: competition_id.to_string(),
            creator_id: reader.required_str("creatorId")?.to_string(),
            platform,
            external_video_id: video_id
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(ToString::to_string),
            current_view_count: reader.optional_count("currentViewCount")?.unwrap_or(0),
            last_updated_at: reader.optional_timestamp("lastUpdatedAt")?,
        })
    }
}

impl UserRecord {
    /// Users without a `role` are counted in the total but in no role bucket.
    pub fn from_document(id: &str, doc: &JsonValue) -> Result<Self, DecodeError> {
        let reader = DocumentReader::new("users", id, doc)?;
        Ok(Self {
            id: id.to_string(),
            role: reader.optional_str("role")?.map(UserRole::from_document_value),
        })
    }
}

impl HourlySnapshot {
    /// Competition id and hour key come from the document path, so older
    /// documents without `hourKey` (or `competitionId`) still decode. A
    /// missing `topSubmissions` or `hourlyGrowth` reads as empty.
    pub fn from_document(
        competition_id: &str,
        hour_key: &str,
        doc: &JsonValue,
    ) -> Result<Self, DecodeError> {
        let id = format!("{competition_id}/{hour_key}");
        let reader = DocumentReader::new("hourlyStats", &id, doc)?;
        Ok(Self {
            competition_id: competition_id.to_string(),
            hour_key: hour_key.to_string(),
            timestamp: reader.required_timestamp("timestamp")?,
            total_views: reader.required_count("totalViews")?,
            total_submissions: reader.required_count("totalSubmissions")?,
            unique_creators: reader.required_count("uniqueCreators")?,
            top_submissions: reader.optional_nested("topSubmissions")?.unwrap_or_default(),
            hourly_growth: reader.optional_nested("hourlyGrowth")?.unwrap_or_default(),
        })
    }
}

/// What the daily rollup needs from one competition document.
///
/// Unlike [`Competition::from_document`] this never rejects the document: a
/// field that fails to decode contributes nothing and is reported in `issues`,
/// so every stored competition is still counted.
#[derive(Debug, Clone, PartialEq)]
pub struct CompetitionTally {
    pub id: String,
    pub status: CompetitionStatus,
    pub prize_pool: f64,
    pub total_views: u64,
    pub issues: Vec<DecodeError>,
}

impl CompetitionTally {
    pub fn from_document(id: &str, doc: &JsonValue) -> Self {
        let mut tally = Self {
            id: id.to_string(),
            status: CompetitionStatus::Other,
            prize_pool: 0.0,
            total_views: 0,
            issues: Vec::new(),
        };
        let reader = match DocumentReader::new("competitions", id, doc) {
            Ok(reader) => reader,
            Err(err) => {
                tally.issues.push(err);
                return tally;
            }
        };

        match reader.required_str("status") {
            Ok(status) => tally.status = CompetitionStatus::from_document_value(status),
            Err(err) => tally.issues.push(err),
        }
        for field in ["prize", "prizeAmount"] {
            match reader.optional_amount(field) {
                Ok(amount) => tally.prize_pool += amount.unwrap_or(0.0),
                Err(err) => tally.issues.push(err),
            }
        }
        match reader.optional_count("stats.totalViews") {
            Ok(views) => tally.total_views = views.unwrap_or(0),
            Err(err) => tally.issues.push(err),
        }
        tally
    }

    pub fn is_active(&self) -> bool {
        self.status == CompetitionStatus::Active
    }
}

impl DailySystemStats {
    pub fn from_document(date_key: &str, doc: &JsonValue) -> Result<Self, DecodeError> {
        serde_json::from_value(doc.clone()).map_err(|e| DecodeError {
            collection: "systemStats",
            id: date_key.to_string(),
            field: "<document>".to_string(),
            reason: e.to_string(),
        })
    }
}
