//! YouTube Data API v3 `videos.list` view-count lookups.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::warn;
use vtrend_core::{coerce_count, Platform};
use vtrend_storage::{HttpClientConfig, HttpFetcher};

use crate::{MetricsProvider, ProviderError, MAX_PROVIDER_BATCH};

pub const DEFAULT_YOUTUBE_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

const SOURCE_ID: &str = "youtube";

#[derive(Debug, Clone)]
pub struct YouTubeSettings {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub concurrency: usize,
}

pub struct YouTubeMetricsProvider {
    http: Arc<HttpFetcher>,
    api_key: String,
    videos_url: String,
}

impl std::fmt::Debug for YouTubeMetricsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YouTubeMetricsProvider")
            .field("videos_url", &self.videos_url)
            .finish_non_exhaustive()
    }
}

impl YouTubeMetricsProvider {
    pub fn new(http: Arc<HttpFetcher>, api_key: impl Into<String>, base_url: &str) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            videos_url: format!("{}/videos", base_url.trim_end_matches('/')),
        }
    }

    pub fn from_settings(settings: &YouTubeSettings) -> anyhow::Result<Self> {
        if settings.api_key.trim().is_empty() {
            anyhow::bail!("YouTube provider enabled without an API key");
        }
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: settings.timeout,
            user_agent: settings.user_agent.clone(),
            max_in_flight: settings.concurrency.max(1),
            max_in_flight_per_provider: settings.concurrency.max(1),
            ..HttpClientConfig::default()
        })?;
        Ok(Self::new(
            Arc::new(http),
            settings.api_key.clone(),
            &settings.base_url,
        ))
    }
}

#[async_trait]
impl MetricsProvider for YouTubeMetricsProvider {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    async fn fetch_view_counts(&self, ids: &[String]) -> Result<HashMap<String, u64>, ProviderError> {
        if ids.len() > MAX_PROVIDER_BATCH {
            return Err(ProviderError::BatchTooLarge {
                size: ids.len(),
                max: MAX_PROVIDER_BATCH,
            });
        }
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let joined = ids.join(",");
        let response = self
            .http
            .get(
                SOURCE_ID,
                &self.videos_url,
                &[
                    ("part", "statistics"),
                    ("id", joined.as_str()),
                    ("key", self.api_key.as_str()),
                ],
            )
            .await?;
        decode_video_statistics(&response.body)
    }
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    id: String,
    #[serde(default)]
    statistics: Option<JsonValue>,
}

/// Decodes a `videos.list` body into id → view count.
///
/// Items without a usable `statistics.viewCount` are left out and logged.
pub fn decode_video_statistics(body: &[u8]) -> Result<HashMap<String, u64>, ProviderError> {
    let parsed: VideoListResponse =
        serde_json::from_slice(body).map_err(|e| ProviderError::Decode(e.to_string()))?;

    let mut counts = HashMap::with_capacity(parsed.items.len());
    for item in parsed.items {
        let Some(raw) = item.statistics.as_ref().and_then(|s| s.get("viewCount")) else {
            warn!(video_id = %item.id, "video has no viewCount");
            continue;
        };
        match coerce_count(raw) {
            Ok(views) => {
                counts.insert(item.id, views);
            }
            Err(err) => warn!(video_id = %item.id, error = %err, "unusable viewCount"),
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_string_view_counts_and_skips_unusable_items() {
        let body = br#"{
            "kind": "youtube#videoListResponse",
            "items": [
                { "id": "a", "statistics": { "viewCount": "1500", "likeCount": "12" } },
                { "id": "b", "statistics": { "viewCount": 42 } },
                { "id": "c", "statistics": { "likeCount": "3" } },
                { "id": "d", "statistics": { "viewCount": "-4" } },
                { "id": "e" }
            ]
        }"#;
        let counts = decode_video_statistics(body).unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts["a"], 1500);
        assert_eq!(counts["b"], 42);
    }

    #[test]
    fn empty_result_set_decodes_to_no_counts() {
        let counts = decode_video_statistics(br#"{ "items": [] }"#).unwrap();
        assert!(counts.is_empty());
        let counts = decode_video_statistics(br#"{ "pageInfo": {} }"#).unwrap();
        assert!(counts.is_empty());
    }

    #[test]
    fn garbage_body_is_a_decode_error() {
        let err = decode_video_statistics(b"<html>quota</html>").unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[test]
    fn settings_without_key_are_rejected() {
        let err = YouTubeMetricsProvider::from_settings(&YouTubeSettings {
            api_key: "  ".into(),
            base_url: DEFAULT_YOUTUBE_BASE_URL.into(),
            timeout: Duration::from_secs(5),
            user_agent: None,
            concurrency: 1,
        })
        .unwrap_err();
        assert!(err.to_string().contains("API key"));
    }
}
