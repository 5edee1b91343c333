#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde_json::json;
use vtrend_adapters::test_utils::ScriptedProvider;
use vtrend_adapters::{MetricsSourceAdapter, ProviderRegistry};
use vtrend_storage::MemoryStore;
use vtrend_sync::{FixedClock, PipelineContext, StatsPipeline};

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).single().unwrap()
}

pub struct Harness {
    pub store: MemoryStore,
    pub clock: Arc<FixedClock>,
    pub pipeline: StatsPipeline,
}

/// Providers are cloned in; clones share their call log.
pub fn harness(store: MemoryStore, providers: Vec<ScriptedProvider>) -> Harness {
    let clock = Arc::new(FixedClock::new(at(2024, 8, 18, 14, 25)));
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(Arc::new(provider));
    }
    let ctx = PipelineContext::new(Arc::new(store.clone()), MetricsSourceAdapter::new(registry))
        .with_clock(clock.clone())
        .with_bucket_offset(FixedOffset::east_opt(0).unwrap())
        .with_fleet_concurrency(2);
    Harness {
        store,
        clock,
        pipeline: StatsPipeline::new(ctx),
    }
}

pub async fn seed_competition(store: &MemoryStore, id: &str, status: &str) {
    store
        .put_competition(id, json!({ "title": format!("competition {id}"), "status": status }))
        .await;
}

pub async fn seed_tiktok(store: &MemoryStore, competition_id: &str, id: &str, creator: &str, views: u64) {
    store
        .put_submission(
            competition_id,
            id,
            json!({
                "creatorId": creator,
                "platform": "tiktok",
                "videoId": format!("tt-{id}"),
                "currentViewCount": views,
            }),
        )
        .await;
}

pub async fn seed_youtube(store: &MemoryStore, competition_id: &str, id: &str, video_id: &str, views: u64) {
    store
        .put_submission(
            competition_id,
            id,
            json!({
                "creatorId": format!("creator-{id}"),
                "platform": "youtube",
                "youtubeData": {
                    "videoId": video_id,
                    "statistics": { "viewCount": views.to_string() }
                },
                "currentViewCount": views,
            }),
        )
        .await;
}
