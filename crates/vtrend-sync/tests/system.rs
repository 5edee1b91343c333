mod common;

use common::{at, harness, seed_competition, seed_tiktok};
use serde_json::{json, Value};
use vtrend_storage::MemoryStore;

fn stats_block(total_views: u64) -> Value {
    json!({
        "totalSubmissions": 2,
        "totalViews": total_views,
        "uniqueCreators": 1,
        "averageViews": total_views as f64 / 2.0,
        "lastUpdated": "2024-08-18T13:00:00Z"
    })
}

async fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store
        .put_competition(
            "c1",
            json!({ "status": "active", "prize": 1000, "stats": stats_block(60) }),
        )
        .await;
    store
        .put_competition(
            "c2",
            json!({ "status": "completed", "prizeAmount": "250.5", "stats": stats_block(40) }),
        )
        .await;
    store
        .put_competition("c3", json!({ "status": "active", "prize": 100, "prizeAmount": 50 }))
        .await;
    store.put_competition("c4", json!({ "status": "active", "prize": "lots" })).await;

    store.put_user("u1", json!({ "role": "brand" })).await;
    store.put_user("u2", json!({ "role": "creator" })).await;
    store.put_user("u3", json!({ "role": "creator" })).await;
    store.put_user("u4", json!({ "role": "admin" })).await;
    store.put_user("u5", json!({})).await;
    store
}

#[tokio::test]
async fn daily_rollup_counts_everything_once() {
    let h = harness(seeded_store().await, vec![]);

    let stats = h.pipeline.save_daily_aggregation().await.unwrap();
    assert_eq!(stats.date, "2024-08-18");
    assert_eq!(stats.total_competitions, 4);
    assert_eq!(stats.active_competitions, 3);
    assert_eq!(stats.total_users, 5);
    assert_eq!(stats.total_brands, 1);
    assert_eq!(stats.total_creators, 2);
    assert!((stats.total_prize_amount - 1400.5).abs() < 1e-9);
    assert_eq!(stats.total_views, 100);

    h.clock.set(at(2024, 8, 18, 23, 0));
    let rerun = h.pipeline.save_daily_aggregation().await.unwrap();
    assert_eq!(rerun.date, stats.date);
    let info = h.pipeline.get_storage_stats().await.unwrap();
    assert_eq!(info.collections.daily_stats, 1);
}

#[tokio::test]
async fn daily_rollup_counts_documents_with_bad_fields() {
    let store = seeded_store().await;
    store
        .put_competition(
            "c5",
            json!({ "status": "active", "prize": 75, "stats": { "totalViews": "n/a" } }),
        )
        .await;
    store.put_competition("c6", json!(["not", "a", "document"])).await;
    store.put_user("u6", json!({ "role": 7 })).await;
    let h = harness(store, vec![]);

    let stats = h.pipeline.save_daily_aggregation().await.unwrap();
    assert_eq!(stats.total_competitions, 6);
    assert_eq!(stats.active_competitions, 4);
    assert!((stats.total_prize_amount - 1475.5).abs() < 1e-9);
    assert_eq!(stats.total_views, 100);
    assert_eq!(stats.total_users, 6);
    assert_eq!(stats.total_brands, 1);
    assert_eq!(stats.total_creators, 2);
}

#[tokio::test]
async fn storage_stats_cover_every_collection() {
    let store = seeded_store().await;
    seed_tiktok(&store, "c1", "s1", "u2", 10).await;
    let h = harness(store, vec![]);

    h.clock.set(at(2024, 5, 1, 9, 0));
    h.pipeline.save_competition_hourly_snapshot("c1").await.unwrap();
    h.clock.set(at(2024, 8, 18, 14, 0));
    h.pipeline.save_competition_hourly_snapshot("c1").await.unwrap();
    h.pipeline.save_competition_hourly_snapshot("c3").await.unwrap();

    let stats = h.pipeline.get_storage_stats().await.unwrap();
    assert_eq!(stats.collections.competitions, 4);
    assert_eq!(stats.collections.users, 5);
    assert_eq!(stats.collections.hourly_stats, 2);
    assert_eq!(stats.collections.daily_stats, 0);
    assert_eq!(stats.total_snapshots, 3);
    assert_eq!(stats.oldest_snapshot, Some(at(2024, 5, 1, 9, 0)));
    assert_eq!(stats.newest_snapshot, Some(at(2024, 8, 18, 14, 0)));

    let advice = h.pipeline.backup_info().await.unwrap();
    assert_eq!(advice.total_snapshots, 3);
    assert_eq!(advice.recommended_actions.len(), 1);
}

#[tokio::test]
async fn health_lists_registered_providers() {
    let store = MemoryStore::new();
    seed_competition(&store, "c1", "active").await;
    let h = harness(store, vec![]);
    let health = h.pipeline.health();
    assert_eq!(health.status, "healthy");
    assert!(health.providers.is_empty());
}
