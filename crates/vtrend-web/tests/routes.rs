use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use vtrend_adapters::{MetricsSourceAdapter, ProviderRegistry};
use vtrend_storage::MemoryStore;
use vtrend_sync::{FixedClock, PipelineContext, StatsPipeline};
use vtrend_web::{app, AppState};

async fn seeded() -> (MemoryStore, Router) {
    let store = MemoryStore::new();
    store.put_competition("c1", json!({ "status": "active", "prize": 500 })).await;
    store.put_competition("c2", json!({ "status": "completed" })).await;
    for (id, creator, views) in [("s1", "u1", 10), ("s2", "u1", 20), ("s3", "u2", 30)] {
        store
            .put_submission(
                "c1",
                id,
                json!({ "creatorId": creator, "platform": "tiktok", "currentViewCount": views }),
            )
            .await;
    }
    store.put_user("u1", json!({ "role": "creator" })).await;

    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 8, 18, 14, 25, 0).single().unwrap(),
    ));
    let ctx = PipelineContext::new(
        Arc::new(store.clone()),
        MetricsSourceAdapter::new(ProviderRegistry::new()),
    )
    .with_clock(clock);
    let router = app(AppState::new(StatsPipeline::new(ctx)));
    (store, router)
}

async fn call(router: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let resp = router
        .clone()
        .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn health_reports_liveness() {
    let (_, router) = seeded().await;
    let (status, body) = call(&router, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["providers"], json!([]));
}

#[tokio::test]
async fn update_all_returns_counts() {
    let (store, router) = seeded().await;
    let (status, body) = call(&router, "POST", "/stats/update-all").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["successCount"], json!(1));
    assert_eq!(body["totalCount"], json!(1));
    assert!(store.snapshot_document("c1", "2024-08-18-14").await.is_some());
}

#[tokio::test]
async fn single_competition_update_and_missing_competition() {
    let (_, router) = seeded().await;
    let (status, body) = call(&router, "POST", "/stats/competitions/c1/update").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["totalViews"], json!(60));
    assert_eq!(body["stats"]["averageViews"], json!(20.0));

    let (status, body) = call(&router, "POST", "/stats/competitions/nope/update").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], json!("not_found"));
}

#[tokio::test]
async fn hourly_snapshot_for_one_or_all() {
    let (store, router) = seeded().await;
    let (status, body) = call(&router, "POST", "/admin/snapshots/hourly?competition_id=c1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hourKey"], json!("2024-08-18-14"));
    assert_eq!(body["topSubmissions"][0]["submissionId"], json!("s3"));
    assert!(store.competition_document("c1").await.unwrap().get("stats").is_none());

    let (status, body) = call(&router, "POST", "/admin/snapshots/hourly").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["successCount"], json!(1));
    let competition = store.competition_document("c1").await.unwrap();
    assert_eq!(competition["stats"]["totalViews"], json!(60));
    assert_eq!(store.snapshot_count().await, 1);
}

#[tokio::test]
async fn daily_aggregation_and_storage_reports() {
    let (_, router) = seeded().await;
    let (status, body) = call(&router, "POST", "/admin/aggregation/daily").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalCompetitions"], json!(2));
    assert_eq!(body["activeCompetitions"], json!(1));
    assert_eq!(body["totalCreators"], json!(1));

    let (status, body) = call(&router, "GET", "/admin/storage-stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["collections"]["dailyStats"], json!(1));
    assert_eq!(body["totalSnapshots"], json!(0));

    let (status, body) = call(&router, "GET", "/admin/backup-info").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recommendedActions"], json!([]));
}

#[tokio::test]
async fn retention_validation_maps_to_bad_request() {
    let (store, router) = seeded().await;
    call(&router, "POST", "/admin/snapshots/hourly?competition_id=c1").await;

    let (status, body) = call(&router, "DELETE", "/admin/snapshots/cleanup?days=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], json!("validation"));

    let (status, _) = call(&router, "DELETE", "/admin/snapshots/cleanup?days=soon").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &router,
        "DELETE",
        "/admin/snapshots/range?start_date=2024-01-01&end_date=2024-06-01",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&router, "DELETE", "/admin/snapshots/range?start_date=2024-08-01").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&router, "DELETE", "/admin/competitions/c1/history").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(store.snapshot_count().await, 1);
}

#[tokio::test]
async fn retention_deletes_report_snapshot_counts() {
    let (store, router) = seeded().await;
    call(&router, "POST", "/admin/snapshots/hourly?competition_id=c1").await;

    let (status, body) = call(
        &router,
        "DELETE",
        "/admin/snapshots/range?start_date=2024-08-18&end_date=2024-08-19",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"]["snapshots"], json!(1));
    assert_eq!(store.snapshot_count().await, 0);

    call(&router, "POST", "/admin/snapshots/hourly?competition_id=c1").await;
    let (status, body) = call(&router, "DELETE", "/admin/competitions/c1/history?confirm=yes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"]["snapshots"], json!(1));

    let (status, body) = call(&router, "DELETE", "/admin/snapshots/cleanup").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"]["snapshots"], json!(0));
}
