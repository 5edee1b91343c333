mod common;

use chrono::{DateTime, Duration, Utc};
use common::{at, harness, seed_competition, seed_tiktok, Harness};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use vtrend_storage::MemoryStore;
use vtrend_sync::{ErrorKind, PipelineError};

async fn snapshot_at(h: &Harness, competition_id: &str, when: DateTime<Utc>) {
    h.clock.set(when);
    h.pipeline
        .save_competition_hourly_snapshot(competition_id)
        .await
        .unwrap();
}

/// c1 and c2 with snapshots at 08:00 on Aug 1, 10, 20 and 30; the clock ends on Sep 1.
async fn seeded() -> Harness {
    let store = MemoryStore::new();
    for id in ["c1", "c2"] {
        seed_competition(&store, id, "active").await;
        seed_tiktok(&store, id, "s1", "u1", 10).await;
    }
    let h = harness(store, vec![]);
    for day in [1, 10, 20, 30] {
        for id in ["c1", "c2"] {
            snapshot_at(&h, id, at(2024, 8, day, 8, 15)).await;
        }
    }
    h.clock.set(at(2024, 9, 1, 0, 0));
    h
}

#[tokio::test]
async fn cutoff_cleanup_removes_only_older_snapshots() {
    let h = seeded().await;
    let cancel = CancellationToken::new();

    let report = h
        .pipeline
        .cleanup_old_snapshots(at(2024, 8, 15, 0, 0), &cancel)
        .await
        .unwrap();
    assert_eq!(report.deleted, 4);
    assert_eq!(report.scanned, 8);
    assert!(!report.cancelled);
    assert_eq!(h.store.snapshot_count().await, 4);
    assert!(h.store.snapshot_document("c1", "2024-08-10-08").await.is_none());
    assert!(h.store.snapshot_document("c1", "2024-08-20-08").await.is_some());
    assert!(h.store.competition_document("c1").await.is_some());
}

#[tokio::test]
async fn cleanup_by_days_counts_back_from_now() {
    let h = seeded().await;
    let report = h
        .pipeline
        .cleanup_snapshots_older_than(20, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.deleted, 4);

    let err = h
        .pipeline
        .cleanup_snapshots_older_than(0, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn future_cutoff_is_rejected_without_deleting() {
    let h = seeded().await;
    let err = h
        .pipeline
        .cleanup_old_snapshots(at(2024, 9, 2, 0, 0), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    assert_eq!(h.store.snapshot_count().await, 8);
}

#[tokio::test]
async fn range_deletion_is_exclusive_and_bounded() {
    let h = seeded().await;
    let cancel = CancellationToken::new();

    let err = h
        .pipeline
        .delete_data_by_date_range(at(2024, 8, 20, 0, 0), at(2024, 8, 10, 0, 0), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let start = at(2024, 6, 1, 0, 0);
    let err = h
        .pipeline
        .delete_data_by_date_range(start, start + Duration::days(90) + Duration::hours(1), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.store.snapshot_count().await, 8);

    let report = h
        .pipeline
        .delete_data_by_date_range(at(2024, 8, 1, 8, 0), at(2024, 8, 20, 8, 0), &cancel)
        .await
        .unwrap();
    assert_eq!(report.deleted, 2);
    assert!(h.store.snapshot_document("c2", "2024-08-10-08").await.is_none());
    assert!(h.store.snapshot_document("c2", "2024-08-01-08").await.is_some());
    assert!(h.store.snapshot_document("c2", "2024-08-20-08").await.is_some());
}

#[tokio::test]
async fn exactly_ninety_days_is_allowed() {
    let h = seeded().await;
    let start = at(2024, 6, 15, 0, 0);
    let report = h
        .pipeline
        .delete_data_by_date_range(start, start + Duration::days(90), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.deleted, 8);
}

#[tokio::test]
async fn date_strings_are_parsed_and_validated() {
    let h = seeded().await;
    let cancel = CancellationToken::new();

    let report = h
        .pipeline
        .delete_data_by_dates("2024-08-05", "2024-08-25", &cancel)
        .await
        .unwrap();
    assert_eq!(report.deleted, 4);

    let err = h
        .pipeline
        .delete_data_by_dates("2024-08-05", "next tuesday", &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.store.snapshot_count().await, 4);
}

#[tokio::test]
async fn purge_requires_confirmation() {
    let h = seeded().await;
    let cancel = CancellationToken::new();

    let err = h
        .pipeline
        .delete_competition_history_data("c1", false, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.store.snapshot_count().await, 8);

    let report = h
        .pipeline
        .delete_competition_history_data("c1", true, &cancel)
        .await
        .unwrap();
    assert_eq!(report.deleted, 4);
    assert!(h.store.snapshot_document("c1", "2024-08-30-08").await.is_none());
    assert!(h.store.snapshot_document("c2", "2024-08-30-08").await.is_some());
    assert_eq!(
        h.store.competition_document("c1").await.unwrap()["status"],
        json!("active")
    );
}

#[tokio::test]
async fn cancelled_scan_deletes_nothing_further() {
    let h = seeded().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = h
        .pipeline
        .cleanup_old_snapshots(at(2024, 9, 1, 0, 0), &cancel)
        .await
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.deleted, 0);
    assert_eq!(h.store.snapshot_count().await, 8);
}

#[tokio::test]
async fn unreadable_snapshots_are_aged_by_their_hour_key() {
    let h = seeded().await;
    h.store
        .put_snapshot_document("c1", "2024-07-01-08", json!({ "totalViews": "many" }))
        .await;
    h.store
        .put_snapshot_document("c1", "2024-08-25-08", json!("not a document"))
        .await;
    h.store
        .put_snapshot_document("c1", "legacy", json!({ "note": "no timestamp" }))
        .await;
    let cancel = CancellationToken::new();

    let report = h
        .pipeline
        .cleanup_old_snapshots(at(2024, 8, 15, 0, 0), &cancel)
        .await
        .unwrap();
    assert_eq!(report.scanned, 11);
    assert_eq!(report.deleted, 5);
    assert!(h.store.snapshot_document("c1", "2024-07-01-08").await.is_none());
    assert!(h.store.snapshot_document("c1", "2024-08-25-08").await.is_some());
    assert!(h.store.snapshot_document("c1", "legacy").await.is_some());

    let report = h
        .pipeline
        .delete_data_by_date_range(at(2024, 8, 21, 0, 0), at(2024, 8, 26, 0, 0), &cancel)
        .await
        .unwrap();
    assert_eq!(report.deleted, 1);
    assert!(h.store.snapshot_document("c1", "2024-08-25-08").await.is_none());

    let report = h
        .pipeline
        .delete_competition_history_data("c1", true, &cancel)
        .await
        .unwrap();
    assert_eq!(report.deleted, 3);
    assert!(h.store.snapshot_document("c1", "legacy").await.is_none());
}
