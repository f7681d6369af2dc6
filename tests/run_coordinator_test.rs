//! Run coordinator tests
//!
//! End-to-end runs against the in-memory record store: selection, chunking,
//! failure isolation, throttling, cancellation and the final report.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use prometheus::Registry;
use regenerator::batch::{
    BatchExecutor, CategoryStatus, RawRunOptions, RunCoordinator, RunProgress, RunRequest,
};
use regenerator::category::{MediaKind, MEDIA_COLLECTION};
use regenerator::config::EngineConfig;
use regenerator::metrics::RegenMetrics;
use regenerator::store::{
    ContentTypeKind, ContentTypeSchema, MemoryRecordStore, Mutation, RecordId, UPDATED_AT_FIELD,
};
use regenerator::RegenError;
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const VIDEO_ID_BASE: u64 = 1_000;
const AUDIO_ID_BASE: u64 = 2_000;

/// Store with `images` images (ids 1..), `videos` videos (ids 1001..) and one pdf
fn media_store(images: u64, videos: u64) -> Arc<MemoryRecordStore> {
    let store = Arc::new(MemoryRecordStore::new());
    for id in 1..=images {
        store.insert(MEDIA_COLLECTION, id, json!({ "mime": "image/jpeg" }));
    }
    for offset in 1..=videos {
        store.insert(MEDIA_COLLECTION, VIDEO_ID_BASE + offset, json!({ "mime": "video/mp4" }));
    }
    store.insert(MEDIA_COLLECTION, AUDIO_ID_BASE, json!({ "mime": "application/pdf" }));
    store
}

fn options(chunk_size: i64) -> RawRunOptions {
    RawRunOptions {
        chunk_size,
        sleep_duration: 0,
        ..Default::default()
    }
}

fn is_touched(store: &MemoryRecordStore, id: u64) -> bool {
    store
        .get(MEDIA_COLLECTION, id)
        .map(|record| record.get(UPDATED_AT_FIELD).is_some())
        .unwrap_or(false)
}

#[tokio::test]
async fn test_images_end_to_end() {
    let store = media_store(23, 4);
    let progress = Arc::new(Mutex::new(Vec::<RunProgress>::new()));
    let progress_clone = progress.clone();

    let coordinator = RunCoordinator::new(store.clone())
        .with_progress_callback(move |p| progress_clone.lock().push(p.clone()));

    let report = coordinator
        .run(RunRequest::media(["images"]).with_options(options(10)))
        .await
        .expect("run should succeed");

    assert_eq!(report.success_count, 23);
    assert_eq!(report.failure_count, 0);
    assert!(report.failed_ids.is_empty());
    assert_eq!(
        report.message,
        "23 items updated successfully, 0 items failed to update."
    );
    assert!(!report.cancelled);

    let outcome = &report.categories[0];
    assert_eq!(outcome.selected, 23);
    assert_eq!(outcome.chunks, 3);
    assert_eq!(outcome.status, CategoryStatus::Processed);

    let seen: Vec<(usize, usize)> = progress
        .lock()
        .iter()
        .map(|p| (p.chunk_index, p.succeeded))
        .collect();
    assert_eq!(seen, vec![(0, 10), (1, 20), (2, 23)]);

    assert!((1..=23).all(|id| is_touched(&store, id)));
    assert!(!is_touched(&store, VIDEO_ID_BASE + 1));
    assert!(!is_touched(&store, AUDIO_ID_BASE));
}

#[tokio::test]
async fn test_failed_selection_skips_only_that_category() {
    let store = media_store(5, 3);
    store.fail_queries_matching(MEDIA_COLLECTION, MediaKind::Videos.filter());

    let report = RunCoordinator::new(store.clone())
        .run(RunRequest::media(["images", "videos"]).with_options(options(2)))
        .await
        .expect("selection failures are not fatal");

    assert_eq!(report.success_count, 5);
    assert_eq!(report.failure_count, 0);
    assert_eq!(report.categories.len(), 2);
    assert_eq!(report.categories[0].status, CategoryStatus::Processed);
    assert!(matches!(
        report.categories[1].status,
        CategoryStatus::SelectionFailed(_)
    ));
    assert_eq!(report.categories[1].selected, 0);
    assert!(!is_touched(&store, VIDEO_ID_BASE + 1));
}

#[tokio::test]
async fn test_unrecognized_category_is_skipped() {
    let store = media_store(2, 0);

    let report = RunCoordinator::new(store.clone())
        .run(RunRequest::media(["gifs", "images", "Videos"]).with_options(options(10)))
        .await
        .expect("unrecognized categories are not errors");

    assert_eq!(report.success_count, 2);
    assert_eq!(report.categories[0].status, CategoryStatus::Unrecognized);
    assert_eq!(report.categories[2].status, CategoryStatus::Unrecognized);
    assert_eq!(store.query_count(), 1);
}

#[tokio::test]
async fn test_files_category_selects_everything_else() {
    let store = media_store(3, 2);
    store.insert(MEDIA_COLLECTION, 3_000, json!({ "mime": "audio/ogg" }));
    store.insert(MEDIA_COLLECTION, 3_001, json!({ "name": "no mime recorded" }));

    let report = RunCoordinator::new(store.clone())
        .run(RunRequest::media(["files"]).with_options(options(10)))
        .await
        .unwrap();

    assert_eq!(report.success_count, 2);
    assert!(is_touched(&store, AUDIO_ID_BASE));
    assert!(is_touched(&store, 3_001));
    assert!(!is_touched(&store, 3_000));
}

#[tokio::test]
async fn test_all_media_kinds_do_not_overlap() {
    let store = media_store(4, 3);
    store.insert(MEDIA_COLLECTION, 3_000, json!({ "mime": "audio/ogg" }));

    let report = RunCoordinator::new(store.clone())
        .run(RunRequest::media(MediaKind::ALL.map(|k| k.as_str())).with_options(options(3)))
        .await
        .unwrap();

    assert_eq!(report.success_count, store.len(MEDIA_COLLECTION));
    assert_eq!(store.update_count(), store.len(MEDIA_COLLECTION));
}

#[tokio::test]
async fn test_limit_caps_candidates_per_category() {
    let store = media_store(12, 8);

    let report = RunCoordinator::new(store.clone())
        .run(
            RunRequest::media(["images", "videos"]).with_options(RawRunOptions {
                limit: 5,
                ..options(2)
            }),
        )
        .await
        .unwrap();

    assert_eq!(report.categories[0].selected, 5);
    assert_eq!(report.categories[1].selected, 5);
    assert_eq!(report.success_count, 10);
    assert!((1..=5).all(|id| is_touched(&store, id)));
    assert!((6..=12).all(|id| !is_touched(&store, id)));
}

#[tokio::test]
async fn test_limit_counts_failed_candidates_as_considered() {
    let store = media_store(6, 0);
    store.fail_updates_for(MEDIA_COLLECTION, 2);

    let report = RunCoordinator::new(store.clone())
        .run(RunRequest::media(["images"]).with_options(RawRunOptions {
            limit: 3,
            ..options(10)
        }))
        .await
        .unwrap();

    assert_eq!(report.categories[0].selected, 3);
    assert_eq!(report.success_count, 2);
    assert_eq!(report.failure_count, 1);
    assert_eq!(report.failed_ids, vec![RecordId(2)]);
}

#[tokio::test]
async fn test_skip_field_excludes_processed_records() {
    let store = Arc::new(MemoryRecordStore::new());
    for id in 1..=4 {
        store.insert(
            MEDIA_COLLECTION,
            id,
            json!({ "mime": "image/png", "blurhash": "LEHV6nWB2yk8" }),
        );
    }

    let report = RunCoordinator::new(store.clone())
        .run(RunRequest::media(["images"]).with_options(RawRunOptions {
            skip_field: Some(" Blurhash ".to_string()),
            ..options(10)
        }))
        .await
        .unwrap();

    assert_eq!(report.categories[0].selected, 0);
    assert_eq!(report.categories[0].chunks, 0);
    assert_eq!(
        report.message,
        "0 items updated successfully, 0 items failed to update."
    );
    assert_eq!(store.update_count(), 0);
}

#[tokio::test]
async fn test_invalid_chunk_size_rejected_before_store_access() {
    for chunk_size in [0, 501, -1] {
        let store = media_store(3, 0);
        let result = RunCoordinator::new(store.clone())
            .run(RunRequest::media(["images"]).with_options(options(chunk_size)))
            .await;

        assert!(
            matches!(result, Err(RegenError::Configuration(_))),
            "chunk size {} should be rejected",
            chunk_size
        );
        assert_eq!(store.query_count(), 0);
        assert_eq!(store.update_count(), 0);
    }
}

#[tokio::test]
async fn test_invalid_limit_and_sleep_rejected() {
    let store = media_store(1, 0);
    let coordinator = RunCoordinator::new(store.clone());

    let bad_limit = coordinator
        .run(RunRequest::media(["images"]).with_options(RawRunOptions {
            limit: -7,
            ..options(10)
        }))
        .await;
    assert!(matches!(bad_limit, Err(RegenError::Configuration(_))));

    let bad_sleep = coordinator
        .run(RunRequest::media(["images"]).with_options(RawRunOptions {
            sleep_duration: -1,
            ..options(10)
        }))
        .await;
    assert!(matches!(bad_sleep, Err(RegenError::Configuration(_))));
    assert_eq!(store.query_count(), 0);
}

#[tokio::test]
async fn test_update_failures_are_isolated_across_chunks() {
    let store = media_store(12, 0);
    for id in [2, 4, 11] {
        store.fail_updates_for(MEDIA_COLLECTION, id);
    }

    let report = RunCoordinator::new(store.clone())
        .run(RunRequest::media(["images"]).with_options(options(5)))
        .await
        .unwrap();

    assert_eq!(report.success_count, 9);
    assert_eq!(report.failure_count, 3);
    let mut failed = report.failed_ids.clone();
    failed.sort();
    assert_eq!(failed, vec![RecordId(2), RecordId(4), RecordId(11)]);
    assert_eq!(store.update_count(), 12);
    assert_eq!(
        report.message,
        "9 items updated successfully, 3 items failed to update."
    );
}

#[tokio::test]
async fn test_content_run() {
    let store = Arc::new(MemoryRecordStore::new());
    store.add_content_type(ContentTypeSchema {
        uid: "api::article.article".to_string(),
        singular_name: Some("article".to_string()),
        plural_name: Some("articles".to_string()),
        kind: ContentTypeKind::CollectionType,
    });
    for id in 1..=4 {
        store.insert("api::article.article", id, json!({ "title": format!("Post {}", id) }));
    }
    store.insert("plugin::users-permissions.user", 1, json!({ "username": "admin" }));

    let report = RunCoordinator::new(store.clone())
        .run(
            RunRequest::content(["api::article.article", "plugin::users-permissions.user"])
                .with_options(options(3)),
        )
        .await
        .unwrap();

    assert_eq!(report.success_count, 4);
    assert_eq!(report.categories[0].chunks, 2);
    assert_eq!(report.categories[1].status, CategoryStatus::Unrecognized);
    assert!(store
        .get("api::article.article", 4)
        .unwrap()
        .get(UPDATED_AT_FIELD)
        .is_some());
    assert!(store
        .get("plugin::users-permissions.user", 1)
        .unwrap()
        .get(UPDATED_AT_FIELD)
        .is_none());
}

#[tokio::test]
async fn test_unknown_content_type_is_selection_failure() {
    let store = Arc::new(MemoryRecordStore::new());

    let report = RunCoordinator::new(store)
        .run(RunRequest::content(["api::missing.missing"]).with_options(options(3)))
        .await
        .unwrap();

    assert!(matches!(
        report.categories[0].status,
        CategoryStatus::SelectionFailed(_)
    ));
    assert_eq!(report.success_count, 0);
}

#[tokio::test]
async fn test_custom_mutation() {
    let store = media_store(2, 0);

    RunCoordinator::new(store.clone())
        .with_mutation(Mutation::Set {
            field: "blurhash".to_string(),
            value: json!(null),
        })
        .run(RunRequest::media(["images"]).with_options(options(10)))
        .await
        .unwrap();

    let record = store.get(MEDIA_COLLECTION, 1).unwrap();
    assert_eq!(record.get("blurhash"), Some(&json!(null)));
    assert!(record.get(UPDATED_AT_FIELD).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_throttle_after_every_chunk() {
    let store = media_store(23, 0);
    let start = Instant::now();

    RunCoordinator::new(store)
        .run(RunRequest::media(["images"]).with_options(RawRunOptions {
            sleep_duration: 1_000,
            ..options(10)
        }))
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_millis(3_000));
}

#[tokio::test(start_paused = true)]
async fn test_final_throttle_can_be_skipped() {
    let store = media_store(23, 0);
    let start = Instant::now();

    RunCoordinator::new(store)
        .with_throttle_after_last_chunk(false)
        .run(RunRequest::media(["images"]).with_options(RawRunOptions {
            sleep_duration: 1_000,
            ..options(10)
        }))
        .await
        .unwrap();

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(2_000));
    assert!(elapsed < Duration::from_millis(3_000));
}

#[tokio::test(start_paused = true)]
async fn test_final_throttle_skipped_when_trailing_category_has_no_chunks() {
    // gifs is unrecognized; videos selects nothing from an image-only store
    for categories in [["images", "gifs"], ["images", "videos"]] {
        let store = media_store(23, 0);
        let start = Instant::now();

        let report = RunCoordinator::new(store)
            .with_throttle_after_last_chunk(false)
            .run(RunRequest::media(categories).with_options(RawRunOptions {
                sleep_duration: 1_000,
                ..options(10)
            }))
            .await
            .unwrap();

        assert_eq!(report.success_count, 23);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(2_000), "{:?}: {:?}", categories, elapsed);
        assert!(elapsed < Duration::from_millis(3_000), "{:?}: {:?}", categories, elapsed);
    }
}

#[tokio::test(start_paused = true)]
async fn test_final_throttle_kept_by_default_with_trailing_empty_category() {
    let store = media_store(23, 0);
    let start = Instant::now();

    RunCoordinator::new(store)
        .run(RunRequest::media(["images", "gifs"]).with_options(RawRunOptions {
            sleep_duration: 1_000,
            ..options(10)
        }))
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_millis(3_000));
}

#[tokio::test(start_paused = true)]
async fn test_throttle_applies_between_categories() {
    // 10 images and 5 videos at chunk size 10: one pause between the two chunks
    let store = media_store(10, 5);
    let start = Instant::now();

    RunCoordinator::new(store)
        .with_throttle_after_last_chunk(false)
        .run(RunRequest::media(["images", "gifs", "videos"]).with_options(RawRunOptions {
            sleep_duration: 1_000,
            ..options(10)
        }))
        .await
        .unwrap();

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(1_000));
    assert!(elapsed < Duration::from_millis(2_000));
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let store = media_store(5, 5);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = RunCoordinator::new(store.clone())
        .run_with_cancel(
            RunRequest::media(["images", "videos"]).with_options(options(2)),
            cancel,
        )
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.success_count, 0);
    assert!(report
        .categories
        .iter()
        .all(|c| c.status == CategoryStatus::Cancelled));
    assert_eq!(store.query_count(), 0);
}

#[tokio::test]
async fn test_cancelled_between_chunks() {
    let store = media_store(10, 4);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let report = RunCoordinator::new(store.clone())
        .with_progress_callback(move |p| {
            if p.chunk_index == 0 {
                trigger.cancel();
            }
        })
        .run_with_cancel(
            RunRequest::media(["images", "videos"]).with_options(options(4)),
            cancel,
        )
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.success_count, 4);
    assert_eq!(report.categories[0].status, CategoryStatus::Cancelled);
    assert_eq!(report.categories[0].selected, 10);
    assert_eq!(report.categories[1].status, CategoryStatus::Cancelled);
    assert_eq!(store.update_count(), 4);
}

#[tokio::test]
async fn test_metrics_are_recorded() {
    let store = media_store(7, 2);
    store.fail_queries_matching(MEDIA_COLLECTION, MediaKind::Videos.filter());
    store.fail_updates_for(MEDIA_COLLECTION, 3);

    let registry = Registry::new();
    let metrics = RegenMetrics::new(&registry).unwrap();

    RunCoordinator::new(store)
        .with_metrics(metrics.clone())
        .run(RunRequest::media(["images", "videos", "gifs"]).with_options(options(3)))
        .await
        .unwrap();

    assert_eq!(metrics.records_total("images", "success"), 6);
    assert_eq!(metrics.records_total("images", "failure"), 1);
    assert_eq!(metrics.chunks_total("images"), 3);
    assert_eq!(metrics.skipped_total("selection_failed"), 1);
    assert_eq!(metrics.skipped_total("unrecognized"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_engine_config_timeout_marks_slow_updates_failed() {
    let store = media_store(3, 0);
    store.set_update_latency(Duration::from_secs(5));
    let config = EngineConfig {
        update_timeout_ms: Some(100),
        ..Default::default()
    };

    let report = RunCoordinator::from_config(store, &config)
        .run(RunRequest::media(["images"]).with_options(options(10)))
        .await
        .unwrap();

    assert_eq!(report.success_count, 0);
    assert_eq!(report.failure_count, 3);
}

#[tokio::test]
async fn test_report_serialises_for_callers() {
    let store = media_store(2, 0);
    store.fail_updates_for(MEDIA_COLLECTION, 1);

    let report = RunCoordinator::new(store)
        .with_executor(BatchExecutor::new().with_concurrency_limit(1))
        .run(RunRequest::media(["images"]).with_options(options(10)))
        .await
        .unwrap();

    let body = serde_json::to_value(&report).unwrap();
    assert_eq!(body["successCount"], json!(1));
    assert_eq!(body["failureCount"], json!(1));
    assert_eq!(body["failedIds"], json!([1]));
    assert_eq!(
        body["message"],
        json!("1 items updated successfully, 1 items failed to update.")
    );
    assert_eq!(body["categories"][0]["status"]["kind"], json!("processed"));

    let rendered: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(rendered, body);
}

#[tokio::test]
async fn test_request_from_json_body() {
    let store = media_store(4, 0);
    let request: RunRequest = serde_json::from_value(json!({
        "types": ["images"],
        "options": { "limit": -1, "chunkSize": 3, "sleepDuration": 0, "filterByText": "" }
    }))
    .unwrap();

    let report = RunCoordinator::new(store).run(request).await.unwrap();
    assert_eq!(report.success_count, 4);
    assert_eq!(report.categories[0].chunks, 2);
}
