//! WorkerState dispatch and dead-letter handling with in-memory collaborators.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use reelcast_core::models::{Priority, Task, TaskStatus, TaskType, VideoStatus};
use reelcast_core::TaskError;
use reelcast_processing::test_helpers::{
    uploaded_video, FakeTranscoder, MockStorage, MockVideoStore,
};
use reelcast_processing::VideoPipeline;
use reelcast_storage::RemoteFetcher;
use reelcast_worker::{decide_outcome, TaskHandlerContext, TaskOutcome, WorkerState};

fn task(payload: serde_json::Value, retry_count: i32) -> Task {
    let now = Utc::now();
    Task {
        id: Uuid::new_v4(),
        task_type: TaskType::VideoProcess,
        status: TaskStatus::Running,
        priority: Priority::Normal.as_i32(),
        payload,
        result: None,
        scheduled_at: now,
        started_at: Some(now),
        completed_at: None,
        retry_count,
        max_retries: 3,
        timeout_seconds: Some(900),
        created_at: now,
        updated_at: now,
    }
}

struct Fixture {
    _tmp: tempfile::TempDir,
    videos: MockVideoStore,
    storage: MockStorage,
    state: Arc<WorkerState>,
}

fn fixture(transcoder: FakeTranscoder) -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let videos = MockVideoStore::new();
    let storage = MockStorage::new();
    storage.set_file("a.mp4", b"original".to_vec());

    let pipeline = VideoPipeline::new(
        Arc::new(videos.clone()),
        Arc::new(storage.clone()),
        RemoteFetcher::new(Duration::from_secs(5)).unwrap(),
        Arc::new(transcoder),
        tmp.path().join("work"),
    );
    Fixture {
        _tmp: tmp,
        videos,
        storage,
        state: Arc::new(WorkerState::new(pipeline)),
    }
}

#[tokio::test]
async fn successful_task_returns_processed_location() {
    let f = fixture(FakeTranscoder::new());
    f.videos.insert(uploaded_video(42, "http://store/a.mp4"));

    let result = f
        .state
        .clone()
        .dispatch_task(&task(json!({ "video_id": 42 }), 0))
        .await
        .unwrap();

    assert_eq!(result["video_id"], 42);
    assert_eq!(
        result["processed_location"],
        "http://store/processed/42_processed.mp4"
    );
    assert_eq!(f.videos.get(42).unwrap().status, VideoStatus::Processed);
}

#[tokio::test]
async fn malformed_payload_is_dead_lettered_without_retry() {
    let f = fixture(FakeTranscoder::new());
    let t = task(json!({ "video_id": "not-a-number" }), 0);

    let err = f.state.clone().dispatch_task(&t).await.unwrap_err();
    let task_error = err.downcast_ref::<TaskError>().unwrap();
    assert!(!task_error.is_recoverable());
    assert_eq!(
        decide_outcome(&t, task_error.is_recoverable()),
        TaskOutcome::DeadLetter { exhausted: false }
    );

    f.state
        .clone()
        .on_dead_letter(&t, &task_error.to_string())
        .await
        .unwrap();
    assert_eq!(f.videos.calls(), 0);
}

#[tokio::test]
async fn exhausted_transcode_failures_mark_the_video_failed() {
    let f = fixture(FakeTranscoder::failing());
    f.videos.insert(uploaded_video(7, "a.mp4"));
    let t = task(json!({ "video_id": 7 }), 3);

    let err = f.state.clone().dispatch_task(&t).await.unwrap_err();
    let task_error = err.downcast_ref::<TaskError>().unwrap();
    assert!(task_error.is_recoverable());
    assert_eq!(
        decide_outcome(&t, true),
        TaskOutcome::DeadLetter { exhausted: true }
    );
    assert_eq!(f.videos.get(7).unwrap().status, VideoStatus::Uploaded);

    let reason = task_error.to_string();
    assert!(reason.starts_with("transcode: "));
    f.state.clone().on_dead_letter(&t, &reason).await.unwrap();

    let row = f.videos.get(7).unwrap();
    assert_eq!(row.status, VideoStatus::Failed);
    assert_eq!(row.failure_reason.as_deref(), Some(reason.as_str()));
    assert!(row.processed_location.is_none());
    assert_eq!(f.storage.uploads(), 0);
}

#[tokio::test]
async fn dead_letter_never_downgrades_a_processed_video() {
    let f = fixture(FakeTranscoder::new());
    f.videos.insert(uploaded_video(9, "a.mp4"));
    let t = task(json!({ "video_id": 9 }), 3);

    f.state.clone().dispatch_task(&t).await.unwrap();
    f.state
        .clone()
        .on_dead_letter(&t, "visibility timeout exceeded after final retry")
        .await
        .unwrap();

    let row = f.videos.get(9).unwrap();
    assert_eq!(row.status, VideoStatus::Processed);
    assert!(row.failure_reason.is_none());
}
