//! Pipeline Integration Tests
//!
//! End-to-end runs against in-memory collaborators: stage ordering, the
//! error taxonomy, bounded polling and removal of extracted audio.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use common::*;
use vidscribe::core::{CancelToken, PollPolicy, RetryPolicy, RunLog};
use vidscribe::domain::{JobSnapshot, JobStatus, RunState, Stage, StageStatus, Transcript};
use vidscribe::{PipelineError, NO_SPEECH_SENTINEL};

const VIDEO: &str = "/videos/talk.mp4";

#[tokio::test]
async fn test_extraction_failure_skips_upload() {
    let scratch = TempDir::new().unwrap();
    let extractor = Arc::new(FakeExtractor::failing());
    let store = Arc::new(FakeStore::default());
    let jobs = Arc::new(FakeJobs::completing(HELLO_WORLD));

    let pipeline = pipeline(
        extractor.clone(),
        store.clone(),
        jobs.clone(),
        Arc::new(InstantTicker::default()),
        settings_in(&scratch),
    );

    let err = pipeline.run(Path::new(VIDEO), "media").await.unwrap_err();

    assert!(matches!(err, PipelineError::Extraction(_)), "got {:?}", err);
    assert_eq!(err.stage(), Stage::Extract);
    assert!(!err.is_retriable());
    assert_eq!(store.upload_count(), 0);
    assert!(jobs.submitted().is_empty());

    // Partial output was written, then removed
    let outputs = extractor.outputs();
    assert_eq!(outputs.len(), 1);
    assert!(!outputs[0].exists());
    assert!(scratch_is_empty(&scratch));
}

#[tokio::test]
async fn test_submission_rejected_removes_audio() {
    let scratch = TempDir::new().unwrap();
    let extractor = Arc::new(FakeExtractor::default());
    let store = Arc::new(FakeStore::default());
    let jobs = Arc::new(FakeJobs::rejecting());

    let pipeline = pipeline(
        extractor.clone(),
        store.clone(),
        jobs.clone(),
        Arc::new(InstantTicker::default()),
        settings_in(&scratch),
    );

    let err = pipeline.run(Path::new(VIDEO), "media").await.unwrap_err();

    assert!(matches!(err, PipelineError::Submission(_)), "got {:?}", err);
    assert_eq!(err.stage(), Stage::Submit);
    assert_eq!(store.upload_count(), 1);
    assert_eq!(jobs.poll_count(), 0);
    assert!(!extractor.outputs()[0].exists());
    assert!(scratch_is_empty(&scratch));
}

#[tokio::test]
async fn test_job_completes_after_three_polls() {
    let scratch = TempDir::new().unwrap();
    let extractor = Arc::new(FakeExtractor::default());
    let store = Arc::new(FakeStore::default());
    let jobs = Arc::new(FakeJobs::completing(HELLO_WORLD));
    let ticker = Arc::new(InstantTicker::default());

    let pipeline = pipeline(
        extractor.clone(),
        store.clone(),
        jobs.clone(),
        ticker.clone(),
        settings_in(&scratch),
    );

    let transcript = pipeline.run(Path::new(VIDEO), "media").await.unwrap();

    assert_eq!(transcript, Transcript::Speech("hello world".to_string()));
    assert_eq!(transcript.to_string(), "hello world");
    assert_eq!(jobs.poll_count(), 3);
    assert_eq!(jobs.fetches.load(std::sync::atomic::Ordering::SeqCst), 1);

    // A wait precedes every status check
    assert_eq!(ticker.waits(), vec![Duration::from_secs(10); 3]);

    let submitted = jobs.submitted();
    assert_eq!(submitted.len(), 1);
    let request = &submitted[0];
    assert!(request.job_name.starts_with("transcription-"));
    assert_eq!(request.media_format, "wav");
    assert_eq!(request.language_code, "en-US");
    assert_eq!(
        request.media_uri,
        format!("mem://media/audio/{}/talk.wav", request.job_name)
    );
    assert_eq!(store.ensured.load(std::sync::atomic::Ordering::SeqCst), 1);

    assert!(!extractor.outputs()[0].exists());
    assert!(scratch_is_empty(&scratch));
}

#[tokio::test]
async fn test_failed_job_reports_reason() {
    let scratch = TempDir::new().unwrap();
    let extractor = Arc::new(FakeExtractor::default());
    let jobs = Arc::new(FakeJobs::new(
        vec![JobSnapshot::failed(Some("audio too short".to_string()))],
        b"",
    ));

    let pipeline = pipeline(
        extractor.clone(),
        Arc::new(FakeStore::default()),
        jobs.clone(),
        Arc::new(InstantTicker::default()),
        settings_in(&scratch),
    );

    let err = pipeline.run(Path::new(VIDEO), "media").await.unwrap_err();

    match err {
        PipelineError::JobFailed { ref reason, .. } => {
            assert_eq!(reason.as_deref(), Some("audio too short"));
        }
        ref other => panic!("expected JobFailed, got {:?}", other),
    }
    assert!(err.to_string().contains("audio too short"));
    assert_eq!(jobs.poll_count(), 1);
    assert!(!extractor.outputs()[0].exists());
    assert!(scratch_is_empty(&scratch));
}

#[tokio::test]
async fn test_zero_segments_yields_sentinel() {
    let scratch = TempDir::new().unwrap();
    let jobs = Arc::new(FakeJobs::new(
        vec![JobSnapshot::completed("mem://results/job.json")],
        NO_SEGMENTS,
    ));

    let pipeline = pipeline(
        Arc::new(FakeExtractor::default()),
        Arc::new(FakeStore::default()),
        jobs,
        Arc::new(InstantTicker::default()),
        settings_in(&scratch),
    );

    let transcript = pipeline.run(Path::new(VIDEO), "media").await.unwrap();

    assert_eq!(transcript, Transcript::NoSpeech);
    assert_eq!(transcript.to_string(), NO_SPEECH_SENTINEL);
    assert!(scratch_is_empty(&scratch));
}

#[tokio::test]
async fn test_polling_gives_up_after_max_attempts() {
    let scratch = TempDir::new().unwrap();
    let jobs = Arc::new(FakeJobs::new(vec![JobSnapshot::new(JobStatus::InProgress)], b""));
    let ticker = Arc::new(InstantTicker::default());

    let mut settings = settings_in(&scratch);
    settings.poll = PollPolicy {
        interval_seconds: 2,
        max_attempts: 4,
        ..PollPolicy::default()
    };

    let pipeline = pipeline(
        Arc::new(FakeExtractor::default()),
        Arc::new(FakeStore::default()),
        jobs.clone(),
        ticker.clone(),
        settings,
    );

    let err = pipeline.run(Path::new(VIDEO), "media").await.unwrap_err();

    match err {
        PipelineError::Timeout {
            attempts,
            ref last_status,
            ..
        } => {
            assert_eq!(attempts, 4);
            assert_eq!(*last_status, JobStatus::InProgress);
        }
        ref other => panic!("expected Timeout, got {:?}", other),
    }
    assert!(err.is_retriable());
    assert_eq!(err.stage(), Stage::Poll);
    assert_eq!(jobs.poll_count(), 4);
    assert_eq!(ticker.waits().len(), 4);
    assert!(scratch_is_empty(&scratch));
}

#[tokio::test]
async fn test_unrecognized_status_stops_polling() {
    let scratch = TempDir::new().unwrap();
    let jobs = Arc::new(FakeJobs::new(
        vec![
            JobSnapshot::new(JobStatus::InProgress),
            JobSnapshot::new(JobStatus::parse("PAUSED")),
            JobSnapshot::completed("mem://never"),
        ],
        b"",
    ));

    let pipeline = pipeline(
        Arc::new(FakeExtractor::default()),
        Arc::new(FakeStore::default()),
        jobs.clone(),
        Arc::new(InstantTicker::default()),
        settings_in(&scratch),
    );

    let err = pipeline.run(Path::new(VIDEO), "media").await.unwrap_err();

    match err {
        PipelineError::UnexpectedStatus { ref status, .. } => assert_eq!(status, "PAUSED"),
        other => panic!("expected UnexpectedStatus, got {:?}", other),
    }
    assert_eq!(jobs.poll_count(), 2);
}

#[tokio::test]
async fn test_malformed_result_is_parse_error() {
    let scratch = TempDir::new().unwrap();
    let jobs = Arc::new(FakeJobs::new(
        vec![JobSnapshot::completed("mem://results/job.json")],
        b"<html>not json</html>",
    ));

    let pipeline = pipeline(
        Arc::new(FakeExtractor::default()),
        Arc::new(FakeStore::default()),
        jobs,
        Arc::new(InstantTicker::default()),
        settings_in(&scratch),
    );

    let err = pipeline.run(Path::new(VIDEO), "media").await.unwrap_err();

    assert!(matches!(err, PipelineError::Parse(_)), "got {:?}", err);
    assert_eq!(err.stage(), Stage::Parse);
    assert!(scratch_is_empty(&scratch));
}

#[tokio::test]
async fn test_upload_retried_per_policy() {
    let scratch = TempDir::new().unwrap();
    let store = Arc::new(FakeStore::failing_first(2));
    let ticker = Arc::new(InstantTicker::default());

    let mut settings = settings_in(&scratch);
    settings.upload_retry = RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 100,
        ..RetryPolicy::default()
    };

    let pipeline = pipeline(
        Arc::new(FakeExtractor::default()),
        store.clone(),
        Arc::new(FakeJobs::completing(HELLO_WORLD)),
        ticker.clone(),
        settings,
    );

    let transcript = pipeline.run(Path::new(VIDEO), "media").await.unwrap();

    assert_eq!(transcript.as_str(), "hello world");
    assert_eq!(store.upload_count(), 3);
    // Two retry delays, then three poll waits
    let waits = ticker.waits();
    assert_eq!(waits[0], Duration::from_millis(100));
    assert_eq!(waits[1], Duration::from_millis(200));
    assert_eq!(waits.len(), 5);
}

#[tokio::test]
async fn test_upload_not_retried_by_default() {
    let scratch = TempDir::new().unwrap();
    let store = Arc::new(FakeStore::failing_first(1));
    let jobs = Arc::new(FakeJobs::completing(HELLO_WORLD));

    let pipeline = pipeline(
        Arc::new(FakeExtractor::default()),
        store.clone(),
        jobs.clone(),
        Arc::new(InstantTicker::default()),
        settings_in(&scratch),
    );

    let err = pipeline.run(Path::new(VIDEO), "media").await.unwrap_err();

    assert!(matches!(err, PipelineError::Upload(_)), "got {:?}", err);
    assert!(err.is_retriable());
    assert_eq!(store.upload_count(), 1);
    assert!(jobs.submitted().is_empty());
    assert!(scratch_is_empty(&scratch));
}

#[tokio::test]
async fn test_missing_bucket_is_not_retried() {
    let scratch = TempDir::new().unwrap();
    let store = Arc::new(FakeStore::without_bucket());
    let ticker = Arc::new(InstantTicker::default());

    let mut settings = settings_in(&scratch);
    settings.auto_create_bucket = false;
    settings.upload_retry = RetryPolicy {
        max_attempts: 3,
        ..RetryPolicy::default()
    };

    let pipeline = pipeline(
        Arc::new(FakeExtractor::default()),
        store.clone(),
        Arc::new(FakeJobs::completing(HELLO_WORLD)),
        ticker.clone(),
        settings,
    );

    let err = pipeline.run(Path::new(VIDEO), "media").await.unwrap_err();

    assert!(matches!(err, PipelineError::Upload(_)), "got {:?}", err);
    assert!(!err.is_retriable());
    assert_eq!(store.upload_count(), 1);
    assert!(ticker.waits().is_empty());
    assert!(scratch_is_empty(&scratch));
}

#[tokio::test]
async fn test_status_check_transport_error() {
    let scratch = TempDir::new().unwrap();
    let jobs = Arc::new(FakeJobs::unreachable_after_submit());

    let pipeline = pipeline(
        Arc::new(FakeExtractor::default()),
        Arc::new(FakeStore::default()),
        jobs.clone(),
        Arc::new(InstantTicker::default()),
        settings_in(&scratch),
    );

    let err = pipeline.run(Path::new(VIDEO), "media").await.unwrap_err();

    match err {
        PipelineError::Poll { ref job_name, .. } => {
            assert_eq!(job_name, &jobs.submitted()[0].job_name);
        }
        ref other => panic!("expected poll error, got {:?}", other),
    }
    assert_eq!(err.stage(), Stage::Poll);
    assert!(err.is_retriable());
    assert_eq!(jobs.poll_count(), 1);
    assert_eq!(jobs.fetch_count(), 0);
    assert!(scratch_is_empty(&scratch));
}

#[tokio::test]
async fn test_completed_without_result_uri() {
    let scratch = TempDir::new().unwrap();
    let jobs = Arc::new(FakeJobs::new(
        vec![
            JobSnapshot::new(JobStatus::InProgress),
            JobSnapshot::new(JobStatus::Completed),
        ],
        HELLO_WORLD,
    ));

    let pipeline = pipeline(
        Arc::new(FakeExtractor::default()),
        Arc::new(FakeStore::default()),
        jobs.clone(),
        Arc::new(InstantTicker::default()),
        settings_in(&scratch),
    );

    let err = pipeline.run(Path::new(VIDEO), "media").await.unwrap_err();

    assert!(matches!(err, PipelineError::Poll { .. }), "got {:?}", err);
    assert!(err.to_string().contains("without result URI"), "{}", err);
    assert_eq!(jobs.poll_count(), 2);
    assert_eq!(jobs.fetch_count(), 0);
    assert!(scratch_is_empty(&scratch));
}

#[tokio::test]
async fn test_fetch_failure_removes_audio() {
    let scratch = TempDir::new().unwrap();
    let jobs = Arc::new(FakeJobs::completing_with_fetch_failures(HELLO_WORLD, 1));

    let pipeline = pipeline(
        Arc::new(FakeExtractor::default()),
        Arc::new(FakeStore::default()),
        jobs.clone(),
        Arc::new(InstantTicker::default()),
        settings_in(&scratch),
    );

    let err = pipeline.run(Path::new(VIDEO), "media").await.unwrap_err();

    assert!(matches!(err, PipelineError::Fetch(_)), "got {:?}", err);
    assert_eq!(err.stage(), Stage::Fetch);
    assert!(err.is_retriable());
    assert_eq!(jobs.fetch_count(), 1);
    assert!(scratch_is_empty(&scratch));
}

#[tokio::test]
async fn test_fetch_retried_per_policy() {
    let scratch = TempDir::new().unwrap();
    let jobs = Arc::new(FakeJobs::completing_with_fetch_failures(HELLO_WORLD, 1));
    let ticker = Arc::new(InstantTicker::default());

    let mut settings = settings_in(&scratch);
    settings.fetch_retry = RetryPolicy {
        max_attempts: 2,
        initial_delay_ms: 250,
        ..RetryPolicy::default()
    };

    let pipeline = pipeline(
        Arc::new(FakeExtractor::default()),
        Arc::new(FakeStore::default()),
        jobs.clone(),
        ticker.clone(),
        settings,
    );

    let transcript = pipeline.run(Path::new(VIDEO), "media").await.unwrap();

    assert_eq!(transcript.as_str(), "hello world");
    assert_eq!(jobs.fetch_count(), 2);
    // Three poll waits, then one retry delay
    let waits = ticker.waits();
    assert_eq!(waits.len(), 4);
    assert_eq!(waits[3], Duration::from_millis(250));
    assert!(scratch_is_empty(&scratch));
}

#[tokio::test]
async fn test_cancel_while_polling() {
    let scratch = TempDir::new().unwrap();
    let cancel = CancelToken::new();
    let jobs = Arc::new(FakeJobs::completing(HELLO_WORLD));

    let pipeline = pipeline(
        Arc::new(FakeExtractor::default()),
        Arc::new(FakeStore::default()),
        jobs.clone(),
        Arc::new(CancellingTicker(cancel.clone())),
        settings_in(&scratch),
    );

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        pipeline.run_with_cancel(Path::new(VIDEO), "media", &cancel),
    )
    .await
    .expect("cancelled run should return promptly")
    .unwrap_err();

    assert!(
        matches!(err, PipelineError::Cancelled { stage: Stage::Poll }),
        "got {:?}",
        err
    );
    assert_eq!(jobs.submitted().len(), 1);
    assert_eq!(jobs.poll_count(), 0);
    assert!(scratch_is_empty(&scratch));
}

#[tokio::test]
async fn test_cancel_before_start() {
    let scratch = TempDir::new().unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let extractor = Arc::new(FakeExtractor::default());

    let pipeline = pipeline(
        extractor.clone(),
        Arc::new(FakeStore::default()),
        Arc::new(FakeJobs::completing(HELLO_WORLD)),
        Arc::new(InstantTicker::default()),
        settings_in(&scratch),
    );

    let err = pipeline
        .run_with_cancel(Path::new(VIDEO), "media", &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled { stage: Stage::Extract }));
    assert!(extractor.outputs().is_empty());
    assert!(scratch_is_empty(&scratch));
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let scratch = TempDir::new().unwrap();
    let extractor = Arc::new(FakeExtractor::default());
    let store = Arc::new(FakeStore::default());
    let jobs = Arc::new(FakeJobs::new(
        vec![JobSnapshot::completed("mem://results/job.json")],
        HELLO_WORLD,
    ));

    let pipeline = Arc::new(pipeline(
        extractor.clone(),
        store.clone(),
        jobs.clone(),
        Arc::new(InstantTicker::default()),
        settings_in(&scratch),
    ));

    let first = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.run(Path::new("/videos/a.mp4"), "media").await })
    };
    let second = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.run(Path::new("/videos/b.mp4"), "media").await })
    };

    assert_eq!(first.await.unwrap().unwrap().as_str(), "hello world");
    assert_eq!(second.await.unwrap().unwrap().as_str(), "hello world");

    let submitted = jobs.submitted();
    assert_eq!(submitted.len(), 2);
    assert_ne!(submitted[0].job_name, submitted[1].job_name);

    let outputs = extractor.outputs();
    assert_eq!(outputs.len(), 2);
    assert_ne!(outputs[0], outputs[1]);
    assert!(scratch_is_empty(&scratch));
}

#[tokio::test]
async fn test_run_log_records_stages() {
    let scratch = TempDir::new().unwrap();
    let home = TempDir::new().unwrap();
    let runs_dir = home.path().join("runs");

    let pipeline = pipeline(
        Arc::new(FakeExtractor::default()),
        Arc::new(FakeStore::default()),
        Arc::new(FakeJobs::completing(HELLO_WORLD)),
        Arc::new(InstantTicker::default()),
        settings_in(&scratch),
    )
    .with_run_log(&runs_dir);

    pipeline.run(Path::new(VIDEO), "media").await.unwrap();

    let run_ids = RunLog::list_runs(&runs_dir).await.unwrap();
    assert_eq!(run_ids.len(), 1);

    let run = RunLog::open(&runs_dir, run_ids[0])
        .await
        .unwrap()
        .load_run()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        run.state,
        RunState::Completed {
            transcript: "hello world".to_string()
        }
    );
    assert_eq!(run.video_path, Path::new(VIDEO));
    assert_eq!(run.bucket, "media");
    assert_eq!(run.poll_count, 3);
    assert_eq!(run.last_job_status.as_deref(), Some("COMPLETED"));
    assert!(run.job_name.as_ref().unwrap().starts_with("transcription-"));
    for stage in Stage::ALL {
        assert_eq!(run.stage_status(stage), StageStatus::Completed, "{}", stage);
    }
}

#[tokio::test]
async fn test_run_log_records_failure_stage() {
    let scratch = TempDir::new().unwrap();
    let home = TempDir::new().unwrap();

    let pipeline = pipeline(
        Arc::new(FakeExtractor::default()),
        Arc::new(FakeStore::default()),
        Arc::new(FakeJobs::rejecting()),
        Arc::new(InstantTicker::default()),
        settings_in(&scratch),
    )
    .with_run_log(home.path());

    pipeline.run(Path::new(VIDEO), "media").await.unwrap_err();

    let run_ids = RunLog::list_runs(home.path()).await.unwrap();
    let run = RunLog::open(home.path(), run_ids[0])
        .await
        .unwrap()
        .load_run()
        .await
        .unwrap()
        .unwrap();

    match run.state {
        RunState::Failed { stage, ref error } => {
            assert_eq!(stage, Some(Stage::Submit));
            assert!(error.contains("unsupported media format"));
        }
        ref other => panic!("expected failed run, got {:?}", other),
    }
    assert_eq!(run.stage_status(Stage::Upload), StageStatus::Completed);
    assert_eq!(run.stage_status(Stage::Submit), StageStatus::Failed);
    assert_eq!(run.stage_status(Stage::Poll), StageStatus::Pending);
}
