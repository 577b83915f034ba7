//! In-memory collaborators for driving the pipeline without ffmpeg, a
//! bucket or a transcription service.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use vidscribe::adapters::{
    AudioExtractor, BlobStore, ExtractionError, JobServiceError, StoreError, TranscriptionJobs,
};
use vidscribe::core::{CancelToken, PipelineSettings, PollPolicy, Ticker, TranscriptionPipeline};
use vidscribe::domain::{JobRequest, JobSnapshot, JobStatus};

/// Writes a few bytes of "audio" and remembers where
#[derive(Default)]
pub struct FakeExtractor {
    pub fail: bool,
    pub outputs: Mutex<Vec<PathBuf>>,
}

impl FakeExtractor {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn outputs(&self) -> Vec<PathBuf> {
        self.outputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioExtractor for FakeExtractor {
    fn name(&self) -> &str {
        "fake"
    }

    async fn extract(&self, _video: &Path, audio_out: &Path) -> Result<(), ExtractionError> {
        self.outputs.lock().unwrap().push(audio_out.to_path_buf());
        // Partial output left behind, as a crashing transcoder would
        std::fs::write(audio_out, b"RIFF")?;

        if self.fail {
            return Err(ExtractionError::ToolFailed {
                tool: "ffmpeg".to_string(),
                code: 1,
                diagnostics: "Invalid data found when processing input".to_string(),
            });
        }
        Ok(())
    }
}

/// Counts uploads; can fail the first N or report the bucket missing
#[derive(Default)]
pub struct FakeStore {
    pub uploads: AtomicUsize,
    pub ensured: AtomicUsize,
    pub fail_uploads: AtomicU32,
    pub bucket_missing: bool,
    pub keys: Mutex<Vec<String>>,
}

impl FakeStore {
    pub fn without_bucket() -> Self {
        Self {
            bucket_missing: true,
            ..Self::default()
        }
    }

    pub fn failing_first(n: u32) -> Self {
        Self {
            fail_uploads: AtomicU32::new(n),
            ..Self::default()
        }
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for FakeStore {
    fn name(&self) -> &str {
        "fake"
    }

    async fn ensure_bucket(&self, _bucket: &str) -> Result<(), StoreError> {
        self.ensured.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> Result<String, StoreError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        assert!(local_path.exists(), "audio must exist while uploading");

        if self.bucket_missing {
            return Err(StoreError::BucketMissing(bucket.to_string()));
        }

        let remaining = self.fail_uploads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_uploads.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }

        self.keys.lock().unwrap().push(key.to_string());
        Ok(format!("mem://{}/{}", bucket, key))
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("https://{}.example.test/{}", bucket, key)
    }
}

/// Plays back a scripted sequence of job snapshots.
///
/// The last snapshot repeats once the script runs out.
pub struct FakeJobs {
    script: Mutex<VecDeque<JobSnapshot>>,
    last: Mutex<Option<JobSnapshot>>,
    pub reject: bool,
    /// Every status check fails in transport
    pub poll_error: bool,
    /// Fetches left to fail before the payload is returned
    pub fail_fetches: AtomicU32,
    pub payload: Vec<u8>,
    pub submitted: Mutex<Vec<JobRequest>>,
    pub polls: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl FakeJobs {
    pub fn new(script: Vec<JobSnapshot>, payload: &[u8]) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            reject: false,
            poll_error: false,
            fail_fetches: AtomicU32::new(0),
            payload: payload.to_vec(),
            submitted: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    /// SUBMITTED, IN_PROGRESS, then COMPLETED with `payload`
    pub fn completing(payload: &[u8]) -> Self {
        Self::new(
            vec![
                JobSnapshot::new(JobStatus::Submitted),
                JobSnapshot::new(JobStatus::InProgress),
                JobSnapshot::completed("mem://results/job.json"),
            ],
            payload,
        )
    }

    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::new(Vec::new(), b"")
        }
    }

    pub fn unreachable_after_submit() -> Self {
        Self {
            poll_error: true,
            ..Self::completing(HELLO_WORLD)
        }
    }

    /// Completes, but the first `n` result downloads fail
    pub fn completing_with_fetch_failures(payload: &[u8], n: u32) -> Self {
        let jobs = Self::completing(payload);
        jobs.fail_fetches.store(n, Ordering::SeqCst);
        jobs
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<JobRequest> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranscriptionJobs for FakeJobs {
    fn name(&self) -> &str {
        "fake"
    }

    async fn submit(&self, request: &JobRequest) -> Result<(), JobServiceError> {
        if self.reject {
            return Err(JobServiceError::Rejected {
                code: 400,
                message: "unsupported media format".to_string(),
            });
        }
        self.submitted.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn poll(&self, _job_name: &str) -> Result<JobSnapshot, JobServiceError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.poll_error {
            return Err(JobServiceError::Status {
                code: 503,
                message: "service unavailable".to_string(),
            });
        }

        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(snapshot) = next {
            *last = Some(snapshot);
        }
        last.clone()
            .ok_or_else(|| JobServiceError::MalformedResponse("empty script".to_string()))
    }

    async fn fetch_result(&self, _result_uri: &str) -> Result<Vec<u8>, JobServiceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let remaining = self.fail_fetches.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_fetches.store(remaining - 1, Ordering::SeqCst);
            return Err(JobServiceError::Status {
                code: 502,
                message: "bad gateway".to_string(),
            });
        }
        Ok(self.payload.clone())
    }
}

/// Returns immediately, remembering each requested delay
#[derive(Default)]
pub struct InstantTicker {
    pub waits: Mutex<Vec<Duration>>,
}

impl InstantTicker {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Ticker for InstantTicker {
    async fn wait(&self, delay: Duration) {
        self.waits.lock().unwrap().push(delay);
        tokio::task::yield_now().await;
    }
}

/// Cancels the run on the first wait, then never returns
pub struct CancellingTicker(pub CancelToken);

#[async_trait]
impl Ticker for CancellingTicker {
    async fn wait(&self, _delay: Duration) {
        self.0.cancel();
        std::future::pending::<()>().await;
    }
}

/// Scratch directory plus settings pointing the pipeline at it
pub fn settings_in(scratch: &TempDir) -> PipelineSettings {
    PipelineSettings {
        scratch_dir: Some(scratch.path().to_path_buf()),
        poll: PollPolicy {
            max_attempts: 5,
            ..PollPolicy::default()
        },
        ..PipelineSettings::default()
    }
}

pub fn pipeline(
    extractor: Arc<FakeExtractor>,
    store: Arc<FakeStore>,
    jobs: Arc<FakeJobs>,
    ticker: Arc<dyn Ticker>,
    settings: PipelineSettings,
) -> TranscriptionPipeline {
    TranscriptionPipeline::new(extractor, store, jobs, settings).with_ticker(ticker)
}

/// True when no extracted audio remains under the scratch directory
pub fn scratch_is_empty(scratch: &TempDir) -> bool {
    std::fs::read_dir(scratch.path())
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

pub const HELLO_WORLD: &[u8] = br#"{"results": {"segments": [
    {"alternatives": [{"transcript": "hello "}]},
    {"alternatives": [{"transcript": "world"}]}
]}}"#;

pub const NO_SEGMENTS: &[u8] = br#"{"results": {"segments": []}}"#;
