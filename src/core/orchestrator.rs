//! Transcription pipeline orchestrator.
//!
//! Sequences extraction, upload, job submission, polling, fetch and parse
//! for one video, recording each stage in the run log and removing the
//! extracted audio before returning on every path.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use tempfile::TempDir;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{AudioExtractor, BlobStore, JobServiceError, StoreError, TranscriptionJobs};
use crate::domain::{
    generate_job_name, parse_transcript, Event, EventType, JobRequest, JobStatus, Stage,
    Transcript,
};

use super::error::PipelineError;
use super::policy::{PollPolicy, RetryPolicy};
use super::run_log::RunLog;
use super::ticker::{CancelToken, Ticker, TokioTicker};

/// Tunables that differ between deployments
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Call `ensure_bucket` before uploading
    pub auto_create_bucket: bool,

    pub language_code: String,

    pub media_format: String,

    /// Prefix of generated job names
    pub job_name_prefix: String,

    pub poll: PollPolicy,

    pub upload_retry: RetryPolicy,

    pub fetch_retry: RetryPolicy,

    /// Parent directory for extracted audio (system temp dir if unset)
    pub scratch_dir: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            auto_create_bucket: true,
            language_code: "en-US".to_string(),
            media_format: "wav".to_string(),
            job_name_prefix: "transcription".to_string(),
            poll: PollPolicy::default(),
            upload_retry: RetryPolicy::none(),
            fetch_retry: RetryPolicy::none(),
            scratch_dir: None,
        }
    }
}

/// Extracted audio file, removed when closed or dropped
struct ScratchAudio {
    dir: TempDir,
    path: PathBuf,
}

impl ScratchAudio {
    fn create(parent: Option<&Path>, video: &Path) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("vidscribe-");
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };

        let stem = video
            .file_stem()
            .map(|s| object_key_safe(&s.to_string_lossy()))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "audio".to_string());
        let path = dir.path().join(format!("{}.wav", stem));

        Ok(Self { dir, path })
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn close(self) {
        let dir = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(path = %dir.display(), error = %e, "Failed to remove extracted audio");
        }
    }
}

/// Replace characters object keys would need to escape
fn object_key_safe(stem: &str) -> String {
    stem.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

/// Per-run bookkeeping
struct RunContext {
    run_id: Uuid,
    log: Option<RunLog>,

    /// Set once generated; attached to every later event
    job_name: OnceLock<String>,
}

impl RunContext {
    async fn record(&self, event: Event) {
        if let Some(ref log) = self.log {
            log.record(event).await;
        }
    }

    fn event(&self, stage: Option<Stage>, event_type: EventType, summary: String) -> Event {
        let event = Event::new(self.run_id, stage, event_type, summary);
        match self.job_name.get() {
            Some(job_name) => event.with_job_name(job_name.as_str()),
            None => event,
        }
    }
}

/// Video-to-text pipeline over injected collaborators
pub struct TranscriptionPipeline {
    extractor: Arc<dyn AudioExtractor>,
    store: Arc<dyn BlobStore>,
    jobs: Arc<dyn TranscriptionJobs>,
    ticker: Arc<dyn Ticker>,
    settings: PipelineSettings,

    /// Where run logs are written (none: no run log)
    runs_dir: Option<PathBuf>,
}

impl TranscriptionPipeline {
    pub fn new(
        extractor: Arc<dyn AudioExtractor>,
        store: Arc<dyn BlobStore>,
        jobs: Arc<dyn TranscriptionJobs>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            extractor,
            store,
            jobs,
            ticker: Arc::new(TokioTicker),
            settings,
            runs_dir: None,
        }
    }

    /// Replace the real-time ticker used between status checks
    pub fn with_ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = ticker;
        self
    }

    /// Record every run under `runs_dir`
    pub fn with_run_log(mut self, runs_dir: impl Into<PathBuf>) -> Self {
        self.runs_dir = Some(runs_dir.into());
        self
    }

    /// Transcribe a video, uploading its audio to `bucket`
    pub async fn run(&self, video: &Path, bucket: &str) -> Result<Transcript, PipelineError> {
        self.run_with_cancel(video, bucket, &CancelToken::new()).await
    }

    /// Like [`run`](Self::run), stopping early once `cancel` fires.
    ///
    /// A job already submitted keeps running on the service.
    #[instrument(skip(self, video, cancel), fields(video = %video.display()))]
    pub async fn run_with_cancel(
        &self,
        video: &Path,
        bucket: &str,
        cancel: &CancelToken,
    ) -> Result<Transcript, PipelineError> {
        let ctx = self.open_context().await;
        info!(
            run_id = %ctx.run_id,
            bucket,
            extractor = self.extractor.name(),
            store = self.store.name(),
            jobs = self.jobs.name(),
            "Starting transcription run"
        );
        ctx.record(
            ctx.event(
                None,
                EventType::RunStarted,
                format!("Transcribing {}", video.display()),
            )
            .with_source(video, bucket),
        )
        .await;

        let result = match ScratchAudio::create(self.settings.scratch_dir.as_deref(), video) {
            Ok(scratch) => {
                let result = self.execute(&ctx, video, bucket, &scratch, cancel).await;
                scratch.close();
                result
            }
            Err(e) => Err(PipelineError::Extraction(e.into())),
        };

        match result {
            Ok(ref transcript) => {
                info!(run_id = %ctx.run_id, speech = transcript.has_speech(), "Run completed");
                ctx.record(ctx.event(None, EventType::RunCompleted, transcript.to_string()))
                    .await;
            }
            Err(ref e) => {
                error!(run_id = %ctx.run_id, stage = %e.stage(), error = %e, "Run failed");
                ctx.record(
                    ctx.event(Some(e.stage()), EventType::RunFailed, format!("Run failed: {}", e))
                        .with_error(e.to_string()),
                )
                .await;
            }
        }

        result
    }

    async fn open_context(&self) -> RunContext {
        let run_id = Uuid::new_v4();
        let log = match self.runs_dir {
            Some(ref dir) => match RunLog::open(dir, run_id).await {
                Ok(log) => Some(log),
                Err(e) => {
                    warn!(%run_id, error = %e, "Run log unavailable");
                    None
                }
            },
            None => None,
        };

        RunContext {
            run_id,
            log,
            job_name: OnceLock::new(),
        }
    }

    async fn execute(
        &self,
        ctx: &RunContext,
        video: &Path,
        bucket: &str,
        scratch: &ScratchAudio,
        cancel: &CancelToken,
    ) -> Result<Transcript, PipelineError> {
        let audio = scratch.path.as_path();

        checkpoint(cancel, Stage::Extract)?;
        self.stage(ctx, Stage::Extract, async {
            self.extractor
                .extract(video, audio)
                .await
                .map_err(PipelineError::from)
        })
        .await?;

        let job_name = generate_job_name(&self.settings.job_name_prefix);
        let _ = ctx.job_name.set(job_name.clone());
        let key = format!("audio/{}/{}", job_name, scratch.file_name());

        checkpoint(cancel, Stage::Upload)?;
        let media_uri = self
            .stage(ctx, Stage::Upload, async {
                if self.settings.auto_create_bucket {
                    self.store.ensure_bucket(bucket).await?;
                }
                let store = &self.store;
                let key = key.as_str();
                let uri = self
                    .with_retry(
                        Stage::Upload,
                        &self.settings.upload_retry,
                        StoreError::is_transient,
                        move || store.upload(audio, bucket, key),
                    )
                    .await?;
                Ok::<_, PipelineError>(uri)
            })
            .await?;
        debug!(%media_uri, "Audio uploaded");

        checkpoint(cancel, Stage::Submit)?;
        let request = JobRequest {
            job_name: job_name.clone(),
            media_uri,
            media_format: self.settings.media_format.clone(),
            language_code: self.settings.language_code.clone(),
        };
        self.stage(ctx, Stage::Submit, async {
            self.jobs
                .submit(&request)
                .await
                .map_err(PipelineError::Submission)
        })
        .await?;
        info!(%job_name, "Transcription job submitted");

        let result_uri = self
            .stage(ctx, Stage::Poll, self.wait_for_job(ctx, &job_name, cancel))
            .await?;

        checkpoint(cancel, Stage::Fetch)?;
        let payload = self
            .stage(ctx, Stage::Fetch, async {
                let jobs = &self.jobs;
                let uri = result_uri.as_str();
                self.with_retry(
                    Stage::Fetch,
                    &self.settings.fetch_retry,
                    |_: &JobServiceError| true,
                    move || jobs.fetch_result(uri),
                )
                .await
                .map_err(PipelineError::Fetch)
            })
            .await?;

        self.stage(ctx, Stage::Parse, async {
            parse_transcript(&payload).map_err(PipelineError::from)
        })
        .await
    }

    /// Poll until the job is terminal, the attempt budget runs out, or the
    /// run is cancelled. Returns the result URI of a completed job.
    async fn wait_for_job(
        &self,
        ctx: &RunContext,
        job_name: &str,
        cancel: &CancelToken,
    ) -> Result<String, PipelineError> {
        let policy = &self.settings.poll;
        let mut last_status = JobStatus::Submitted;

        for attempt in 1..=policy.max_attempts {
            let delay = policy.delay_for_attempt(attempt);
            tokio::select! {
                _ = self.ticker.wait(delay) => {}
                _ = cancel.cancelled() => {
                    warn!(job_name, "Cancelled while polling; job left running on the service");
                    return Err(PipelineError::Cancelled { stage: Stage::Poll });
                }
            }

            let snapshot = self
                .jobs
                .poll(job_name)
                .await
                .map_err(|source| PipelineError::Poll {
                    job_name: job_name.to_string(),
                    source,
                })?;

            debug!(job_name, attempt, status = %snapshot.status, "Polled job");
            ctx.record(
                ctx.event(
                    Some(Stage::Poll),
                    EventType::JobPolled,
                    format!("Status check {}", attempt),
                )
                .with_job_status(snapshot.status.to_string()),
            )
            .await;

            match snapshot.status {
                JobStatus::Completed => {
                    return snapshot.result_uri.ok_or_else(|| PipelineError::Poll {
                        job_name: job_name.to_string(),
                        source: JobServiceError::MalformedResponse(
                            "COMPLETED job without result URI".to_string(),
                        ),
                    });
                }
                JobStatus::Failed => {
                    return Err(PipelineError::JobFailed {
                        job_name: job_name.to_string(),
                        reason: snapshot.failure_reason,
                    });
                }
                JobStatus::Unknown(status) => {
                    return Err(PipelineError::UnexpectedStatus {
                        job_name: job_name.to_string(),
                        status,
                    });
                }
                status => last_status = status,
            }
        }

        warn!(job_name, attempts = policy.max_attempts, "Gave up waiting for job");
        Err(PipelineError::Timeout {
            job_name: job_name.to_string(),
            attempts: policy.max_attempts,
            last_status,
        })
    }

    /// Run one stage, recording start, completion and failure
    async fn stage<T, F>(&self, ctx: &RunContext, stage: Stage, work: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, PipelineError>>,
    {
        info!(%stage, "Stage started");
        ctx.record(ctx.event(Some(stage), EventType::StageStarted, format!("Stage '{}' started", stage)))
            .await;
        let started = Instant::now();

        let result = work.await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(_) => {
                ctx.record(
                    ctx.event(
                        Some(stage),
                        EventType::StageCompleted,
                        format!("Stage '{}' completed in {}ms", stage, duration_ms),
                    )
                    .with_duration(duration_ms),
                )
                .await;
            }
            Err(ref e) => {
                ctx.record(
                    ctx.event(
                        Some(stage),
                        EventType::StageFailed,
                        format!("Stage '{}' failed", stage),
                    )
                    .with_duration(duration_ms)
                    .with_error(e.to_string()),
                )
                .await;
            }
        }

        result
    }

    /// Retry `op` according to `policy` while `transient` accepts the error
    async fn with_retry<T, E, F, Fut>(
        &self,
        stage: Stage,
        policy: &RetryPolicy,
        transient: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if transient(&e) && policy.should_retry(attempt) => {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        %stage,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Stage failed, retrying"
                    );
                    self.ticker.wait(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn checkpoint(cancel: &CancelToken, stage: Stage) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled { stage })
    } else {
        Ok(())
    }
}
