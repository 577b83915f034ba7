//! Adapter interfaces for external systems.
//!
//! The pipeline talks to three collaborators, each behind a trait so runs can
//! be driven against fakes in tests:
//! - [`AudioExtractor`]: media transcoder (ffmpeg)
//! - [`BlobStore`]: durable object storage for the extracted audio
//! - [`TranscriptionJobs`]: the asynchronous speech-to-text job service

pub mod blob_store;
pub mod ffmpeg;
pub mod job_service;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{JobRequest, JobSnapshot};

pub use blob_store::{LocalBlobStore, S3BlobStore};
pub use ffmpeg::FfmpegExtractor;
pub use job_service::HttpJobClient;

/// Produces a mono 16 kHz 16-bit PCM file from a video
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    /// Human-readable extractor name
    fn name(&self) -> &str;

    /// Extract the audio track of `video` into `audio_out`.
    ///
    /// The input is never modified. On error, `audio_out` may hold partial
    /// output; the caller owns its removal.
    async fn extract(&self, video: &Path, audio_out: &Path) -> Result<(), ExtractionError>;
}

/// Bucket-addressed object storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Create the bucket if absent; no-op if present
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    /// Upload a local file in a single attempt and return its URI
    async fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> Result<String, StoreError>;

    /// Publicly resolvable URL of an object
    fn public_url(&self, bucket: &str, key: &str) -> String;
}

/// Job-based speech-to-text service
#[async_trait]
pub trait TranscriptionJobs: Send + Sync {
    /// Human-readable service name
    fn name(&self) -> &str;

    /// Start a job. Must be called at most once per job name.
    async fn submit(&self, request: &JobRequest) -> Result<(), JobServiceError>;

    /// One status check; never waits
    async fn poll(&self, job_name: &str) -> Result<JobSnapshot, JobServiceError>;

    /// Download the raw result document
    async fn fetch_result(&self, result_uri: &str) -> Result<Vec<u8>, JobServiceError>;
}

/// Audio extraction failure (bad input, missing tool); not retriable
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with code {code}: {diagnostics}")]
    ToolFailed {
        tool: String,
        code: i32,
        diagnostics: String,
    },

    #[error("{tool} timed out after {seconds}s")]
    TimedOut { tool: String, seconds: u64 },

    #[error("{tool} produced no audio at {path}")]
    NoOutput { tool: String, path: String },

    #[error("failed to prepare audio output: {0}")]
    Io(#[from] std::io::Error),
}

/// Object storage failure
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket '{0}' does not exist")]
    BucketMissing(String),

    #[error("invalid bucket name '{0}'")]
    InvalidBucket(String),

    /// The service refused to create or inspect the bucket
    #[error("bucket '{bucket}' unavailable: {message}")]
    BucketRejected { bucket: String, message: String },

    #[error("object store unreachable: {0}")]
    Unreachable(String),

    #[error("object store error: {0}")]
    Backend(#[from] object_store::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether repeating the same call could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Io(_) | Self::Unreachable(_))
    }
}

/// Transcription service failure
#[derive(Debug, Error)]
pub enum JobServiceError {
    /// The service understood the request and refused it
    #[error("rejected by service ({code}): {message}")]
    Rejected { code: u16, message: String },

    #[error("service returned {code}: {message}")]
    Status { code: u16, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed service response: {0}")]
    MalformedResponse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
