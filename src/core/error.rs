//! Pipeline error taxonomy.
//!
//! Every variant names the stage that failed, so callers can decide what to
//! retry: extraction and submission need different input, while transport
//! failures during upload, status checks and fetch are worth retrying as-is.

use thiserror::Error;

use crate::adapters::{ExtractionError, JobServiceError, StoreError};
use crate::domain::{JobStatus, ParseError, Stage};

/// Failure of a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("audio extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("upload failed: {0}")]
    Upload(#[from] StoreError),

    #[error("job submission failed: {0}")]
    Submission(#[source] JobServiceError),

    /// Transport failure while checking status (not a FAILED job)
    #[error("status check for job '{job_name}' failed: {source}")]
    Poll {
        job_name: String,
        #[source]
        source: JobServiceError,
    },

    #[error("transcription job '{}' failed: {}", .job_name, .reason.as_deref().unwrap_or("no reason given"))]
    JobFailed {
        job_name: String,
        reason: Option<String>,
    },

    #[error("transcription job '{job_name}' reported unexpected status '{status}'")]
    UnexpectedStatus { job_name: String, status: String },

    #[error("transcription job '{job_name}' still {last_status} after {attempts} status checks")]
    Timeout {
        job_name: String,
        attempts: u32,
        last_status: JobStatus,
    },

    #[error("transcript fetch failed: {0}")]
    Fetch(#[source] JobServiceError),

    #[error("transcript parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("run cancelled during {stage}")]
    Cancelled { stage: Stage },
}

impl PipelineError {
    /// Stage at which the run stopped
    pub fn stage(&self) -> Stage {
        match self {
            Self::Extraction(_) => Stage::Extract,
            Self::Upload(_) => Stage::Upload,
            Self::Submission(_) => Stage::Submit,
            Self::Poll { .. }
            | Self::JobFailed { .. }
            | Self::UnexpectedStatus { .. }
            | Self::Timeout { .. } => Stage::Poll,
            Self::Fetch(_) => Stage::Fetch,
            Self::Parse(_) => Stage::Parse,
            Self::Cancelled { stage } => *stage,
        }
    }

    /// Transient failures a caller may retry with the same inputs
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Upload(e) => e.is_transient(),
            Self::Poll { .. } | Self::Timeout { .. } | Self::Fetch(_) => true,
            _ => false,
        }
    }
}
