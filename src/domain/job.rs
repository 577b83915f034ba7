//! Transcription job types.
//!
//! The job itself lives on the external transcription service; these types
//! describe what the pipeline submits and what it observes while polling.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a transcription job as observed through `poll`.
///
/// The service reports status as a loose string. Known spellings map onto
/// the four lifecycle states; anything else is kept verbatim in `Unknown`
/// so the orchestrator can fail loudly instead of polling forever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted by the service, not yet started
    Submitted,

    /// Being transcribed
    InProgress,

    /// Finished; a result URI is available
    Completed,

    /// Finished unsuccessfully
    Failed,

    /// A status string this client does not recognise
    Unknown(String),
}

impl JobStatus {
    /// Map a raw service status string onto the lifecycle
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SUBMITTED" | "QUEUED" | "PENDING" => Self::Submitted,
            "IN_PROGRESS" | "RUNNING" | "PROCESSING" => Self::InProgress,
            "COMPLETED" | "SUCCEEDED" => Self::Completed,
            "FAILED" | "ERROR" => Self::Failed,
            _ => Self::Unknown(raw.to_string()),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => write!(f, "SUBMITTED"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

/// Result of a single status check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub status: JobStatus,

    /// Location of the transcript document (COMPLETED only)
    pub result_uri: Option<String>,

    /// Reason reported by the service (FAILED only, if given)
    pub failure_reason: Option<String>,
}

impl JobSnapshot {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            result_uri: None,
            failure_reason: None,
        }
    }

    pub fn completed(result_uri: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Completed,
            result_uri: Some(result_uri.into()),
            failure_reason: None,
        }
    }

    pub fn failed(reason: Option<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            result_uri: None,
            failure_reason: reason,
        }
    }
}

/// Everything the service needs to start a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_name: String,
    pub media_uri: String,
    pub media_format: String,
    pub language_code: String,
}

/// Generate a job name unique per invocation.
///
/// Format: `{prefix}-{unix millis}-{8 hex chars}`. The random suffix keeps
/// concurrent runs started in the same millisecond apart.
pub fn generate_job_name(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, millis, &suffix[..8])
}
