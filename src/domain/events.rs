//! Event types for the run log.
//!
//! Every stage transition of a pipeline run is recorded as an immutable
//! event in an append-only log.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single event in the append-only run log.
///
/// The state of any past run can be reconstructed by replaying its events
/// in order (see [`Run::from_events`](super::Run::from_events)).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Pipeline stage (absent for run-level events)
    pub stage: Option<Stage>,

    /// Type of event
    pub event_type: EventType,

    /// Human-readable summary (NO credentials)
    pub payload_summary: String,

    /// Source video (run start)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,

    /// Destination bucket (run start)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    /// Transcription job name, once one has been generated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,

    /// Job status reported by the service (poll events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_status: Option<String>,

    /// Time taken in milliseconds (for completed stages)
    pub duration_ms: Option<u64>,

    /// Error message if failed
    pub error: Option<String>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(
        run_id: Uuid,
        stage: Option<Stage>,
        event_type: EventType,
        payload_summary: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            stage,
            event_type,
            payload_summary,
            video_path: None,
            bucket: None,
            job_name: None,
            job_status: None,
            duration_ms: None,
            error: None,
        }
    }

    /// Attach the run's inputs
    pub fn with_source(mut self, video_path: &Path, bucket: &str) -> Self {
        self.video_path = Some(video_path.to_path_buf());
        self.bucket = Some(bucket.to_string());
        self
    }

    pub fn with_job_name(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = Some(job_name.into());
        self
    }

    pub fn with_job_status(mut self, status: impl Into<String>) -> Self {
        self.job_status = Some(status.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// Types of events recorded during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    RunCompleted,
    RunFailed,
    StageStarted,
    StageCompleted,
    StageFailed,

    /// One status check against the transcription service
    JobPolled,
}

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Upload,
    Submit,
    Poll,
    Fetch,
    Parse,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Extract,
        Stage::Upload,
        Stage::Submit,
        Stage::Poll,
        Stage::Fetch,
        Stage::Parse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Upload => "upload",
            Self::Submit => "submit",
            Self::Poll => "poll",
            Self::Fetch => "fetch",
            Self::Parse => "parse",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a stage within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}
