//! Run state and reconstruction from events.
//!
//! A Run represents a single invocation of the transcription pipeline.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{Event, EventType, Stage, StageStatus};

/// A pipeline run as replayed from its event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Source video supplied by the caller
    pub video_path: PathBuf,

    /// Destination bucket
    pub bucket: String,

    /// Current state of the run
    pub state: RunState,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished (if applicable)
    pub completed_at: Option<DateTime<Utc>>,

    /// Transcription job name, once submitted
    pub job_name: Option<String>,

    /// Last status the service reported for the job
    pub last_job_status: Option<String>,

    /// Number of status checks performed
    pub poll_count: u32,

    /// Status of each stage
    pub stage_statuses: BTreeMap<Stage, StageStatus>,
}

impl Run {
    pub fn new(id: Uuid, video_path: PathBuf, bucket: String) -> Self {
        Self {
            id,
            video_path,
            bucket,
            state: RunState::Running,
            started_at: Utc::now(),
            completed_at: None,
            job_name: None,
            last_job_status: None,
            poll_count: 0,
            stage_statuses: BTreeMap::new(),
        }
    }

    /// Reconstruct run state from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first_event = events.first()?;

        let mut run = Self::new(first_event.run_id, PathBuf::new(), String::new());
        run.started_at = first_event.timestamp;

        for event in events {
            run.apply_event(event);
        }

        Some(run)
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &Event) {
        if let Some(ref job_name) = event.job_name {
            self.job_name = Some(job_name.clone());
        }

        match event.event_type {
            EventType::RunStarted => {
                self.state = RunState::Running;
                self.started_at = event.timestamp;
                if let Some(ref video_path) = event.video_path {
                    self.video_path = video_path.clone();
                }
                if let Some(ref bucket) = event.bucket {
                    self.bucket = bucket.clone();
                }
            }
            EventType::RunCompleted => {
                self.state = RunState::Completed {
                    transcript: event.payload_summary.clone(),
                };
                self.completed_at = Some(event.timestamp);
            }
            EventType::RunFailed => {
                self.state = RunState::Failed {
                    stage: event.stage,
                    error: event.error.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
            EventType::StageStarted => self.set_stage(event.stage, StageStatus::Running),
            EventType::StageCompleted => self.set_stage(event.stage, StageStatus::Completed),
            EventType::StageFailed => self.set_stage(event.stage, StageStatus::Failed),
            EventType::JobPolled => {
                self.poll_count += 1;
                if let Some(ref status) = event.job_status {
                    self.last_job_status = Some(status.clone());
                }
            }
        }
    }

    fn set_stage(&mut self, stage: Option<Stage>, status: StageStatus) {
        if let Some(stage) = stage {
            self.stage_statuses.insert(stage, status);
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running)
    }

    pub fn stage_status(&self, stage: Stage) -> StageStatus {
        self.stage_statuses.get(&stage).copied().unwrap_or_default()
    }
}

/// State of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    Running,

    Completed { transcript: String },

    Failed { stage: Option<Stage>, error: String },
}

impl Default for RunState {
    fn default() -> Self {
        Self::Running
    }
}
