//! Domain types for the transcription pipeline.
//!
//! This module contains the core data structures:
//! - Job: Transcription job requests, status and snapshots
//! - Transcript: Result payload parsing and the final text
//! - Events / Run: The append-only run log and its replayed state

pub mod events;
pub mod job;
pub mod run;
pub mod transcript;

// Re-export commonly used types
pub use events::{Event, EventType, Stage, StageStatus};
pub use job::{generate_job_name, JobRequest, JobSnapshot, JobStatus};
pub use run::{Run, RunState};
pub use transcript::{parse_transcript, ParseError, Transcript, NO_SPEECH_SENTINEL};
