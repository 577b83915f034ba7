//! vidscribe - Video-to-text transcription pipeline
//!
//! Extracts the audio track of a local video, uploads it to an object
//! store, runs an asynchronous speech-to-text job against it and returns
//! the transcript.
//!
//! # Architecture
//!
//! The pipeline is a small state machine over an external job:
//! - Stages run strictly in order: extract, upload, submit, poll, fetch, parse
//! - Every failure names its stage, so callers know what is worth retrying
//! - Extracted audio is temporary and removed on every exit path
//! - Each run is recorded as an append-only event log
//!
//! # Modules
//!
//! - `adapters`: External system integrations (ffmpeg, object store, job service)
//! - `core`: Orchestration logic (pipeline, policies, run log)
//! - `domain`: Data structures (job status, transcript, events, run)
//! - `config`: Config file and environment resolution
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Transcribe a video
//! vidscribe transcribe talk.mp4 media-bucket
//!
//! # Inspect a past run
//! vidscribe status <run-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use crate::core::{CancelToken, PipelineError, PipelineSettings, TranscriptionPipeline};
pub use domain::{JobStatus, Run, RunState, Stage, Transcript, NO_SPEECH_SENTINEL};
