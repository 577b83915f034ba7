//! Core orchestration logic.
//!
//! This module contains:
//! - Orchestrator: The transcription pipeline state machine
//! - Policy: Polling bounds and retry backoff
//! - RunLog: Append-only per-run event logging
//! - Ticker: Injected waiting and cancellation

pub mod error;
pub mod orchestrator;
pub mod policy;
pub mod run_log;
pub mod ticker;

// Re-export commonly used types
pub use error::PipelineError;
pub use orchestrator::{PipelineSettings, TranscriptionPipeline};
pub use policy::{PollPolicy, RetryPolicy};
pub use run_log::RunLog;
pub use ticker::{CancelToken, Ticker, TokioTicker};
