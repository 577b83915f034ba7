//! Command-line interface for vidscribe.
//!
//! Provides commands for transcribing videos, inspecting recorded runs,
//! checking a job on the service, and parsing result documents offline.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use uuid::Uuid;

use crate::config::{self, StorageBackend};
use crate::core::{CancelToken, RunLog};
use crate::domain::{parse_transcript, Run, RunState, StageStatus};

/// vidscribe - Transcribe the speech in video files
#[derive(Parser, Debug)]
#[command(name = "vidscribe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribe a video file
    Transcribe {
        /// Video to transcribe
        video: PathBuf,

        /// Bucket receiving the extracted audio
        bucket: String,

        /// Also write the transcript to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Language code of the speech (overrides config)
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Ask the service for the status of a job, once
    Poll {
        /// Job name printed by a previous run
        job_name: String,
    },

    /// Parse a downloaded result document
    Parse {
        /// Result JSON file
        file: PathBuf,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Transcribe {
                video,
                bucket,
                output,
                language,
            } => transcribe(video, &bucket, output, language).await,
            Commands::Status { run_id } => show_status(&run_id).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Poll { job_name } => poll_job(&job_name).await,
            Commands::Parse { file } => parse_file(file).await,
            Commands::Config => show_config(),
        }
    }
}

/// Run the full pipeline for one video
async fn transcribe(
    video: PathBuf,
    bucket: &str,
    output: Option<PathBuf>,
    language: Option<String>,
) -> Result<()> {
    let mut cfg = config::config()?.clone();
    if let Some(language) = language {
        cfg.language_code = language;
    }
    let pipeline = cfg.build_pipeline()?;

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping run");
            on_interrupt.cancel();
        }
    });

    let result = pipeline.run_with_cancel(&video, bucket, &cancel).await;
    interrupt.abort();

    let transcript = result
        .with_context(|| format!("Failed to transcribe {}", video.display()))?;

    println!("{}", transcript);

    if let Some(path) = output {
        tokio::fs::write(&path, format!("{}\n", transcript))
            .await
            .with_context(|| format!("Failed to write transcript: {}", path.display()))?;
        eprintln!("\n[Transcript saved to {}]", path.display());
    }

    Ok(())
}

/// Show the status of a run
async fn show_status(run_id_str: &str) -> Result<()> {
    let run_id = Uuid::parse_str(run_id_str)
        .with_context(|| format!("Invalid run ID: {}", run_id_str))?;

    let runs_dir = config::config()?.runs_dir();
    if !runs_dir.join(run_id.to_string()).exists() {
        anyhow::bail!("Run not found: {}", run_id);
    }

    let run = RunLog::open(&runs_dir, run_id)
        .await?
        .load_run()
        .await?
        .with_context(|| format!("Run has no events: {}", run_id))?;

    println!("Run ID: {}", run.id);
    println!("Video: {}", run.video_path.display());
    println!("Bucket: {}", run.bucket);
    println!("State: {}", state_label(&run.state));
    println!("Started: {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }
    if let Some(ref job_name) = run.job_name {
        println!("Job: {}", job_name);
    }
    if let Some(ref status) = run.last_job_status {
        println!("Last job status: {} ({} checks)", status, run.poll_count);
    }

    println!("\nStage statuses:");
    for (stage, status) in &run.stage_statuses {
        if *status != StageStatus::Pending {
            println!("  {}: {:?}", stage, status);
        }
    }

    if run.is_running() {
        println!("\nNo outcome recorded (still running, or interrupted)");
    }

    match run.state {
        RunState::Completed { ref transcript } => println!("\nTranscript:\n{}", transcript),
        RunState::Failed { ref error, .. } => println!("\nError: {}", error),
        RunState::Running => {}
    }

    Ok(())
}

/// List recent runs, newest first
async fn list_runs(limit: usize) -> Result<()> {
    let runs_dir = config::config()?.runs_dir();

    let mut runs: Vec<Run> = Vec::new();
    for run_id in RunLog::list_runs(&runs_dir).await? {
        let log = RunLog::open(&runs_dir, run_id).await?;
        match log.load_run().await {
            Ok(Some(run)) => runs.push(run),
            Ok(None) => {}
            Err(e) => warn!(%run_id, error = %e, "Skipping unreadable run"),
        }
    }

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));

    println!("{:<38} {:<12} {:<20} {:<30}", "RUN ID", "STATE", "BUCKET", "VIDEO");
    println!("{}", "-".repeat(100));

    for run in runs.into_iter().take(limit) {
        let video = run
            .video_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!(
            "{:<38} {:<12} {:<20} {:<30}",
            run.id,
            state_label(&run.state),
            run.bucket,
            video
        );
    }

    Ok(())
}

/// Check a job once without waiting
async fn poll_job(job_name: &str) -> Result<()> {
    let cfg = config::config()?;
    let snapshot = cfg
        .job_client()
        .poll(job_name)
        .await
        .with_context(|| format!("Failed to poll job '{}'", job_name))?;

    println!("Job: {}", job_name);
    println!("Status: {}", snapshot.status);
    if let Some(uri) = snapshot.result_uri {
        println!("Result: {}", uri);
    }
    if let Some(reason) = snapshot.failure_reason {
        println!("Failure reason: {}", reason);
    }

    Ok(())
}

/// Parse a result document from disk
async fn parse_file(file: PathBuf) -> Result<()> {
    let payload = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read result file: {}", file.display()))?;

    let transcript = parse_transcript(&payload)
        .with_context(|| format!("Failed to parse result file: {}", file.display()))?;

    println!("{}", transcript);
    Ok(())
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("vidscribe configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home (engine state): {}", cfg.home.display());
    println!("  Runs:                {}", cfg.runs_dir().display());
    if let Some(ref scratch) = cfg.scratch_dir {
        println!("  Scratch audio:       {}", scratch.display());
    }
    println!();
    println!("Extractor:");
    println!("  ffmpeg:  {}", cfg.ffmpeg_path);
    println!("  Timeout: {}s", cfg.extractor_timeout.as_secs());
    println!();
    println!("Storage:");
    match cfg.storage_backend {
        StorageBackend::Local => {
            println!("  Backend: local");
            println!("  Root:    {}", cfg.storage_root.display());
        }
        StorageBackend::S3 => {
            println!("  Backend: s3");
            println!("  Region:  {}", cfg.region);
            if let Some(ref endpoint) = cfg.storage_endpoint {
                println!("  Endpoint: {}", endpoint);
            }
            println!(
                "  Credentials: {}",
                if cfg.storage_credentials.is_some() { "(set)" } else { "(AWS environment)" }
            );
        }
    }
    println!("  Auto-create bucket: {}", cfg.auto_create_bucket);
    println!();
    println!("Transcription service:");
    println!("  Endpoint: {}", cfg.jobs_endpoint);
    println!(
        "  Token:    {}",
        if cfg.jobs_token.is_some() { "(set)" } else { "(none)" }
    );
    println!("  Language: {}", cfg.language_code);
    println!("  Format:   {}", cfg.media_format);
    println!();
    println!("Polling:");
    println!("  Interval:     {}s", cfg.poll.interval_seconds);
    println!("  Max attempts: {}", cfg.poll.max_attempts);
    println!("  Max wait:     {}s", cfg.poll.max_wait().as_secs());
    println!();
    println!("Retries:");
    println!("  Upload: {} attempt(s)", cfg.upload_retry.max_attempts);
    println!("  Fetch:  {} attempt(s)", cfg.fetch_retry.max_attempts);

    Ok(())
}

fn state_label(state: &RunState) -> &'static str {
    match state {
        RunState::Running => "running",
        RunState::Completed { .. } => "completed",
        RunState::Failed { .. } => "failed",
    }
}
