//! Configuration for vidscribe.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (VIDSCRIBE_HOME, VIDSCRIBE_FFMPEG, ...)
//! 2. Config file (.vidscribe/config.yaml)
//! 3. Defaults (~/.vidscribe, local storage, fixed 10s polling)
//!
//! Config file discovery:
//! - Searches current directory and parents for .vidscribe/config.yaml
//! - Relative paths in the config file are resolved against the directory
//!   containing `.vidscribe/`

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::{
    AudioExtractor, BlobStore, FfmpegExtractor, HttpJobClient, LocalBlobStore, S3BlobStore,
    TranscriptionJobs,
};
use crate::core::{PipelineSettings, PollPolicy, RetryPolicy, TranscriptionPipeline};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    pub home: Option<String>,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub polling: Option<PollPolicy>,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractorConfig {
    pub ffmpeg_path: Option<String>,
    pub timeout_seconds: Option<u64>,
    /// Parent directory for extracted audio
    pub scratch_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    pub backend: Option<StorageBackend>,
    /// Root directory of the local backend
    pub root: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    /// Static S3 credentials (the standard AWS environment otherwise)
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub auto_create_bucket: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionConfig {
    pub endpoint: Option<String>,
    pub api_token: Option<String>,
    pub language_code: Option<String>,
    pub media_format: Option<String>,
    pub job_name_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryConfig {
    pub upload: Option<RetryPolicy>,
    pub fetch: Option<RetryPolicy>,
}

/// Object storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Buckets are directories on the local filesystem
    Local,

    /// Amazon S3 or an S3-compatible endpoint
    S3,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "s3" => Ok(Self::S3),
            other => anyhow::bail!("Unknown storage backend '{}' (expected local or s3)", other),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state directory (run logs)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub ffmpeg_path: String,
    pub extractor_timeout: Duration,
    pub scratch_dir: Option<PathBuf>,
    pub storage_backend: StorageBackend,
    pub storage_root: PathBuf,
    pub region: String,
    pub storage_endpoint: Option<String>,
    /// Access key id and secret for S3
    pub storage_credentials: Option<(String, String)>,
    pub auto_create_bucket: bool,
    pub jobs_endpoint: String,
    pub jobs_token: Option<String>,
    pub language_code: String,
    pub media_format: String,
    pub job_name_prefix: String,
    pub poll: PollPolicy,
    pub upload_retry: RetryPolicy,
    pub fetch_retry: RetryPolicy,
}

impl ResolvedConfig {
    /// Directory holding one subdirectory per run
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            auto_create_bucket: self.auto_create_bucket,
            language_code: self.language_code.clone(),
            media_format: self.media_format.clone(),
            job_name_prefix: self.job_name_prefix.clone(),
            poll: self.poll.clone(),
            upload_retry: self.upload_retry.clone(),
            fetch_retry: self.fetch_retry.clone(),
            scratch_dir: self.scratch_dir.clone(),
        }
    }

    pub fn extractor(&self) -> Arc<dyn AudioExtractor> {
        Arc::new(
            FfmpegExtractor::with_binary_path(self.ffmpeg_path.clone())
                .with_timeout(self.extractor_timeout),
        )
    }

    pub fn blob_store(&self) -> Result<Arc<dyn BlobStore>> {
        match self.storage_backend {
            StorageBackend::Local => {
                let store = LocalBlobStore::new(&self.storage_root).with_context(|| {
                    format!("Failed to open storage root: {}", self.storage_root.display())
                })?;
                Ok(Arc::new(store))
            }
            StorageBackend::S3 => {
                let mut store = S3BlobStore::new(self.region.clone());
                if let Some(ref endpoint) = self.storage_endpoint {
                    store = store.with_endpoint(endpoint.clone());
                }
                if let Some((ref key, ref secret)) = self.storage_credentials {
                    store = store.with_credentials(key.clone(), secret.clone());
                }
                Ok(Arc::new(store))
            }
        }
    }

    pub fn job_client(&self) -> Arc<dyn TranscriptionJobs> {
        Arc::new(HttpJobClient::new(
            self.jobs_endpoint.clone(),
            self.jobs_token.clone(),
        ))
    }

    /// Wire the real adapters into a pipeline that records runs under home
    pub fn build_pipeline(&self) -> Result<TranscriptionPipeline> {
        Ok(TranscriptionPipeline::new(
            self.extractor(),
            self.blob_store()?,
            self.job_client(),
            self.pipeline_settings(),
        )
        .with_run_log(self.runs_dir()))
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".vidscribe").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse config file content
pub fn parse_config(content: &str) -> Result<ConfigFile> {
    Ok(serde_yaml::from_str(content)?)
}

/// Resolve a path that may be relative to the config file's project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Merge a config file (if any) with environment overrides and defaults.
///
/// `env` looks up a variable by name; injected so tests need not touch the
/// process environment.
fn resolve(
    file: Option<(&Path, ConfigFile)>,
    env: &dyn Fn(&str) -> Option<String>,
    default_home: PathBuf,
) -> Result<ResolvedConfig> {
    // Project root is the parent of .vidscribe/
    let base_dir = file
        .as_ref()
        .and_then(|(path, _)| path.parent())
        .and_then(|p| p.parent())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let config_file = file.as_ref().map(|(path, _)| path.to_path_buf());
    let file = file.map(|(_, f)| f).unwrap_or_default();

    let home = env("VIDSCRIBE_HOME")
        .map(PathBuf::from)
        .or_else(|| file.home.as_deref().map(|h| resolve_path(&base_dir, h)))
        .unwrap_or(default_home);

    let storage_backend = match env("VIDSCRIBE_STORAGE") {
        Some(value) => value.parse()?,
        None => file.storage.backend.unwrap_or(StorageBackend::Local),
    };

    let storage_root = file
        .storage
        .root
        .as_deref()
        .map(|r| resolve_path(&base_dir, r))
        .unwrap_or_else(|| home.join("buckets"));

    let poll = file.polling.unwrap_or_default();
    if poll.max_attempts == 0 {
        anyhow::bail!("polling.max_attempts must be at least 1");
    }

    Ok(ResolvedConfig {
        config_file,
        ffmpeg_path: env("VIDSCRIBE_FFMPEG")
            .or(file.extractor.ffmpeg_path)
            .unwrap_or_else(|| "ffmpeg".to_string()),
        extractor_timeout: Duration::from_secs(file.extractor.timeout_seconds.unwrap_or(600)),
        scratch_dir: file
            .extractor
            .scratch_dir
            .as_deref()
            .map(|d| resolve_path(&base_dir, d)),
        storage_backend,
        storage_root,
        region: env("AWS_REGION")
            .or(file.storage.region)
            .unwrap_or_else(|| "us-west-2".to_string()),
        storage_endpoint: file.storage.endpoint,
        storage_credentials: file
            .storage
            .access_key_id
            .zip(file.storage.secret_access_key),
        auto_create_bucket: file.storage.auto_create_bucket.unwrap_or(true),
        jobs_endpoint: env("VIDSCRIBE_JOBS_URL")
            .or(file.transcription.endpoint)
            .unwrap_or_else(|| "http://127.0.0.1:8080".to_string()),
        jobs_token: env("VIDSCRIBE_JOBS_TOKEN").or(file.transcription.api_token),
        language_code: file
            .transcription
            .language_code
            .unwrap_or_else(|| "en-US".to_string()),
        media_format: file
            .transcription
            .media_format
            .unwrap_or_else(|| "wav".to_string()),
        job_name_prefix: file
            .transcription
            .job_name_prefix
            .unwrap_or_else(|| "transcription".to_string()),
        poll,
        upload_retry: file.retry.upload.unwrap_or_default(),
        fetch_retry: file.retry.fetch.unwrap_or_default(),
        home,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".vidscribe");

    let config_path = find_config_file();
    let file = match config_path {
        Some(ref path) => Some((path.as_path(), load_config_file(path)?)),
        None => None,
    };

    resolve(file, &|name| std::env::var(name).ok(), default_home)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}
