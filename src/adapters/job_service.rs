//! HTTP client for the transcription job service.
//!
//! Endpoints:
//! - `POST {endpoint}/jobs` starts a job
//! - `GET  {endpoint}/jobs/{name}` reports its status
//!
//! Auth: optional Bearer token

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{JobServiceError, TranscriptionJobs};
use crate::domain::{JobRequest, JobSnapshot, JobStatus};

/// Job service client
pub struct HttpJobClient {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

/// Body of `POST /jobs`
#[derive(Debug, Serialize)]
struct StartJobBody<'a> {
    job_name: &'a str,
    media_uri: &'a str,
    media_format: &'a str,
    language_code: &'a str,
}

/// Body of `GET /jobs/{name}`
#[derive(Debug, Deserialize)]
pub(crate) struct JobResponse {
    status: String,
    #[serde(default)]
    transcript_uri: Option<String>,
    #[serde(default)]
    failure_reason: Option<String>,
}

impl JobResponse {
    /// Convert into a snapshot, enforcing that COMPLETED carries a result URI
    pub(crate) fn into_snapshot(self) -> Result<JobSnapshot, JobServiceError> {
        let status = JobStatus::parse(&self.status);

        match status {
            JobStatus::Completed => match self.transcript_uri {
                Some(uri) if !uri.trim().is_empty() => Ok(JobSnapshot::completed(uri)),
                _ => Err(JobServiceError::MalformedResponse(
                    "COMPLETED job without transcript_uri".to_string(),
                )),
            },
            JobStatus::Failed => Ok(JobSnapshot::failed(self.failure_reason)),
            other => Ok(JobSnapshot::new(other)),
        }
    }
}

impl HttpJobClient {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }

    fn jobs_url(&self) -> String {
        format!("{}/jobs", self.endpoint)
    }

    fn job_url(&self, job_name: &str) -> String {
        format!("{}/jobs/{}", self.endpoint, job_name)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Split a non-success response into rejection (4xx) or service error
async fn error_from_response(response: reqwest::Response) -> JobServiceError {
    let code = response.status();
    let message = response.text().await.unwrap_or_default().trim().to_string();

    if code.is_client_error() {
        JobServiceError::Rejected {
            code: code.as_u16(),
            message,
        }
    } else {
        JobServiceError::Status {
            code: code.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl TranscriptionJobs for HttpJobClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn submit(&self, request: &JobRequest) -> Result<(), JobServiceError> {
        let body = StartJobBody {
            job_name: &request.job_name,
            media_uri: &request.media_uri,
            media_format: &request.media_format,
            language_code: &request.language_code,
        };

        let response = self
            .authorize(self.client.post(self.jobs_url()))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        debug!(job_name = %request.job_name, "Job accepted");
        Ok(())
    }

    async fn poll(&self, job_name: &str) -> Result<JobSnapshot, JobServiceError> {
        let response = self
            .authorize(self.client.get(self.job_url(job_name)))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body: JobResponse = response
            .json()
            .await
            .map_err(|e| JobServiceError::MalformedResponse(e.to_string()))?;

        body.into_snapshot()
    }

    async fn fetch_result(&self, result_uri: &str) -> Result<Vec<u8>, JobServiceError> {
        if let Some(path) = result_uri.strip_prefix("file://") {
            return Ok(tokio::fs::read(path).await?);
        }

        let response = self.client.get(result_uri).send().await?;
        if response.status() != StatusCode::OK {
            return Err(JobServiceError::Status {
                code: response.status().as_u16(),
                message: format!("fetching {}", result_uri),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}
