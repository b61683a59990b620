//! HTTP client for the analysis job API

use crate::backend::AnalysisBackend;
use crate::error::BackendError;
use crate::types::{JobStatusResponse, SubmitResponse, Upload};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// FastAPI-style error body
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    /// Create a new client for `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Create a client whose requests give up after `timeout`
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Health check
    pub async fn health_check(&self) -> Result<bool, BackendError> {
        let url = format!("{}/", self.base_url);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    async fn error_from_response(response: reqwest::Response) -> BackendError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        BackendError::Http {
            status: status.as_u16(),
            message: error_message(status, &body),
        }
    }
}

/// Pull the human-readable message out of an error response body
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return match parsed.detail {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status.to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl AnalysisBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn submit_job(&self, upload: &Upload) -> Result<SubmitResponse, BackendError> {
        let url = format!("{}/run-pipeline", self.base_url);
        debug!("Submitting {} ({} bytes) to {}", upload.file_name, upload.bytes.len(), url);

        let part = Part::bytes(upload.bytes.clone())
            .file_name(upload.file_name.clone())
            .mime_str("text/csv")?;
        let form = Form::new().part("file", part);

        let response = self.client.post(&url).multipart(form).send().await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        debug!("Backend accepted upload as task {}", submitted.task_id);

        Ok(submitted)
    }

    async fn get_job_status(&self, task_id: &str) -> Result<JobStatusResponse, BackendError> {
        let url = format!(
            "{}/pipeline-status/{}",
            self.base_url,
            urlencoding::encode(task_id)
        );

        debug!("Fetching job status from {}", url);

        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(BackendError::TaskNotFound(task_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let status: JobStatusResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        debug!("Task {} is {}", task_id, status.status);

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_unwraps_detail() {
        let msg = error_message(
            StatusCode::BAD_REQUEST,
            r#"{"detail": "Invalid file type. Please upload a CSV file."}"#,
        );
        assert_eq!(msg, "Invalid file type. Please upload a CSV file.");
    }

    #[test]
    fn test_error_message_falls_back_to_body_then_status() {
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, "upstream down\n"), "upstream down");
        assert_eq!(
            error_message(StatusCode::INTERNAL_SERVER_ERROR, ""),
            "500 Internal Server Error"
        );
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let backend = HttpBackend::new("http://127.0.0.1:8000/");
        assert_eq!(backend.base_url(), "http://127.0.0.1:8000");
    }

    #[tokio::test]
    #[ignore] // Requires running analysis API
    async fn test_http_backend_integration() {
        let backend = HttpBackend::new("http://127.0.0.1:8000");
        let health = backend.health_check().await;
        assert!(health.is_ok());
    }
}
