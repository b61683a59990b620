//! Error taxonomy for job submission and tracking

use std::time::Duration;
use thiserror::Error;

/// Failures at the boundary with the analysis backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("backend error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Human-readable message without the status prefix
    pub fn message(&self) -> String {
        match self {
            BackendError::Http { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

/// Terminal errors for a job, surfaced to the presentation layer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    /// The job could not be started
    #[error("could not start analysis: {0}")]
    Submission(String),

    /// A status check failed or the backend reported `failed`
    #[error("analysis failed: {0}")]
    Polling(String),

    #[error("analysis task {0} was not found")]
    TaskNotFound(String),

    #[error("analysis took too long (gave up after {} minutes)", .waited.as_secs() / 60)]
    Timeout { waited: Duration },
}

impl JobError {
    pub const GENERIC_FAILURE: &'static str = "Analysis failed";

    /// Message shown to the user
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn from_status_check(task_id: &str, err: BackendError) -> Self {
        match err {
            BackendError::TaskNotFound(_) => JobError::TaskNotFound(task_id.to_string()),
            other => JobError::Polling(other.message()),
        }
    }

    pub fn from_failed_status(message: Option<String>) -> Self {
        match message {
            Some(m) if !m.trim().is_empty() => JobError::Polling(m),
            _ => JobError::Polling(Self::GENERIC_FAILURE.to_string()),
        }
    }
}
