//! Boundary with the analysis backend

use crate::error::BackendError;
use crate::types::*;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Trait for the job API the client talks to
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start a job for the uploaded file
    async fn submit_job(&self, upload: &Upload) -> Result<SubmitResponse, BackendError>;

    /// Fetch the current status of a job
    async fn get_job_status(&self, task_id: &str) -> Result<JobStatusResponse, BackendError>;
}

/// One scripted reply from [`ScriptedBackend`]
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Status(JobStatusResponse),
    NotFound,
    HttpError(u16, String),
    TransportError(String),
}

impl ScriptStep {
    pub fn pending() -> Self {
        ScriptStep::Status(JobStatusResponse::with_status(JobPhase::Pending))
    }

    pub fn processing() -> Self {
        ScriptStep::Status(JobStatusResponse::with_status(JobPhase::Processing))
    }

    pub fn done(result: RawAnalysisResult) -> Self {
        ScriptStep::Status(JobStatusResponse::done(result))
    }

    pub fn failed(message: Option<&str>) -> Self {
        ScriptStep::Status(JobStatusResponse::failed(message.map(str::to_string)))
    }

    fn into_result(self, task_id: &str) -> Result<JobStatusResponse, BackendError> {
        match self {
            ScriptStep::Status(status) => Ok(status),
            ScriptStep::NotFound => Err(BackendError::TaskNotFound(task_id.to_string())),
            ScriptStep::HttpError(status, message) => Err(BackendError::Http { status, message }),
            ScriptStep::TransportError(message) => Err(BackendError::Transport(message)),
        }
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    next_task: usize,
    submit_error: Option<String>,
    submissions: Vec<String>,
    scripts: HashMap<String, VecDeque<ScriptStep>>,
    default_script: VecDeque<ScriptStep>,
    status_calls: HashMap<String, usize>,
}

/// Scripted backend for testing.
///
/// Hands out task ids `task-1`, `task-2`, ... and replays the configured
/// status steps per task. The last step repeats once a script runs out;
/// tasks without a script answer `pending`.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    state: Mutex<ScriptState>,
    latency: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every status reply by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Status script for one task id
    pub fn with_script(self, task_id: &str, steps: Vec<ScriptStep>) -> Self {
        self.lock().scripts.insert(task_id.to_string(), steps.into());
        self
    }

    /// Status script for tasks that have no script of their own
    pub fn with_default_script(self, steps: Vec<ScriptStep>) -> Self {
        self.lock().default_script = steps.into();
        self
    }

    /// Make every submission fail with `message`
    pub fn with_submit_error(self, message: &str) -> Self {
        self.lock().submit_error = Some(message.to_string());
        self
    }

    pub fn status_calls(&self, task_id: &str) -> usize {
        self.lock().status_calls.get(task_id).copied().unwrap_or(0)
    }

    pub fn total_status_calls(&self) -> usize {
        self.lock().status_calls.values().sum()
    }

    /// File names submitted so far
    pub fn submissions(&self) -> Vec<String> {
        self.lock().submissions.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        // A panic while holding the lock only happens inside a failing test
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn next_step(&self, task_id: &str) -> ScriptStep {
        let mut state = self.lock();
        *state.status_calls.entry(task_id.to_string()).or_insert(0) += 1;

        if !state.scripts.contains_key(task_id) {
            let default = state.default_script.clone();
            state.scripts.insert(task_id.to_string(), default);
        }
        let script = state.scripts.get_mut(task_id);
        match script {
            Some(steps) if steps.len() > 1 => steps.pop_front().unwrap_or_else(ScriptStep::pending),
            Some(steps) => steps.front().cloned().unwrap_or_else(ScriptStep::pending),
            None => ScriptStep::pending(),
        }
    }
}

#[async_trait]
impl AnalysisBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn submit_job(&self, upload: &Upload) -> Result<SubmitResponse, BackendError> {
        let mut state = self.lock();
        if let Some(message) = state.submit_error.clone() {
            return Err(BackendError::Http { status: 400, message });
        }
        state.next_task += 1;
        state.submissions.push(upload.file_name.clone());
        Ok(SubmitResponse {
            task_id: format!("task-{}", state.next_task),
        })
    }

    async fn get_job_status(&self, task_id: &str) -> Result<JobStatusResponse, BackendError> {
        let step = self.next_step(task_id);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        step.into_result(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_replays_then_repeats_last_step() {
        let backend = ScriptedBackend::new().with_script(
            "task-1",
            vec![ScriptStep::pending(), ScriptStep::processing()],
        );

        let first = backend.get_job_status("task-1").await.unwrap();
        let second = backend.get_job_status("task-1").await.unwrap();
        let third = backend.get_job_status("task-1").await.unwrap();

        assert_eq!(first.status, JobPhase::Pending);
        assert_eq!(second.status, JobPhase::Processing);
        assert_eq!(third.status, JobPhase::Processing);
        assert_eq!(backend.status_calls("task-1"), 3);
    }

    #[tokio::test]
    async fn test_submit_assigns_sequential_ids() {
        let backend = ScriptedBackend::new();
        let a = backend.submit_job(&Upload::new("a.csv", "x")).await.unwrap();
        let b = backend.submit_job(&Upload::new("b.csv", "x")).await.unwrap();
        assert_eq!(a.task_id, "task-1");
        assert_eq!(b.task_id, "task-2");
        assert_eq!(backend.submissions(), vec!["a.csv", "b.csv"]);
    }

    #[tokio::test]
    async fn test_not_found_step() {
        let backend = ScriptedBackend::new().with_default_script(vec![ScriptStep::NotFound]);
        let err = backend.get_job_status("missing").await.unwrap_err();
        assert!(matches!(err, BackendError::TaskNotFound(id) if id == "missing"));
    }
}
