//! In-memory dev server that mirrors the analysis job API

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};

use crate::types::{JobPhase, JobStatusResponse, RawAnalysisResult, SubmitResponse};

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub message: String,
    pub version: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, detail: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { detail: detail.into() }))
}

#[derive(Debug, Clone)]
struct StubTask {
    file_name: String,
    created_at: String,
    polls_remaining: usize,
}

/// Replays a fixture result for every uploaded file
#[derive(Clone)]
pub struct StubBackend {
    fixture: RawAnalysisResult,
    processing_polls: usize,
    failure: Option<String>,
    tasks: Arc<Mutex<HashMap<String, StubTask>>>,
    next_id: Arc<Mutex<u64>>,
}

impl StubBackend {
    /// Jobs report `processing` for `processing_polls` status checks, then `done`
    pub fn new(fixture: RawAnalysisResult, processing_polls: usize) -> Self {
        Self {
            fixture,
            processing_polls,
            failure: None,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(0)),
        }
    }

    /// Jobs end in `failed` with `message` instead of `done`
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    fn create_task(&self, file_name: String) -> Result<String, ApiError> {
        let mut next_id = self
            .next_id
            .lock()
            .map_err(|_| api_error(StatusCode::INTERNAL_SERVER_ERROR, "task table unavailable"))?;
        *next_id += 1;
        let task_id = format!("{:032x}", *next_id);

        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
            .to_string();

        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| api_error(StatusCode::INTERNAL_SERVER_ERROR, "task table unavailable"))?;
        tasks.insert(
            task_id.clone(),
            StubTask {
                file_name,
                created_at,
                polls_remaining: self.processing_polls,
            },
        );
        Ok(task_id)
    }

    fn poll_task(&self, task_id: &str) -> Result<JobStatusResponse, ApiError> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| api_error(StatusCode::INTERNAL_SERVER_ERROR, "task table unavailable"))?;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Task {} not found", task_id)))?;
        debug!("Status check for task {} ({})", task_id, task.file_name);

        let mut response = if task.polls_remaining > 0 {
            task.polls_remaining -= 1;
            JobStatusResponse::with_status(JobPhase::Processing)
        } else if let Some(message) = &self.failure {
            JobStatusResponse::failed(Some(message.clone()))
        } else {
            JobStatusResponse::done(self.fixture.clone())
        };
        response.task_id = Some(task_id.to_string());
        response.created_at = Some(task.created_at.clone());
        Ok(response)
    }
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        message: "Risk analysis stub API is running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn run_pipeline_handler(
    State(stub): State<StubBackend>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>, ApiError> {
    let mut upload: Option<(String, usize)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        error!("Malformed multipart body: {}", e);
        api_error(StatusCode::BAD_REQUEST, format!("Malformed upload: {}", e))
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Malformed upload: {}", e)))?;
        upload = Some((file_name, bytes.len()));
    }

    let (file_name, size) =
        upload.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Missing file field"))?;
    if !file_name.to_ascii_lowercase().ends_with(".csv") {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Invalid file type. Please upload a CSV file.",
        ));
    }
    if size == 0 {
        return Err(api_error(StatusCode::BAD_REQUEST, "Uploaded file is empty."));
    }

    let task_id = stub.create_task(file_name.clone())?;
    info!("Accepted {} ({} bytes) as task {}", file_name, size, task_id);
    Ok(Json(SubmitResponse { task_id }))
}

async fn status_handler(
    State(stub): State<StubBackend>,
    Path(task_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let response = stub.poll_task(&task_id)?;
    info!("Task {} -> {}", task_id, response.status);
    Ok(Json(response))
}

pub fn create_router(stub: StubBackend) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/run-pipeline", post(run_pipeline_handler))
        .route("/pipeline-status/:task_id", get(status_handler))
        .with_state(stub)
}

/// Run the stub server
pub async fn run_server(stub: StubBackend, port: u16) -> anyhow::Result<()> {
    let addr = format!("127.0.0.1:{}", port);
    info!("Starting stub analysis API on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, create_router(stub)).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_progresses_to_done() {
        let stub = StubBackend::new(RawAnalysisResult::new(json!({ "entity_scores": [] })), 2);
        let id = stub.create_task("a.csv".into()).unwrap();

        assert_eq!(stub.poll_task(&id).unwrap().status, JobPhase::Processing);
        assert_eq!(stub.poll_task(&id).unwrap().status, JobPhase::Processing);
        let done = stub.poll_task(&id).unwrap();
        assert_eq!(done.status, JobPhase::Done);
        assert!(done.result.is_some());
    }

    #[test]
    fn test_unknown_task_is_404() {
        let stub = StubBackend::new(RawAnalysisResult::default(), 0);
        let (status, _) = stub.poll_task("nope").unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_failing_stub_reports_message() {
        let stub = StubBackend::new(RawAnalysisResult::default(), 0).failing("model crashed");
        let id = stub.create_task("a.csv".into()).unwrap();
        let failed = stub.poll_task(&id).unwrap();
        assert_eq!(failed.status, JobPhase::Failed);
        assert_eq!(failed.error.as_deref(), Some("model crashed"));
    }
}
