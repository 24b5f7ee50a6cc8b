//! HTTP server.
//!
//! Exposes the indexing pipeline as a JSON HTTP API. A full run can be
//! triggered synchronously (`POST /index-survey-data`) or as a background
//! job (`POST /jobs`) that is polled and cancelled by id.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Liveness message |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/index-survey-data` | Run a full indexing pass and wait for it |
//! | `POST` | `/jobs` | Start a background indexing run |
//! | `GET`  | `/jobs` | List known jobs |
//! | `GET`  | `/jobs/{id}` | Job status snapshot |
//! | `DELETE` | `/jobs/{id}` | Request cancellation of a job |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "store_unavailable", "message": "search store is unavailable: ..." } }
//! ```
//!
//! Error codes: `store_unavailable` (503), `conflict` (409), `not_found` (404),
//! `timeout` (504), `cancelled` (500), `internal` (500).
//!
//! Only one indexing run is active at a time; a second request gets `409`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::RunError;
use crate::jobs::{JobManager, JobSnapshot};
use crate::pipeline::Pipeline;
use crate::progress::TracingProgress;

const LIVENESS_MESSAGE: &str = "설문 데이터 색인 API가 Elasticsearch와 함께 실행 중입니다!";
const DONE_MESSAGE: &str = "사용자 단위 설문 데이터 색인 작업이 완료되었습니다.";
const NO_DATA_MESSAGE: &str = "처리할 데이터가 없습니다.";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    jobs: Arc<JobManager>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            jobs: JobManager::new(pipeline),
        }
    }

    pub fn jobs(&self) -> &Arc<JobManager> {
        &self.jobs
    }
}

/// Build the router. Exposed separately from [`run_server`] so tests can
/// serve it on an ephemeral port.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/index-survey-data", post(handle_index))
        .route("/jobs", post(handle_submit_job).get(handle_list_jobs))
        .route("/jobs/{id}", get(handle_job_status).delete(handle_cancel_job))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`.
///
/// Shuts down gracefully on Ctrl+C (and SIGTERM on Unix).
pub async fn run_server(config: &Config, pipeline: Pipeline) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(
        "listening on http://{} (index '{}', Ctrl+C/SIGTERM to stop)",
        bind_addr,
        config.store.index
    );

    serve(listener, AppState::new(pipeline), shutdown_signal()).await?;
    tracing::info!("server stopped");
    Ok(())
}

/// Serve the router on `listener` until `shutdown` resolves.
///
/// On shutdown every active run is cancelled, both background jobs and
/// synchronous `/index-survey-data` requests, and in-flight responses are
/// allowed to complete.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let jobs = state.jobs().clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("shutdown requested, cancelling active runs");
            jobs.cancel_all();
        })
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

impl From<RunError> for AppError {
    fn from(err: RunError) -> Self {
        let status = match &err {
            RunError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RunError::Conflict => StatusCode::CONFLICT,
            RunError::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
            RunError::Input(_) | RunError::Cancelled | RunError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?err, "indexing run failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET / and GET /health ============

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

async fn handle_root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: LIVENESS_MESSAGE.to_string(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /index-survey-data ============

#[derive(Serialize)]
struct IndexResponse {
    message: String,
    success_count: usize,
    failure_count: usize,
}

/// Runs a full indexing pass and responds when it finishes.
///
/// Returns `503` if the store is unreachable, `409` if another run is
/// active, and `500` for any other failure.
async fn handle_index(State(state): State<AppState>) -> Result<Json<IndexResponse>, AppError> {
    let _guard = state.jobs.try_acquire()?;
    let cancel = state.jobs.run_token();
    let summary = state
        .jobs
        .pipeline()
        .run(&cancel, &TracingProgress, None)
        .await?;

    let message = if summary.documents == 0 {
        NO_DATA_MESSAGE
    } else {
        DONE_MESSAGE
    };
    Ok(Json(IndexResponse {
        message: message.to_string(),
        success_count: summary.success_count,
        failure_count: summary.failure_count(),
    }))
}

// ============ /jobs ============

#[derive(Serialize)]
struct SubmitResponse {
    job_id: String,
}

async fn handle_submit_job(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let job_id = state.jobs.submit().await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id })))
}

#[derive(Serialize)]
struct JobListResponse {
    jobs: Vec<JobSnapshot>,
}

async fn handle_list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    Json(JobListResponse {
        jobs: state.jobs.list().await,
    })
}

async fn handle_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, AppError> {
    state
        .jobs
        .status(&id)
        .await
        .map(Json)
        .ok_or_else(|| not_found(format!("no job with id: {}", id)))
}

async fn handle_cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<JobSnapshot>), AppError> {
    let snapshot = state
        .jobs
        .cancel(&id)
        .await
        .ok_or_else(|| not_found(format!("no job with id: {}", id)))?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}
