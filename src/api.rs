//! HTTP surface: job submission and lookup, sandbox provisioning, health.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::config::OrchestratorConfig;
use crate::error::Error;
use crate::job::{non_blank, Job, SubmitJobRequest};
use crate::monitor::LoopLimits;
use crate::processor::SandboxJobProcessor;
use crate::reasoning::ReasoningService;
use crate::registry::{JobRegistry, JobStore, SubmitOutcome};
use crate::sandbox::{SandboxConnection, SandboxProvider, WorkspaceManager};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<JobRegistry>,
}

impl AppState {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }

    /// Wires a registry, processor and sandbox provider from `config`.
    pub fn from_config(
        config: &OrchestratorConfig,
        service: Option<Arc<dyn ReasoningService>>,
    ) -> Self {
        let workspaces = WorkspaceManager::new(
            config.jobs.workspace_dir.clone(),
            config.jobs.git_base_url.clone(),
        )
        .with_clone_timeout(config.agent.clone_timeout());
        let processor = SandboxJobProcessor::new(workspaces, service)
            .with_limits(LoopLimits {
                max_turns: config.agent.max_turns,
                total_timeout: config.agent.total_timeout(),
            })
            .with_call_timeout(config.agent.call_timeout())
            .with_shell_timeout(config.agent.shell_timeout());
        let provider = Arc::new(SandboxProvider::new(config.sandbox.clone()));
        let registry = JobRegistry::new(JobStore::new(), Arc::new(processor), provider)
            .with_max_concurrent(config.jobs.max_concurrent)
            .with_retention(config.jobs.retention());
        Self::new(Arc::new(registry))
    }
}

/// Error returned from handlers, rendered as `{"error": ...}`.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "job not found".to_string()),
            other => {
                tracing::error!(error = %other, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Builds the router with request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", post(submit_job))
        .route("/jobs/{job_id}", get(get_job))
        .route("/api/v1/jobs", post(submit_job))
        .route("/api/v1/jobs/{job_id}", get(get_job))
        .route("/api/v1/sandboxes/ensure", post(ensure_sandbox))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn submit_job(
    State(state): State<AppState>,
    body: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let Json(request) = body?;
    match state.registry.submit(request).await? {
        SubmitOutcome::Created(job) => Ok((StatusCode::CREATED, Json(job))),
        SubmitOutcome::Existing(job) => Ok((StatusCode::OK, Json(job))),
    }
}

async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.registry.lookup(&job_id).await?))
}

#[derive(Debug, Deserialize)]
struct EnsureSandboxRequest {
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    branch: Option<String>,
}

async fn ensure_sandbox(
    State(state): State<AppState>,
    body: Result<Json<EnsureSandboxRequest>, JsonRejection>,
) -> ApiResult<Json<SandboxConnection>> {
    let Json(request) = body?;
    let slug = non_blank(request.slug.as_deref())
        .ok_or_else(|| Error::Validation("slug is required".to_string()))?;

    let provider = state.registry.provider();
    let connection = match request.branch {
        Some(branch) => {
            let branch = non_blank(Some(branch.as_str()))
                .ok_or_else(|| Error::Validation("branch must not be blank".to_string()))?;
            provider.ensure_for_branch(&slug, &branch)
        }
        None => provider.ensure(&slug, None),
    };
    Ok(Json(connection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use crate::processor::JobProcessor;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    struct IdleProcessor;

    #[async_trait]
    impl JobProcessor for IdleProcessor {
        async fn process(&self, _store: JobStore, _job_id: String) -> crate::error::Result<()> {
            Ok(())
        }
    }

    fn app() -> Router {
        let provider = Arc::new(SandboxProvider::new(SandboxConfig::default()));
        let registry = JobRegistry::new(JobStore::new(), Arc::new(IdleProcessor), provider);
        router(AppState::new(Arc::new(registry)))
    }

    async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn submission(job_id: &str) -> Value {
        json!({
            "jobId": job_id,
            "repoUrl": "https://example.com/repo.git",
            "branch": "main",
            "taskDescription": "fix the build",
        })
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = send(app(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn submit_then_replay_returns_created_then_ok() {
        let app = app();

        let (status, body) =
            send(app.clone(), Method::POST, "/jobs", Some(submission("job-1"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["jobId"], "job-1");
        assert_eq!(body["status"], "PENDING");
        assert_eq!(body["taskDescription"], "fix the build");

        let (status, body) =
            send(app, Method::POST, "/api/v1/jobs", Some(submission("job-1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jobId"], "job-1");
    }

    #[tokio::test]
    async fn legacy_field_names_are_accepted() {
        let body = json!({
            "jobId": "job-legacy",
            "repoUrl": "https://example.com/repo.git",
            "branch": "main",
            "task": "old style",
            "commit": "abc123",
        });

        let (status, job) = send(app(), Method::POST, "/jobs", Some(body)).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(job["taskDescription"], "old style");
        assert_eq!(job["commitHash"], "abc123");
    }

    #[tokio::test]
    async fn invalid_submission_is_bad_request() {
        let (status, body) = send(
            app(),
            Method::POST,
            "/jobs",
            Some(json!({ "jobId": "job-2", "branch": "main" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let message = body["error"].as_str().unwrap();
        assert!(message.contains("repoUrl or repoSlug"));
        assert!(message.contains("taskDescription"));
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/jobs")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_job_round_trips_and_unknown_is_404() {
        let app = app();
        send(app.clone(), Method::POST, "/jobs", Some(submission("job-3"))).await;

        let (status, body) = send(app.clone(), Method::GET, "/jobs/job-3", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jobId"], "job-3");

        let (status, body) = send(app.clone(), Method::GET, "/api/v1/jobs/job-3", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["branch"], "main");

        let (status, body) = send(app, Method::GET, "/jobs/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "job not found" }));
    }

    #[tokio::test]
    async fn ensure_sandbox_returns_cached_connection() {
        let app = app();

        let (status, first) = send(
            app.clone(),
            Method::POST,
            "/api/v1/sandboxes/ensure",
            Some(json!({ "slug": "acme" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["slug"], "acme-sandbox");
        assert_eq!(first["token"].as_str().unwrap().len(), 48);

        let (_, second) = send(
            app.clone(),
            Method::POST,
            "/api/v1/sandboxes/ensure",
            Some(json!({ "slug": "acme" })),
        )
        .await;
        assert_eq!(first, second);

        let (_, branched) = send(
            app,
            Method::POST,
            "/api/v1/sandboxes/ensure",
            Some(json!({ "slug": "acme", "branch": "dev" })),
        )
        .await;
        assert_eq!(branched["slug"], "acme-dev-sandbox");
        assert_ne!(branched["token"], first["token"]);
    }

    #[tokio::test]
    async fn ensure_sandbox_rejects_blank_slug_and_branch() {
        let app = app();

        let (status, _) = send(
            app.clone(),
            Method::POST,
            "/api/v1/sandboxes/ensure",
            Some(json!({ "slug": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            app,
            Method::POST,
            "/api/v1/sandboxes/ensure",
            Some(json!({ "slug": "acme", "branch": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("branch"));
    }

    #[test]
    fn internal_errors_hide_details() {
        let response = ApiError::from(Error::Internal("secret detail".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
