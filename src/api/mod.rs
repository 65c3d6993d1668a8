use crate::{
    agent_shell::AgentShell,
    auth::{auth_middleware, create_auth_state},
    config::{ApiConfig, Config},
    error::{FleetError, Result},
    models::Task,
    rate_limit::{rate_limit_middleware, RateLimitConfig},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

const SERVICE_NAME: &str = "aqe-fleet-core";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

const ROUTE_HEALTH: &str = "/health";
const ROUTE_TASKS: &str = "/tasks";
const ROUTE_TASK_BY_ID: &str = "/tasks/{task_id}";
const ROUTE_TASK_RESULT: &str = "/tasks/{task_id}/result";
const ROUTE_SYSTEM_STATUS: &str = "/system/status";

#[derive(Clone)]
pub struct ApiServer {
    config: ApiConfig,
    shell: Arc<AgentShell>,
    rate_limiter: RateLimitConfig,
    started_at: std::time::Instant,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub task_type: String,
    #[serde(default = "default_payload")]
    pub payload: serde_json::Value,
    pub priority: Option<i32>,
    pub deadline: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub hints: std::collections::HashMap<String, String>,
}

fn default_payload() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    pub task_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: crate::models::TaskState,
}

#[derive(Debug, Serialize)]
pub struct SystemStatusResponse {
    pub agent_id: String,
    pub agent_status: crate::models::AgentStatus,
    pub stats: crate::models::AgentStats,
    pub queue_length: usize,
    pub pattern_count: usize,
    pub uptime_secs: f64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl From<&FleetError> for (StatusCode, Json<ErrorResponse>) {
    fn from(err: &FleetError) -> Self {
        let status = match err.kind() {
            crate::error::ErrorKind::Validation => StatusCode::BAD_REQUEST,
            crate::error::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            crate::error::ErrorKind::Cancelled => StatusCode::CONFLICT,
            crate::error::ErrorKind::Timeout | crate::error::ErrorKind::TransientNetwork => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            crate::error::ErrorKind::DependencyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            crate::error::ErrorKind::Storage | crate::error::ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        )
    }
}

impl ApiServer {
    pub fn new(config: Config, shell: Arc<AgentShell>) -> Self {
        Self {
            config: config.api,
            shell,
            rate_limiter: RateLimitConfig::new(),
            started_at: std::time::Instant::now(),
        }
    }

    pub async fn run(&self) -> Result<()> {
        let app = self.build_router();
        let listener = tokio::net::TcpListener::bind(format!("{}:{}", self.config.host, self.config.port))
            .await
            .map_err(|e| FleetError::Internal(e.into()))?;

        info!("API server listening on {}:{}", self.config.host, self.config.port);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await
        .map_err(|e| FleetError::Internal(e.into()))?;

        Ok(())
    }

    /// Order matters: rate limit -> auth -> trace -> CORS -> routes.
    pub fn build_router(&self) -> Router {
        let auth_state = create_auth_state(self.config.clone());

        let cors_layer = CorsLayer::new()
            .allow_origin(
                self.config
                    .allowed_origins
                    .iter()
                    .filter_map(|origin| origin.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::DELETE,
            ])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
                axum::http::HeaderName::from_static("x-api-key"),
            ])
            .max_age(std::time::Duration::from_secs(3600));

        Router::new()
            .route(ROUTE_HEALTH, get(health_check))
            .route(ROUTE_TASKS, post(create_task))
            .route(ROUTE_TASK_BY_ID, get(get_task_status).delete(cancel_task))
            .route(ROUTE_TASK_RESULT, get(get_task_result))
            .route(ROUTE_SYSTEM_STATUS, get(get_system_status))
            .layer(
                ServiceBuilder::new()
                    .layer(middleware::from_fn_with_state(
                        self.rate_limiter.clone(),
                        rate_limit_middleware,
                    ))
                    .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
                    .layer(TraceLayer::new_for_http())
                    .layer(cors_layer),
            )
            .with_state(self.clone())
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
    }))
}

async fn create_task(
    State(api): State<ApiServer>,
    Json(request): Json<CreateTaskRequest>,
) -> std::result::Result<(StatusCode, Json<CreateTaskResponse>), (StatusCode, Json<ErrorResponse>)> {
    let mut task = Task::new(request.task_type, request.payload);
    if let Some(priority) = request.priority {
        task = task.with_priority(priority);
    }
    if let Some(deadline) = request.deadline {
        task = task.with_deadline(deadline);
    }
    task = task.depends_on(request.depends_on);
    for (key, value) in request.hints {
        task = task.with_hint(key, value);
    }

    match api.shell.submit(task).await {
        Ok(task_id) => Ok((
            StatusCode::ACCEPTED,
            Json(CreateTaskResponse {
                task_id,
                status: "pending".to_string(),
            }),
        )),
        Err(e) => Err((&e).into()),
    }
}

async fn get_task_status(
    State(api): State<ApiServer>,
    Path(task_id): Path<String>,
) -> std::result::Result<Json<TaskStatusResponse>, (StatusCode, Json<ErrorResponse>)> {
    match api.shell.dispatcher.task_state(&task_id).await {
        Some(status) => Ok(Json(TaskStatusResponse { task_id, status })),
        None => Err((&FleetError::NotFound(format!("task {task_id}"))).into()),
    }
}

async fn cancel_task(
    State(api): State<ApiServer>,
    Path(task_id): Path<String>,
) -> std::result::Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    match api.shell.cancel(&task_id).await {
        Ok(true) => Ok(Json(serde_json::json!({ "task_id": task_id, "cancelled": true }))),
        Ok(false) => Err((&FleetError::NotFound(format!("task {task_id}"))).into()),
        Err(e) => Err((&e).into()),
    }
}

async fn get_task_result(
    State(api): State<ApiServer>,
    Path(task_id): Path<String>,
) -> std::result::Result<Json<crate::models::TaskResult>, (StatusCode, Json<ErrorResponse>)> {
    match api.shell.dispatcher.task_result(&task_id).await {
        Some(result) => Ok(Json(result)),
        None => Err((&FleetError::NotFound(format!("result for task {task_id}"))).into()),
    }
}

async fn get_system_status(State(api): State<ApiServer>) -> Json<SystemStatusResponse> {
    Json(SystemStatusResponse {
        agent_id: api.shell.lifecycle.identity().id.clone(),
        agent_status: api.shell.lifecycle.status().await,
        stats: api.shell.lifecycle.stats().await,
        queue_length: api.shell.dispatcher.queue_length().await,
        pattern_count: api.shell.pattern_count().await,
        uptime_secs: api.started_at.elapsed().as_secs_f64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_constants_expose_expected_paths() {
        assert_eq!(ROUTE_HEALTH, "/health");
        assert_eq!(ROUTE_TASKS, "/tasks");
        assert_eq!(ROUTE_TASK_BY_ID, "/tasks/{task_id}");
        assert_eq!(ROUTE_TASK_RESULT, "/tasks/{task_id}/result");
        assert_eq!(ROUTE_SYSTEM_STATUS, "/system/status");
    }
}
