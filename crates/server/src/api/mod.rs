use crate::config::ServerConfig;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use miniflow_core::transport::HttpTransport;
use miniflow_core::workflow::WorkflowExecutor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Application state shared across handlers
pub struct AppState {
    pub config: ServerConfig,
    pub executor: WorkflowExecutor,
    /// Parent of every run's cancellation token
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig, shutdown: CancellationToken) -> Result<Self> {
        let transport = HttpTransport::new().context("Failed to create HTTP transport")?;
        let executor = WorkflowExecutor::new(config.run.clone(), Arc::new(transport));
        Ok(Self {
            config,
            executor,
            shutdown,
        })
    }
}

/// Start the API server; it drains and stops once `shutdown` is cancelled.
pub async fn serve(addr: &str, config: ServerConfig, shutdown: CancellationToken) -> Result<()> {
    let state = AppState::new(config, shutdown.clone())?;

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

/// Create the API router
fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(run_workflow))
        .route("/api/run", post(run_workflow))
        .route("/api/health", get(health_check))
        // Middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "miniflow",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Run the configured workflow on the request body
async fn run_workflow(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult<Response> {
    let workflow = state
        .config
        .build_workflow()
        .context("Invalid workflow definition")?;

    let output = state
        .executor
        .execute_with_cancel(workflow, &body, state.shutdown.child_token())
        .await
        .context("Workflow execution failed")?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        output,
    )
        .into_response())
}

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// Custom error type for API handlers
pub struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_msg = self.0.to_string();
        let details = self.0.chain().skip(1).map(|e| e.to_string()).collect::<Vec<_>>().join(": ");

        tracing::warn!(error = %error_msg, details = %details, "request failed");

        let response = if details.is_empty() {
            ErrorResponse::new(error_msg)
        } else {
            ErrorResponse::with_details(error_msg, details)
        };

        (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
