mod affiliate;
mod assistant;
mod email;
mod extract;
mod http;
mod metrics;
mod mock;
mod models;
mod pipeline;
mod sessions;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use email::{EmailClient, EmailError, ShoppingList};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, ChatRequest, ChatResponse, EmailRequest, EmailResponse};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind, StatusReport};
use serde_json::{Value, json};
use sessions::SessionStore;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{Instrument, error, info, info_span, warn};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "buildlist.api", "server crashed: {err:#}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let state = AppState {
        pipeline: Pipeline::from_env(SessionStore::from_env()),
        email: EmailClient::from_env(),
        openapi: Arc::new(load_openapi()),
        prometheus_handle: PrometheusBuilder::new().install_recorder()?,
    };
    info!(
        target = "buildlist.api",
        mode = ?state.pipeline.mode(),
        "pipeline ready"
    );

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "buildlist.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state).into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    email: EmailClient,
    openapi: Arc<Value>,
    prometheus_handle: PrometheusHandle,
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .route("/api/chat", post(chat))
        .route("/api/email", post(send_email))
        .route("/api/status", get(status))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()))
}

fn load_openapi() -> Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or_else(|_| json!({ "openapi": "3.0.3" }))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "buildlist-api-rs",
    }))
}

/// Conversation entry point.
///
/// - Method: `POST`
/// - Path: `/api/chat`
/// - Body: `ChatRequest` (`action` is one of `createThread`, `sendMessage`,
///   `generateRecommendations`)
/// - Response: `ChatResponse`; failures carry `success: false` and `error`
async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    crate::metrics::inc_requests("/api/chat");
    let Json(request) = payload.map_err(AppError::from_rejection)?;
    let span = info_span!(
        "chat",
        request_id = %Uuid::new_v4(),
        action = ?request.action,
    );
    async move {
        let response = state.pipeline.handle(request).await.map_err(|err| {
            if err.kind() == PipelineErrorKind::Upstream {
                error!(
                    target = "buildlist.api",
                    stage = err.stage(),
                    error = %err,
                    "chat request failed"
                );
            }
            AppError::Chat(err)
        })?;
        Ok::<_, AppError>(Json(response))
    }
    .instrument(span)
    .await
}

/// Send a shopping list to the user.
///
/// - Method: `POST`
/// - Path: `/api/email`
/// - Body: `EmailRequest`
/// - Response: `EmailResponse`
async fn send_email(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<Json<EmailResponse>, AppError> {
    crate::metrics::inc_requests("/api/email");
    let Json(request) = payload.map_err(|rejection| {
        AppError::Email(PipelineError::invalid_input("email", rejection.body_text()))
    })?;
    let list = ShoppingList::from_request(request).map_err(AppError::Email)?;
    let response = state.email.send(&list).await.map_err(|err| {
        warn!(target = "buildlist.api", error = %err, "email delivery failed");
        AppError::Relay(err)
    })?;
    Ok(Json(response))
}

/// Connectivity diagnostics: mode, masked key, and an assistant probe.
async fn status(State(state): State<AppState>) -> Json<StatusReport> {
    crate::metrics::inc_requests("/api/status");
    Json(state.pipeline.status().await)
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY")
        && presented(&headers, "X-Docs-Key") != key
    {
        return Err(AppError::Unauthorized("docs"));
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Buildlist API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#,
    )
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY")
        && presented(&headers, "X-Metrics-Key") != secret
    {
        return AppError::Unauthorized("metrics").into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

fn presented<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

#[derive(Debug)]
enum AppError {
    Chat(PipelineError),
    Email(PipelineError),
    Relay(EmailError),
    Unauthorized(&'static str),
}

impl AppError {
    fn from_rejection(rejection: JsonRejection) -> Self {
        Self::Chat(PipelineError::invalid_input("chat", rejection.body_text()))
    }
}

fn status_for(kind: PipelineErrorKind) -> StatusCode {
    match kind {
        PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        PipelineErrorKind::Upstream => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Chat(err) => (
                status_for(err.kind()),
                Json(ChatResponse::failure(err.detail())),
            )
                .into_response(),
            AppError::Email(err) => (
                status_for(err.kind()),
                Json(EmailResponse {
                    success: false,
                    message: err.detail().to_string(),
                    preview_url: None,
                }),
            )
                .into_response(),
            AppError::Relay(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(EmailResponse {
                    success: false,
                    message: format!("Failed to send email: {err}"),
                    preview_url: None,
                }),
            )
                .into_response(),
            AppError::Unauthorized(area) => (
                StatusCode::UNAUTHORIZED,
                Json(ApiError {
                    error: area.to_string(),
                    detail: Some("unauthorized".into()),
                }),
            )
                .into_response(),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
