//! Intake HTTP server.
//!
//! - `POST {endpoint_path}` accepts `source` and `target` form fields and
//!   answers 202 Accepted with an empty body once the mention is queued
//! - `GET /health` answers 200 while the server is up
//!
//! `serve` also runs a timer that calls `run_due_work` every `tick_secs`.

use axum::extract::rejection::FormRejection;
use axum::extract::{ConnectInfo, Form, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use webmention_core::{Database, Error, IntakeRequest, MentionService};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    service: Arc<MentionService<Database>>,
}

impl AppState {
    pub fn new(service: Arc<MentionService<Database>>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &MentionService<Database> {
        &self.service
    }
}

pub fn build_router(state: AppState) -> Router {
    let endpoint_path = state.service.config().endpoint_path.clone();

    Router::new()
        .route(&endpoint_path, post(webmention_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct MentionForm {
    source: Option<String>,
    target: Option<String>,
}

async fn webmention_handler(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    form: Result<Form<MentionForm>, FormRejection>,
) -> Result<StatusCode, ApiError> {
    let Form(form) = form.map_err(|e| ApiError::invalid_request(e.body_text()))?;

    let forwarded_for = if state.service.config().trust_forwarded_for {
        forwarded_header(&headers)
    } else {
        None
    };

    let request = IntakeRequest {
        source: form.source,
        target: form.target,
        remote_addr: connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()),
        forwarded_for,
    };

    let id = state.service.receive(&request)?;
    info!(mention_id = id, "Webmention accepted");
    Ok(StatusCode::ACCEPTED)
}

/// X-Forwarded-For first, then X-Real-IP.
fn forwarded_header(headers: &HeaderMap) -> Option<String> {
    ["x-forwarded-for", "x-real-ip"]
        .iter()
        .find_map(|name| headers.get(*name)?.to_str().ok())
        .map(str::to_string)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// JSON error body: `{ "code": ..., "message": ... }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ApiErrorBody<'a> {
    code: &'a str,
    message: &'a str,
}

impl ApiError {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_request",
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidRequest(message) => Self::invalid_request(message),
            Error::NotFound(message) => Self {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message,
            },
            other => {
                error!("Intake failed: {}", other);
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal_error",
                    message: "internal error".to_string(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            code: self.code,
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Binds `listen_addr`, serves the intake endpoint and runs due work on a
/// timer until Ctrl-C.
pub async fn serve(service: Arc<MentionService<Database>>) -> anyhow::Result<()> {
    let config = service.config().clone();
    service.activate(Utc::now())?;

    let ticker = tokio::spawn(due_work_loop(service.clone(), config.tick_secs));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(
        "Listening on {} (endpoint {})",
        config.listen_addr,
        config.endpoint_url()
    );

    let app = build_router(AppState::new(service));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    ticker.abort();
    info!("Server stopped");
    Ok(())
}

async fn due_work_loop(service: Arc<MentionService<Database>>, tick_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(tick_secs.max(1)));
    loop {
        interval.tick().await;
        match service.run_due_work(Utc::now()).await {
            Ok(report) if report.tasks_run > 0 => info!(
                "Ran {} due tasks: {} deliveries, {} mentions processed",
                report.tasks_run,
                report.deliveries.len(),
                report.processed.total()
            ),
            Ok(_) => {}
            Err(e) => warn!("Due work failed: {}", e),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
