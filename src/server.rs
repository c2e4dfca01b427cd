//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/chat` | Run one turn of the query pipeline |
//! | `GET`    | `/sessions/{id}/history` | Chat history of a session |
//! | `DELETE` | `/sessions/{id}/history` | Clear a session's history |
//! | `POST`   | `/ingest` | Ingest files or a directory into the index |
//! | `POST`   | `/users` | Register a user |
//! | `POST`   | `/login` | Check credentials, return the user's session |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `conflict` (409),
//! `unavailable` (503), `internal` (500).
//!
//! A chat turn that fails inside the pipeline is not an HTTP error: the
//! response carries `"outcome": "failed"` and the user-facing message.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front ends
//! can call the API directly.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::accounts::{AccountStore, User, UserId};
use crate::config::Config;
use crate::error::PipelineError;
use crate::ingest::{IngestReport, Ingestor};
use crate::models::ConversationTurn;
use crate::pipeline::{Assistant, Reply};
use crate::services::Services;

/// Shared state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub assistant: Assistant,
    pub ingestor: Ingestor,
    pub accounts: Arc<AccountStore>,
}

impl AppState {
    pub fn from_services(services: &Services) -> anyhow::Result<Self> {
        Ok(Self {
            assistant: services.assistant()?,
            ingestor: services.ingestor(),
            accounts: services.accounts(),
        })
    }
}

/// All routes with CORS applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/chat", post(handle_chat))
        .route(
            "/sessions/{id}/history",
            get(handle_history).delete(handle_clear),
        )
        .route("/ingest", post(handle_ingest))
        .route("/users", post(handle_register))
        .route("/login", post(handle_login))
        .layer(cors)
        .with_state(state)
}

/// Start the services and serve on `[server].bind` until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::start(config).await?;
    let app = router(AppState::from_services(&services)?);

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(bind = %bind_addr, "server listening");
    println!("Listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    services.shutdown().await;
    Ok(())
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

pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match &err {
            PipelineError::Account(msg) if msg.contains("already exists") => {
                AppError::new(StatusCode::CONFLICT, "conflict", msg.clone())
            }
            PipelineError::Account(_)
            | PipelineError::Config(_)
            | PipelineError::UnsupportedFormat { .. }
            | PipelineError::Load { .. } => bad_request(err.to_string()),
            PipelineError::EmbeddingService { .. } | PipelineError::ModelInvocation { .. } => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "unavailable", err.to_string())
            }
            _ => {
                error!(error = %err, "request failed");
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
            }
        }
    }
}

// ============ GET /health ============

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

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequestBody {
    /// Omit to start a new anonymous session.
    #[serde(default)]
    session_id: Option<String>,
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    session_id: String,
    #[serde(flatten)]
    reply: Reply,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequestBody>,
) -> Result<Json<ChatResponse>, AppError> {
    if body.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let session_id = match body.session_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => Uuid::new_v4().to_string(),
    };

    let reply = state.assistant.process_turn(&session_id, &body.message).await;
    Ok(Json(ChatResponse { session_id, reply }))
}

// ============ /sessions/{id}/history ============

#[derive(Serialize)]
struct HistoryResponse {
    session_id: String,
    messages: Vec<ConversationTurn>,
}

async fn handle_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let messages = state.assistant.history(&session_id).await?;
    Ok(Json(HistoryResponse {
        session_id,
        messages,
    }))
}

#[derive(Serialize)]
struct ClearResponse {
    session_id: String,
    removed: u64,
}

async fn handle_clear(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ClearResponse>, AppError> {
    let removed = state.assistant.clear(&session_id).await?;
    Ok(Json(ClearResponse {
        session_id,
        removed,
    }))
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequestBody {
    #[serde(default)]
    paths: Vec<PathBuf>,
    #[serde(default)]
    dir: Option<PathBuf>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(body): Json<IngestRequestBody>,
) -> Result<Json<IngestReport>, AppError> {
    let mut report = match &body.dir {
        Some(dir) => state.ingestor.ingest_dir(dir).await?,
        None if body.paths.is_empty() => {
            return Err(bad_request("either paths or dir must be given"));
        }
        None => IngestReport::default(),
    };
    if !body.paths.is_empty() {
        let files = state.ingestor.ingest_batch(&body.paths).await?;
        report.files.extend(files.files);
    }
    Ok(Json(report))
}

// ============ Accounts ============

#[derive(Deserialize)]
struct RegisterBody {
    first_name: String,
    last_name: String,
    email: String,
    password: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    user_id: UserId,
    session_id: String,
}

async fn handle_register(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let user_id = state
        .accounts
        .register(&body.first_name, &body.last_name, &body.email, &body.password)
        .await?;
    let session_id = state.accounts.session_for_user(user_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id,
            session_id,
        }),
    ))
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    user: User,
    session_id: String,
}

async fn handle_login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<LoginResponse>, AppError> {
    let user = state
        .accounts
        .authenticate(&body.email, &body.password)
        .await?
        .ok_or_else(|| unauthorized("invalid email or password"))?;
    let session_id = state.accounts.session_for_user(user.id).await?;
    Ok(Json(LoginResponse { user, session_id }))
}
