//! HTTP API for the chat assistant.
//!
//! Exposes session creation, chat, and admin review under `/ai`, mirroring
//! the contract the platform's chat widget speaks.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ai/session/anonymous` | Create a session with no owner |
//! | `POST` | `/ai/session` | Create a session for the calling user |
//! | `POST` | `/ai/chat/anonymous` | Chat within a session |
//! | `POST` | `/ai/chat` | Chat with caller identity threaded to tools |
//! | `DELETE` | `/ai/session/{id}` | Clear messages, keep the session |
//! | `GET` | `/ai/admin/sessions` | List sessions with message counts |
//! | `GET` | `/ai/admin/sessions/{id}/messages` | Full transcript |
//! | `DELETE` | `/ai/admin/sessions/{id}` | Hard-delete one session |
//! | `DELETE` | `/ai/admin/cleanup` | Delete sessions older than N days |
//! | `GET` | `/ai/health` | Credential/configuration probe |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "Session not found." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! Caller identity is read from the `x-user-id` header; validating it is
//! the auth gateway's job, not this service's.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::{CallerIdentity, Role, SessionSummary, StoredMessage};
use crate::orchestrator::ChatOrchestrator;
use crate::provider::{self, OpenAiClient};
use crate::retrieval::RetrievalService;
use crate::session::SessionStore;
use crate::store::ChunkStore;
use crate::tools::ToolRegistry;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: sqlx::SqlitePool,
    sessions: SessionStore,
    orchestrator: Arc<ChatOrchestrator>,
}

/// Start the HTTP server on the configured bind address.
///
/// Runs schema migrations first (idempotent), wires the OpenAI-backed
/// providers into the orchestrator, and serves until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;

    let client = Arc::new(OpenAiClient::new(config.openai.clone())?);
    let store = ChunkStore::new(pool.clone(), config.openai.embedding_dims);
    let retrieval = RetrievalService::new(store, client.clone());
    let orchestrator = Arc::new(ChatOrchestrator::new(
        client,
        retrieval,
        config.retrieval.top_k,
    ));

    let state = AppState {
        config: Arc::new(config.clone()),
        pool: pool.clone(),
        sessions: SessionStore::new(pool),
        orchestrator,
    };

    let bind_addr = state.config.server.bind.clone();
    let app = router(state);

    tracing::info!("assistant API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ai/session/anonymous", post(handle_create_anonymous_session))
        .route("/ai/session", post(handle_create_session))
        .route("/ai/chat/anonymous", post(handle_chat_anonymous))
        .route("/ai/chat", post(handle_chat))
        .route("/ai/session/{id}", delete(handle_clear_session))
        .route("/ai/admin/sessions", get(handle_list_sessions))
        .route(
            "/ai/admin/sessions/{id}/messages",
            get(handle_session_messages),
        )
        .route("/ai/admin/sessions/{id}", delete(handle_delete_session))
        .route("/ai/admin/cleanup", delete(handle_cleanup))
        .route("/ai/health", get(handle_health))
        .layer(cors)
        .with_state(state)
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Map store errors to HTTP statuses. Unknown-session errors carry a
/// "not found" message and become 404s; everything else is a 500.
fn classify_error(err: anyhow::Error) -> AppError {
    let msg = err.to_string();
    if msg.contains("not found") {
        not_found(msg)
    } else {
        internal(msg)
    }
}

/// Optional caller identity from the `x-user-id` header.
fn caller_identity(headers: &HeaderMap) -> Option<CallerIdentity> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .map(|id| CallerIdentity { id })
}

// ============ Session creation ============

#[derive(Serialize)]
struct SessionResponse {
    session_id: String,
}

/// `POST /ai/session/anonymous` — one session per chat-widget activation.
async fn handle_create_anonymous_session(
    State(state): State<AppState>,
) -> Result<Json<SessionResponse>, AppError> {
    let session_id = state
        .sessions
        .create(None)
        .await
        .map_err(classify_error)?;
    Ok(Json(SessionResponse { session_id }))
}

/// `POST /ai/session` — session owned by the calling user.
async fn handle_create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionResponse>, AppError> {
    let caller = caller_identity(&headers)
        .ok_or_else(|| bad_request("x-user-id header required for owned sessions"))?;

    let session_id = state
        .sessions
        .create(Some(caller.id))
        .await
        .map_err(classify_error)?;
    Ok(Json(SessionResponse { session_id }))
}

// ============ Chat ============

#[derive(Deserialize)]
struct ChatRequest {
    session_id: String,
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    reply: String,
    session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn handle_chat_anonymous(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    run_chat_turn(state, request, None).await
}

async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let caller = caller_identity(&headers);
    run_chat_turn(state, request, caller).await
}

/// One full chat turn: load history, persist the user turn, orchestrate,
/// persist the assistant turn with its provenance metadata.
///
/// The whole sequence holds the session's turn lock, so concurrent
/// requests against one session serialize instead of interleaving their
/// appends. The user append happens before the model call; a model
/// failure still leaves valid history.
async fn run_chat_turn(
    state: AppState,
    request: ChatRequest,
    caller: Option<CallerIdentity>,
) -> Result<Json<ChatResponse>, AppError> {
    if request.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    if !state
        .sessions
        .exists(&request.session_id)
        .await
        .map_err(classify_error)?
    {
        return Err(not_found(
            "Session not found or expired. Please start a new chat.",
        ));
    }

    let _guard = state.sessions.turn_lock(&request.session_id).await;

    let history = state
        .sessions
        .history(&request.session_id, state.config.retrieval.history_limit)
        .await
        .map_err(classify_error)?;

    state
        .sessions
        .append(&request.session_id, Role::User, &request.message, None)
        .await
        .map_err(classify_error)?;

    let tools = ToolRegistry::new(state.pool.clone(), caller);
    let outcome = state
        .orchestrator
        .respond(&request.message, &history, &tools)
        .await;

    state
        .sessions
        .append(
            &request.session_id,
            Role::Assistant,
            &outcome.reply,
            Some(&outcome.metadata()),
        )
        .await
        .map_err(classify_error)?;

    Ok(Json(ChatResponse {
        reply: outcome.reply,
        session_id: request.session_id,
        error: outcome.error,
    }))
}

// ============ Session clearing ============

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

/// `DELETE /ai/session/{id}` — wipe messages, keep the session alive.
/// Backs the chat widget's "New Chat" button.
async fn handle_clear_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.sessions.clear(&id).await.map_err(classify_error)?;
    Ok(Json(MessageResponse {
        message: "Chat cleared.".to_string(),
    }))
}

// ============ Admin ============

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default = "default_list_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_list_limit() -> i64 {
    50
}

/// `GET /ai/admin/sessions` — review what users are asking to find gaps
/// in the documentation.
async fn handle_list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<SessionSummary>>, AppError> {
    let summaries = state
        .sessions
        .list_sessions(query.limit, query.offset)
        .await
        .map_err(classify_error)?;
    Ok(Json(summaries))
}

async fn handle_session_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<StoredMessage>>, AppError> {
    if !state.sessions.exists(&id).await.map_err(classify_error)? {
        return Err(not_found("Session not found."));
    }

    let messages = state.sessions.transcript(&id).await.map_err(classify_error)?;
    Ok(Json(messages))
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.sessions.delete(&id).await.map_err(classify_error)?;
    Ok(Json(MessageResponse {
        message: format!("Session {} deleted.", id),
    }))
}

#[derive(Deserialize)]
struct CleanupQuery {
    #[serde(default = "default_cleanup_days")]
    days: i64,
}

fn default_cleanup_days() -> i64 {
    30
}

#[derive(Serialize)]
struct CleanupResponse {
    deleted: u64,
    older_than_days: i64,
}

/// `DELETE /ai/admin/cleanup?days=30` — retention sweep, also reachable
/// from `eva cleanup` for cron.
async fn handle_cleanup(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<CleanupResponse>, AppError> {
    if query.days < 1 {
        return Err(bad_request("days must be >= 1"));
    }

    let deleted = state
        .sessions
        .cleanup_older_than(query.days)
        .await
        .map_err(classify_error)?;

    Ok(Json(CleanupResponse {
        deleted,
        older_than_days: query.days,
    }))
}

// ============ Health ============

#[derive(Serialize)]
struct HealthResponse {
    openai_api_key_configured: bool,
    service_status: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        openai_api_key_configured: provider::api_key_configured(),
        service_status: "healthy".to_string(),
    })
}
