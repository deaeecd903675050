//! JSON HTTP API.
//!
//! A thin shell over [`App`]: every handler receives text, calls one core
//! operation and renders the result. All per-request failures become JSON
//! error responses; none of them stop the server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/sessions` | Open an admin session |
//! | `POST` | `/admin/unlock` | Unlock a session with the admin secret |
//! | `POST` | `/upload` | Replace the knowledge with uploaded documents (multipart) |
//! | `POST` | `/ask` | Ask a question |
//! | `GET`  | `/knowledge` | Size and provenance of the current knowledge |
//! | `GET`  | `/history` | Conversation log |
//!
//! # Admin credentials
//!
//! `/upload` accepts an `x-admin-secret` header, an `x-session-id` header
//! naming an unlocked session, or both. In trigger-phrase mode a session is
//! unlocked by sending the phrase as the `question` of `/ask`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "upstream_error", "message": "...", "details": { } } }
//! ```
//!
//! Error codes: `bad_request` (400), `forbidden` (403), `not_found` (404),
//! `no_knowledge` (409), `transport_error` / `upstream_error` /
//! `empty_response` / `malformed_response` (502), `persistence_error` /
//! `extraction_error` (500).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

use crate::admin::{AdminSession, Screened};
use crate::answer::QaError;
use crate::app::App;
use crate::models::{ConversationEntry, Document};
use crate::store::StoreError;

/// Largest accepted request body (uploads included).
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

pub const SESSION_HEADER: &str = "x-session-id";
pub const SECRET_HEADER: &str = "x-admin-secret";

/// Idle admin sessions are dropped after this long.
const SESSION_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

/// Upper bound on live sessions; the least recently used is evicted beyond it.
const MAX_SESSIONS: usize = 10_000;

/// Shared state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    app: Arc<App>,
    sessions: Arc<SessionTable>,
}

struct SessionEntry {
    session: AdminSession,
    last_used: Instant,
}

/// Admin sessions keyed by id.
///
/// Every read-modify-write of a session happens under one lock acquisition,
/// so two requests on the same session cannot both spend a single unlock.
struct SessionTable {
    entries: Mutex<HashMap<String, SessionEntry>>,
    idle_ttl: Duration,
    capacity: usize,
}

impl SessionTable {
    fn new(idle_ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            idle_ttl,
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, SessionEntry>>, AppError> {
        self.entries
            .lock()
            .map_err(|_| internal("session table poisoned"))
    }

    /// Creates a locked session, pruning idle ones first.
    fn open(&self) -> Result<String, AppError> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        entries.retain(|_, e| now.duration_since(e.last_used) < self.idle_ttl);
        while entries.len() >= self.capacity {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            entries.remove(&oldest);
        }

        let id = Uuid::new_v4().to_string();
        entries.insert(
            id.clone(),
            SessionEntry {
                session: AdminSession::new(),
                last_used: now,
            },
        );
        Ok(id)
    }

    /// Runs `f` on the named session, or on a throwaway one when `id` is `None`.
    fn with<T>(&self, id: Option<&str>, f: impl FnOnce(&mut AdminSession) -> T) -> Result<T, AppError> {
        let Some(id) = id else {
            return Ok(f(&mut AdminSession::new()));
        };
        let mut entries = self.lock()?;
        let now = Instant::now();
        let expired = match entries.get(id) {
            Some(entry) => now.duration_since(entry.last_used) >= self.idle_ttl,
            None => return Err(not_found(format!("unknown session: {}", id))),
        };
        if expired {
            entries.remove(id);
            return Err(not_found(format!("session expired: {}", id)));
        }
        let Some(entry) = entries.get_mut(id) else {
            return Err(not_found(format!("unknown session: {}", id)));
        };
        entry.last_used = now;
        Ok(f(&mut entry.session))
    }
}

/// Builds the router. Exposed so tests can serve it on an ephemeral port.
pub fn router(app: Arc<App>) -> Router {
    let state = AppState {
        app,
        sessions: Arc::new(SessionTable::new(SESSION_IDLE_TTL, MAX_SESSIONS)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sessions", post(handle_new_session))
        .route("/admin/unlock", post(handle_unlock))
        .route("/upload", post(handle_upload))
        .route("/ask", post(handle_ask))
        .route("/knowledge", get(handle_knowledge))
        .route("/history", get(handle_history))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Binds to `[server].bind` and serves until the process is terminated.
pub async fn run_server(app: Arc<App>) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("docqa listening on http://{}", bind_addr);
    axum::serve(listener, router(app)).await?;
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
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    details: Option<Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
        details: None,
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn forbidden(message: impl Into<String>) -> AppError {
    error(StatusCode::FORBIDDEN, "forbidden", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    error(StatusCode::NOT_FOUND, "not_found", message)
}

fn internal(message: impl Into<String>) -> AppError {
    error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

impl From<QaError> for AppError {
    fn from(e: QaError) -> Self {
        let status = match e {
            QaError::NoKnowledgeAvailable => StatusCode::CONFLICT,
            _ => StatusCode::BAD_GATEWAY,
        };
        AppError {
            status,
            code: e.code().to_string(),
            message: e.user_message(),
            details: e.payload().cloned(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        let code = match e {
            StoreError::Persistence(_) => "persistence_error",
            StoreError::Extraction(_) => "extraction_error",
        };
        error(StatusCode::INTERNAL_SERVER_ERROR, code, e.to_string())
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
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

// ============ POST /sessions ============

#[derive(Serialize)]
struct SessionResponse {
    session_id: String,
}

async fn handle_new_session(State(state): State<AppState>) -> Result<Json<SessionResponse>, AppError> {
    let id = state.sessions.open()?;
    Ok(Json(SessionResponse { session_id: id }))
}

// ============ POST /admin/unlock ============

#[derive(Deserialize)]
struct UnlockRequest {
    session_id: String,
    secret: String,
}

#[derive(Serialize)]
struct UnlockResponse {
    unlocked: bool,
}

async fn handle_unlock(
    State(state): State<AppState>,
    Json(req): Json<UnlockRequest>,
) -> Result<Json<UnlockResponse>, AppError> {
    let gate = &state.app.gate;
    let unlocked = state
        .sessions
        .with(Some(&req.session_id), |session| gate.unlock(session, &req.secret))?;
    if !unlocked {
        return Err(forbidden("admin secret does not match"));
    }
    Ok(Json(UnlockResponse { unlocked: true }))
}

// ============ POST /upload ============

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    documents: Vec<String>,
    text_length: usize,
    character_limit: usize,
}

async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let session_id = header(&headers, SESSION_HEADER);
    let presented = header(&headers, SECRET_HEADER);
    let gate = &state.app.gate;

    // Reject early, but only spend the unlock once the documents are in hand.
    if !state
        .sessions
        .with(session_id, |session| gate.may_mutate(session, presented))?
    {
        return Err(forbidden("admin access required to upload documents"));
    }

    let mut documents = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read {}: {}", name, e)))?;
        documents.push(Document::new(name, bytes.to_vec()));
    }
    if documents.is_empty() {
        return Err(bad_request("no documents uploaded"));
    }
    if !state
        .sessions
        .with(session_id, |session| gate.authorize_mutation(session, presented))?
    {
        return Err(forbidden("admin access required to upload documents"));
    }

    let knowledge = state.app.store.ingest(&documents).await?;
    info!(documents = documents.len(), "documents uploaded over HTTP");
    Ok(Json(UploadResponse {
        message: "Documents uploaded successfully".to_string(),
        documents: knowledge.source_document_names.clone(),
        text_length: knowledge.char_len(),
        character_limit: knowledge.character_limit,
    }))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum AskResponse {
    Answer { answer: String },
    Unlocked { admin_unlocked: bool, message: String },
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let gate = &state.app.gate;
    let screened = state
        .sessions
        .with(req.session_id.as_deref(), |session| gate.screen(session, &req.question))?;

    match screened {
        Screened::Empty => Err(bad_request("question must not be empty")),
        Screened::Unlocked => Ok(Json(AskResponse::Unlocked {
            admin_unlocked: true,
            message: "Admin access granted. You can now upload documents.".to_string(),
        })),
        Screened::Question(question) => {
            let answer = state.app.ask(question).await?;
            Ok(Json(AskResponse::Answer {
                answer: answer.text,
            }))
        }
    }
}

// ============ GET /knowledge ============

#[derive(Serialize)]
struct KnowledgeResponse {
    text_length: usize,
    character_limit: usize,
    documents: Vec<String>,
    updated_at: Option<String>,
}

async fn handle_knowledge(State(state): State<AppState>) -> Json<KnowledgeResponse> {
    let knowledge = state.app.store.snapshot();
    Json(KnowledgeResponse {
        text_length: knowledge.char_len(),
        character_limit: knowledge.character_limit,
        documents: knowledge.source_document_names.clone(),
        updated_at: knowledge.updated_at.map(|t| t.to_rfc3339()),
    })
}

// ============ GET /history ============

#[derive(Serialize)]
struct HistoryResponse {
    entries: Vec<ConversationEntry>,
}

async fn handle_history(State(state): State<AppState>) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        entries: state.app.log.entries(),
    })
}
