//! HTTP route handlers for the CitySense API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Local;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::services::ServeDir;

use crate::chat::core::settings::{MAX_MAX_TOKENS, MAX_TEMPERATURE, MIN_MAX_TOKENS, MIN_TEMPERATURE};
use crate::chat::export::export;
use crate::chat::{
    ChatError, ChatStats, ConnectionStatus, ContextChunk, ConversationId, ConversationSession,
    ExportFormat, IndexStats, Message, ModelSettings, Provider, RawSettings, SessionId,
    SessionState, SystemPromptPreset, TurnEvent, TurnOutcome,
};

use super::state::AppState;

/// Error body returned by every failing handler.
type ApiError = (StatusCode, Json<Value>);

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let static_dir = ServeDir::new(&state.config.server.static_dir);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/status", get(status))
        .route("/api/catalog", get(catalog))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", get(get_session).delete(delete_session))
        .route("/api/sessions/{id}/settings", put(update_settings))
        .route("/api/sessions/{id}/messages", post(send_message))
        .route("/api/sessions/{id}/messages/stream", post(stream_message))
        .route("/api/sessions/{id}/reset", post(reset_session))
        .route("/api/sessions/{id}/export", get(export_session))
        .route("/api/vector/search", post(vector_search))
        .route("/api/vector/stats", get(vector_stats))
        .route("/api/vector", delete(vector_clear))
        .route("/api/providers/{provider}/test", post(test_provider))
        .fallback_service(static_dir)
        .with_state(state)
}

fn status_for(err: &ChatError) -> StatusCode {
    match err {
        ChatError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        ChatError::TurnInProgress | ChatError::StaleTurn | ChatError::NoPendingTurn => {
            StatusCode::CONFLICT
        }
        ChatError::EmptyExport | ChatError::UnknownExportFormat(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ChatError::VectorStoreUnavailable | ChatError::Configuration(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ChatError::Api { .. } | ChatError::Transport(_) | ChatError::MalformedResponse(_) => {
            StatusCode::BAD_GATEWAY
        }
        ChatError::Serialization(_)
        | ChatError::Url(_)
        | ChatError::Io(_)
        | ChatError::TurnTask(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn api_error(err: ChatError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!("request failed: {err}");
    }
    (status, Json(json!({ "error": err.to_string() })))
}

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "citysense",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Configuration and collaborator status.
async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let keys = &state.config.api_keys;
    Json(json!({
        "app_title": state.config.app_title,
        "api_keys": {
            "openai": keys.openai.is_some(),
            "gemini": keys.gemini.is_some(),
            "pinecone": keys.pinecone.is_some(),
        },
        "vector_db": state.engine.retriever().is_available(),
        "available_providers": state.engine.dispatcher().available_providers(),
        "sessions": state.sessions.len(),
    }))
}

/// Static catalog for the settings panel.
async fn catalog(State(state): State<Arc<AppState>>) -> Json<Value> {
    let providers: Vec<Value> = Provider::ALL
        .iter()
        .map(|p| {
            json!({
                "id": p,
                "name": p.display_name(),
                "models": p.models(),
            })
        })
        .collect();
    let presets: Vec<Value> = SystemPromptPreset::ALL
        .iter()
        .map(|p| json!({ "id": p.as_str(), "text": p.text() }))
        .collect();

    Json(json!({
        "providers": providers,
        "presets": presets,
        "export_formats": ExportFormat::ALL,
        "defaults": state.sessions.defaults(),
        "limits": {
            "temperature": [MIN_TEMPERATURE, MAX_TEMPERATURE],
            "max_tokens": [MIN_MAX_TOKENS, MAX_MAX_TOKENS],
        },
    }))
}

/// Snapshot of a session as shown to clients.
#[derive(Debug, Serialize)]
pub struct SessionView {
    /// Session handle.
    pub session_id: SessionId,
    /// Current conversation id.
    pub conversation_id: String,
    /// Empty or active.
    pub state: SessionState,
    /// Whether a reply is being generated.
    pub busy: bool,
    /// Current settings.
    pub settings: ModelSettings,
    /// Messages in order.
    pub messages: Vec<Message>,
    /// Message counts.
    pub stats: ChatStats,
}

impl SessionView {
    fn new(session_id: SessionId, session: &ConversationSession) -> Self {
        Self {
            session_id,
            conversation_id: session.id().to_string(),
            state: session.state(),
            busy: session.is_busy(),
            settings: session.settings().clone(),
            messages: session.messages().to_vec(),
            stats: session.stats(),
        }
    }
}

/// Open a session.
async fn create_session(State(state): State<Arc<AppState>>) -> (StatusCode, Json<SessionView>) {
    let (id, session) = state.sessions.create();
    let view = SessionView::new(id, &*session.lock().await);
    (StatusCode::CREATED, Json(view))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state.sessions.get(&id).map_err(api_error)?;
    let view = SessionView::new(id, &*session.lock().await);
    Ok(Json(view))
}

/// Tear a session down when its browser connection ends.
async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.remove(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(ChatError::SessionNotFound(id)))
    }
}

/// Replace a session's settings. Any JSON is accepted and normalized.
async fn update_settings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
    Json(body): Json<Value>,
) -> Result<Json<ModelSettings>, ApiError> {
    let session = state.sessions.get(&id).map_err(api_error)?;
    let settings = state
        .engine
        .validate_settings(&RawSettings::from_value(&body));
    session.lock().await.set_settings(settings.clone());
    Ok(Json(settings))
}

/// Chat message request.
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    /// The user's message.
    pub message: String,
}

/// Chat message response.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    /// Conversation the turn belongs to.
    pub conversation_id: String,
    /// Turn result.
    #[serde(flatten)]
    pub outcome: TurnOutcome,
}

fn user_text(request: MessageRequest) -> Result<String, ApiError> {
    if request.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    Ok(request.message)
}

/// Handle one chat turn and return the whole reply.
async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let text = user_text(request)?;
    let session = state.sessions.get(&id).map_err(api_error)?;
    let conversation_id = session.lock().await.id().to_string();

    let outcome = state
        .engine
        .handle_turn(&session, text)
        .await
        .map_err(api_error)?;

    Ok(Json(MessageResponse {
        conversation_id,
        outcome,
    }))
}

/// Handle one chat turn and stream the reply as server-sent events.
async fn stream_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
    Json(request): Json<MessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let text = user_text(request)?;
    let session = state.sessions.get(&id).map_err(api_error)?;
    let events = state
        .engine
        .stream_turn(session, text)
        .await
        .map_err(api_error)?;

    let stream = events.map(|event| {
        let event = match event {
            TurnEvent::Token(text) => Event::default().event("token").data(text),
            TurnEvent::Error(text) => Event::default().event("error").data(text),
            TurnEvent::Done(outcome) => Event::default()
                .event("done")
                .data(serde_json::to_string(&outcome).unwrap_or_default()),
        };
        Ok(event)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Reset request.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ResetRequest {
    /// Issue a new conversation id instead of only clearing messages.
    pub new_conversation: bool,
}

async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
    Json(request): Json<ResetRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state.sessions.get(&id).map_err(api_error)?;
    let mut guard = session.lock().await;
    guard.reset(request.new_conversation);
    Ok(Json(SessionView::new(id, &guard)))
}

/// Export query parameters.
#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    /// `json`, `txt` or `csv` (default `json`).
    pub format: Option<String>,
}

/// Download the conversation as an attachment.
async fn export_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let format: ExportFormat = query
        .format
        .as_deref()
        .unwrap_or("json")
        .parse()
        .map_err(api_error)?;
    let session = state.sessions.get(&id).map_err(api_error)?;
    let file = export(&*session.lock().await, format, Local::now()).map_err(api_error)?;

    let headers = [
        (CONTENT_TYPE, file.mime.to_string()),
        (
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file.filename),
        ),
    ];
    Ok((headers, file.content).into_response())
}

/// Similarity search request.
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    /// Query text.
    pub query: String,
    /// Maximum number of results.
    pub top_k: Option<usize>,
    /// Restrict to one conversation.
    pub conversation_id: Option<String>,
}

/// Similarity search response.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    /// Matching chunks, best first.
    pub results: Vec<ContextChunk>,
    /// Number of results.
    pub count: usize,
}

async fn vector_search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Json<SearchResponse> {
    let top_k = request
        .top_k
        .unwrap_or(state.config.vector.top_k);
    let results = state
        .engine
        .retriever()
        .retrieve_with(&request.query, top_k, request.conversation_id.as_deref())
        .await;
    let count = results.len();
    Json(SearchResponse { results, count })
}

async fn vector_stats(State(state): State<Arc<AppState>>) -> Result<Json<IndexStats>, ApiError> {
    state
        .engine
        .retriever()
        .stats()
        .await
        .map(Json)
        .map_err(api_error)
}

/// Vector clear query parameters.
#[derive(Debug, Deserialize)]
pub struct ClearQuery {
    /// Only this conversation's chunks.
    pub conversation_id: Option<String>,
}

async fn vector_clear(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClearQuery>,
) -> Result<Json<Value>, ApiError> {
    let retriever = state.engine.retriever();
    if !retriever.is_available() {
        return Err(api_error(ChatError::VectorStoreUnavailable));
    }

    let conversation: Option<ConversationId> = match query.conversation_id.as_deref() {
        Some(raw) => Some(
            raw.parse()
                .map_err(|_| bad_request("conversation_id must be a UUID"))?,
        ),
        None => None,
    };
    let cleared = retriever.clear(conversation.as_ref()).await;
    Ok(Json(json!({ "cleared": cleared })))
}

async fn test_provider(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
) -> Result<Json<ConnectionStatus>, ApiError> {
    let provider: Provider = provider.parse().map_err(|_| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown provider: {provider}") })),
        )
    })?;
    Ok(Json(state.engine.dispatcher().test_connection(provider).await))
}
