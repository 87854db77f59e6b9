//! Chat routes: the streaming send-message pipeline, the retry path, and
//! transcript CRUD.
//!
//! `send_message` is the only streaming route.  The turn pipeline
//! ([`crate::turn`]) produces events into a bounded channel; this module
//! adapts that channel onto SSE, one `data:` line per event, flushed as
//! produced.  Response headers disable intermediary buffering so partial
//! output reaches the browser immediately.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header::{HeaderName, HeaderValue, CACHE_CONTROL};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::gateway::{title_preview, DEFAULT_TITLE};
use crate::middleware::auth::CurrentUser;
use crate::schemas::chat::{
    ChatDetailResponse, ChatResponse, MessageResponse, RetitleRequest, RetryRequest,
    RetryResponse, SendMessageRequest,
};
use crate::state::AppState;
use crate::turn::{self, StreamEvent, STREAM_CHANNEL_CAPACITY};
use crate::entities::{ChatStore, MessageStore};

#[derive(OpenApi)]
#[openapi(
    paths(
        send_message,
        retry_from_point,
        list_chats,
        new_chat,
        get_chat,
        delete_chat,
        delete_all_chats,
        retitle_chat
    ),
    components(schemas(
        SendMessageRequest,
        RetryRequest,
        RetitleRequest,
        ChatResponse,
        ChatDetailResponse,
        MessageResponse,
        RetryResponse
    ))
)]
pub struct ChatApi;

/// Register chat routes (all behind the session middleware).
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/send_message", post(send_message))
        .route("/retry", post(retry_from_point))
        .route("/chats", get(list_chats).post(new_chat).delete(delete_all_chats))
        .route("/chats/{id}", get(get_chat).delete(delete_chat))
        .route("/retitle_chat", post(retitle_chat))
}

// ── Streaming send ────────────────────────────────────────────────────────────

/// Send a message and stream the assistant's reply (`POST /api/send_message`).
///
/// Responds with an SSE stream of `start` / `chunk` / `end` events.  The
/// user message is durably persisted before the stream begins; the
/// assistant message is committed when the fragment sequence ends.
#[utoipa::path(
    post,
    path = "/api/send_message",
    tag = "chat",
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "SSE stream of start/chunk/end events"),
        (status = 400, description = "Empty message"),
        (status = 404, description = "Chat not found"),
        (status = 401, description = "No active session"),
    )
)]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Response, ServerError> {
    // Phases 1–3 run before the response starts: any failure here surfaces
    // as a plain JSON error, and no stream is opened.
    let turn_ctx = turn::begin_turn(&state.store, user.id, req.chat_id, &req.message).await?;
    debug!(chat_id = turn_ctx.chat_id, "turn started");

    let (tx, rx) = tokio::sync::mpsc::channel::<StreamEvent>(STREAM_CHANNEL_CAPACITY);
    tokio::spawn(turn::run_stream(
        state.store.as_ref().clone(),
        Arc::clone(&state.gateway),
        turn_ctx,
        tx,
    ));

    let sse_stream = ReceiverStream::new(rx)
        .map(|event| Ok::<Event, Infallible>(Event::default().data(event.to_json())));

    let mut response = Sse::new(sse_stream).into_response();
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    // Tell nginx-style proxies not to buffer the event stream.
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    Ok(response)
}

// ── Retry ─────────────────────────────────────────────────────────────────────

/// Regenerate the reply to a prior user turn (`POST /api/retry`).
///
/// Non-streaming by design: this is a correction path.
#[utoipa::path(
    post,
    path = "/api/retry",
    tag = "chat",
    request_body = RetryRequest,
    responses(
        (status = 200, description = "Fresh assistant message", body = RetryResponse),
        (status = 404, description = "Chat or anchor not found"),
        (status = 401, description = "No active session"),
    )
)]
pub async fn retry_from_point(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<RetryRequest>,
) -> Result<Json<RetryResponse>, ServerError> {
    let assistant = turn::retry_from_anchor(
        &state.store,
        state.gateway.as_ref(),
        user.id,
        req.chat_id,
        &req.anchor_user_text,
        req.truncate,
    )
    .await?;
    Ok(Json(RetryResponse {
        ai_message: assistant.to_response(),
        chat_id: req.chat_id,
    }))
}

// ── Transcript CRUD ───────────────────────────────────────────────────────────

/// List the caller's chats, most recently updated first (`GET /api/chats`).
#[utoipa::path(
    get,
    path = "/api/chats",
    tag = "chat",
    responses(
        (status = 200, description = "Chat list", body = Vec<ChatResponse>),
        (status = 401, description = "No active session"),
    )
)]
pub async fn list_chats(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<Vec<ChatResponse>>, ServerError> {
    let chats = state.store.list_chats(user.id).await?;
    Ok(Json(chats.iter().map(|c| c.to_response()).collect()))
}

/// Create an empty chat (`POST /api/chats`).
#[utoipa::path(
    post,
    path = "/api/chats",
    tag = "chat",
    responses(
        (status = 200, description = "Chat stub", body = ChatDetailResponse),
        (status = 401, description = "No active session"),
    )
)]
pub async fn new_chat(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<ChatDetailResponse>, ServerError> {
    let chat = state.store.create_chat(user.id, DEFAULT_TITLE).await?;
    Ok(Json(ChatDetailResponse {
        chat: chat.to_response(),
        messages: Vec::new(),
    }))
}

/// Fetch one chat with its transcript (`GET /api/chats/{id}`).
#[utoipa::path(
    get,
    path = "/api/chats/{id}",
    tag = "chat",
    responses(
        (status = 200, description = "Chat with messages", body = ChatDetailResponse),
        (status = 404, description = "Chat not found"),
        (status = 401, description = "No active session"),
    )
)]
pub async fn get_chat(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<Json<ChatDetailResponse>, ServerError> {
    let chat = state
        .store
        .get_chat(id, user.id)
        .await?
        .ok_or_else(|| ServerError::NotFound("Chat not found".into()))?;
    let messages = state.store.list_messages(chat.id).await?;
    Ok(Json(ChatDetailResponse {
        chat: chat.to_response(),
        messages: messages.iter().map(|m| m.to_response()).collect(),
    }))
}

/// Delete one chat and its messages (`DELETE /api/chats/{id}`).
#[utoipa::path(
    delete,
    path = "/api/chats/{id}",
    tag = "chat",
    responses(
        (status = 200, description = "Chat deleted", body = serde_json::Value),
        (status = 404, description = "Chat not found"),
        (status = 401, description = "No active session"),
    )
)]
pub async fn delete_chat(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let chat = state
        .store
        .get_chat(id, user.id)
        .await?
        .ok_or_else(|| ServerError::NotFound("Chat not found".into()))?;
    state.store.delete_chat(chat.id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// Delete every chat the caller owns (`DELETE /api/chats`).
#[utoipa::path(
    delete,
    path = "/api/chats",
    tag = "chat",
    responses(
        (status = 200, description = "All chats deleted", body = serde_json::Value),
        (status = 401, description = "No active session"),
    )
)]
pub async fn delete_all_chats(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let deleted = state.store.delete_all_chats(user.id).await?;
    debug!(user_id = user.id, deleted, "deleted all chats");
    Ok(Json(serde_json::json!({ "success": true })))
}

/// Replace a chat's provisional title with a generated one
/// (`POST /api/retitle_chat`).
///
/// Runs after the first reply so title generation never delays it.
#[utoipa::path(
    post,
    path = "/api/retitle_chat",
    tag = "chat",
    request_body = RetitleRequest,
    responses(
        (status = 200, description = "New title", body = serde_json::Value),
        (status = 400, description = "Missing seed text"),
        (status = 404, description = "Chat not found"),
        (status = 401, description = "No active session"),
    )
)]
pub async fn retitle_chat(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<RetitleRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let seed = req.first_message.trim();
    if seed.is_empty() {
        return Err(ServerError::Validation("first_message is required".into()));
    }
    let chat = state
        .store
        .get_chat(req.chat_id, user.id)
        .await?
        .ok_or_else(|| ServerError::NotFound("Chat not found".into()))?;

    // The gateway already falls back to the default title on provider
    // failure; prefer a seed-derived title over that generic default.
    let mut title = state.gateway.generate_title(seed).await;
    if title == DEFAULT_TITLE {
        title = title_preview(seed);
    }
    state.store.rename_chat(chat.id, &title).await?;
    Ok(Json(serde_json::json!({ "success": true, "title": title })))
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn deleting_a_foreign_chat_is_not_found_and_leaves_it_intact() {
        let state = testing::state().await;
        let owner = testing::user(&state, "ada", None).await;
        let intruder = testing::user(&state, "mallory", None).await;
        let chat = state.store.create_chat(owner.id, "private").await.unwrap();
        state.store.append_message(chat.id, "hello", true).await.unwrap();

        let err = delete_chat(
            State(state.clone()),
            Extension(CurrentUser(intruder)),
            Path(chat.id),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));

        assert!(state.store.get_chat(chat.id, owner.id).await.unwrap().is_some());
        assert_eq!(state.store.list_messages(chat.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reading_a_foreign_chat_is_not_found() {
        let state = testing::state().await;
        let owner = testing::user(&state, "ada", None).await;
        let intruder = testing::user(&state, "mallory", None).await;
        let chat = state.store.create_chat(owner.id, "private").await.unwrap();

        let err = get_chat(
            State(state.clone()),
            Extension(CurrentUser(intruder)),
            Path(chat.id),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }
}
