//! Chat API handlers. Thin request/response mapping around `ChatService`;
//! the streaming RPC is served as SSE with one JSON event per frame.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::Stream;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use parley_chat::types::{
    Completion, ConversationItem, CreateConversationReq, CreateConversationResp,
    ListConversationsReq, ListConversationsResp, ListMessagesReq, ListMessagesResp, ModelListResp,
};

use crate::app::AppState;
use crate::http::error::ApiError;

#[derive(Deserialize)]
pub struct UserQuery {
    #[serde(default)]
    pub user_id: String,
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub page_size: i64,
}

#[derive(Deserialize)]
pub struct UserBody {
    #[serde(default)]
    pub user_id: String,
}

#[derive(Deserialize)]
pub struct CreateConversationBody {
    #[serde(default)]
    pub user_id: String,
    #[serde(flatten)]
    pub req: CreateConversationReq,
}

#[derive(Deserialize)]
pub struct UpdateTitleBody {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Deserialize)]
pub struct StreamBody {
    #[serde(default)]
    pub user_id: String,
    #[serde(flatten)]
    pub req: Completion,
}

pub async fn pull_models(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ModelListResp>, ApiError> {
    Ok(Json(state.chat.pull_models().await?))
}

pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateConversationBody>,
) -> Result<Json<CreateConversationResp>, ApiError> {
    let resp = state.chat.create_conversation(body.req, &body.user_id).await?;
    Ok(Json(resp))
}

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<ListConversationsResp>, ApiError> {
    let req = ListConversationsReq {
        page: q.page,
        page_size: q.page_size,
    };
    Ok(Json(state.chat.list_conversations(req, &q.user_id)?))
}

pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<UserQuery>,
) -> Result<Json<ConversationItem>, ApiError> {
    Ok(Json(state.chat.get_conversation(&id, &q.user_id)?))
}

pub async fn update_title(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateTitleBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .chat
        .update_conversation_title(&id, &body.title, &body.user_id)?;
    Ok(Json(serde_json::json!({})))
}

pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<UserQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.chat.delete_conversation(&id, &q.user_id)?;
    Ok(Json(serde_json::json!({})))
}

pub async fn clear_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UserBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.chat.clear_messages(&id, &body.user_id)?;
    Ok(Json(serde_json::json!({})))
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<ListQuery>,
) -> Result<Json<ListMessagesResp>, ApiError> {
    let req = ListMessagesReq {
        conversation_id: id,
        page: q.page,
        page_size: q.page_size,
    };
    Ok(Json(state.chat.list_messages(req, &q.user_id)?))
}

/// POST /v1/stream — the server-streaming turn.
///
/// One SSE `data:` frame per stream event. Terminal events with a blank
/// conversation id are back-filled with the id this turn resolved to, so a
/// client that started without an id learns where the dialogue lives. If
/// the client disconnects, dropping the response stream closes the message
/// stream, which persists whatever was received and aborts the upstream
/// request.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StreamBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let cancel = CancellationToken::new();
    let (mut stream, conversation_id) = state
        .chat
        .response_stream(body.req, &body.user_id, cancel)
        .await?;

    info!(conversation_id = %conversation_id, "serving stream");
    let sse_stream = async_stream::stream! {
        while let Some((mut ev, done)) = stream.next().await {
            if done && ev.conversation_id.is_empty() {
                ev.conversation_id = conversation_id.clone();
            }
            let json = serde_json::to_string(&ev).unwrap_or_default();
            yield Ok(Event::default().data(json));
            if done {
                break;
            }
        }
    };

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()))
}
