//! Web chat endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{ok, page, ApiError, ApiResult, AppState};
use crate::chat::{Inbound, Reply};
use crate::store::{Channel, ChatMessage, MessageSource};

/// Longest accepted session id.
const MAX_SESSION_ID_CHARS: usize = 128;

#[derive(Debug, Deserialize)]
pub(super) struct ChatRequest {
    #[serde(default)]
    session_id: Option<String>,
    message: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct ChatResponse {
    session_id: String,
    conversation_id: String,
    message_id: i64,
    reply: Option<String>,
    source: Option<MessageSource>,
    handoff_id: Option<String>,
}

fn session_id(raw: Option<String>) -> Result<String, ApiError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(uuid::Uuid::new_v4().simple().to_string()),
        Some(id)
            if id.chars().count() <= MAX_SESSION_ID_CHARS
                && id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') =>
        {
            Ok(id.to_owned())
        }
        Some(_) => Err(ApiError::BadRequest(
            "session_id must be alphanumeric, '-' or '_'".to_owned(),
        )),
    }
}

pub(super) async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    let session_id = session_id(request.session_id)?;
    let outcome = state
        .chat
        .handle(Inbound {
            channel: Channel::Web,
            contact: format!("web:{session_id}"),
            name: request.name,
            text: request.message,
        })
        .await?;

    let (reply, source) = match outcome.reply {
        Reply::Text { text, source } => (Some(text), Some(source)),
        Reply::Silent => (None, None),
    };
    ok(ChatResponse {
        session_id,
        conversation_id: outcome.conversation_id,
        message_id: outcome.message_id,
        reply,
        source,
        handoff_id: outcome.handoff_id,
    })
}

#[derive(Debug, Deserialize)]
pub(super) struct PollQuery {
    #[serde(default)]
    after: Option<i64>,
    #[serde(default)]
    limit: Option<usize>,
}

/// Messages after a cursor, so the web widget can pick up agent replies.
pub(super) async fn poll_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<PollQuery>,
) -> ApiResult<Vec<ChatMessage>> {
    let conversation = state.store.conversation(&conversation_id).await?;
    if conversation.channel != Channel::Web {
        return Err(ApiError::NotFound(format!(
            "conversation not found: {conversation_id}"
        )));
    }
    let messages = state
        .store
        .messages(&conversation.id, query.after, page(query.limit))
        .await?;
    ok(messages)
}
