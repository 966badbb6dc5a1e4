//! Chat session routes
//!
//! A message is sent with `POST /api/chat/sessions/:id/messages`; the
//! response is an SSE stream of `message`, `snapshot` and `done` events for
//! that turn.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::conversation::Message;
use crate::core::{run_turn, ChatController, ChatEvent};
use crate::AppState;

use super::ApiError;

/// Buffered events per turn before the turn waits on a slow client
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSessionView {
    pub id: Uuid,
    pub messages: Vec<Message>,
    pub busy: bool,
}

impl ChatSessionView {
    fn new(id: Uuid, chat: &ChatController) -> Self {
        Self {
            id,
            messages: chat.messages().to_vec(),
            busy: chat.is_busy(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub text: String,
}

async fn create_session(
    State(state): State<AppState>,
) -> (StatusCode, Json<ChatSessionView>) {
    let chat = ChatController::new(&state.persona.greeting);
    let (id, handle) = state.chats.create(chat).await;
    let view = ChatSessionView::new(id, &*handle.lock().await);
    tracing::info!(session = %id, "Chat session opened");
    (StatusCode::CREATED, Json(view))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChatSessionView>, ApiError> {
    let handle = state.chats.get(&id).await.ok_or(ApiError::NotFound)?;
    let chat = handle.lock().await;
    Ok(Json(ChatSessionView::new(id, &chat)))
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SendRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if request.text.trim().is_empty() {
        return Err(ApiError::Unprocessable("Message must not be empty".into()));
    }

    let handle = state.chats.get(&id).await.ok_or(ApiError::NotFound)?;
    let turn = handle
        .lock()
        .await
        .begin_turn(&request.text)
        .ok_or_else(|| ApiError::Conflict("A reply is still streaming".into()))?;

    tracing::info!(session = %id, reply_id = %turn.reply_id(), "Chat turn accepted");

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(run_turn(handle, state.gateway.clone(), turn, tx));

    let events = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    })
    .map(|event| Ok::<_, Infallible>(to_sse(&event)));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !state.chats.remove(&id).await {
        return Err(ApiError::NotFound);
    }
    tracing::info!(session = %id, "Chat session closed");
    Ok(StatusCode::NO_CONTENT)
}

fn to_sse(event: &ChatEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to encode chat event");
            Event::default().event("error")
        })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/chat/sessions", post(create_session))
        .route("/api/chat/sessions/:id", get(get_session).delete(close_session))
        .route("/api/chat/sessions/:id/messages", post(send_message))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::config::prompts_builtin;
    use crate::providers::testing::{ScriptedGateway, Step};
    use crate::routes::test_support::{app, call, call_json};

    async fn open(app: &axum::Router) -> String {
        let (status, body) = call_json(app, "POST", "/api/chat/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_new_session_has_welcome() {
        let app = app(ScriptedGateway::default());
        let id = open(&app).await;

        let (status, body) = call_json(&app, "GET", &format!("/api/chat/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["busy"], false);
        assert_eq!(body["messages"][0]["id"], "welcome");
        assert_eq!(body["messages"][0]["text"], prompts_builtin::WELCOME);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let app = app(ScriptedGateway::default());
        let uri = format!("/api/chat/sessions/{}", uuid::Uuid::new_v4());
        let (status, body) = call_json(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Session not found");
    }

    #[tokio::test]
    async fn test_send_streams_events() {
        let app = app(ScriptedGateway::streaming(vec![
            Step::Snapshot("Thầy"),
            Step::Snapshot("Thầy giải nhé"),
        ]));
        let id = open(&app).await;
        let uri = format!("/api/chat/sessions/{id}/messages");

        let (status, body) = call(&app, "POST", &uri, Some(json!({ "text": "Giải giúp em" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.matches("event: message").count(), 2);
        assert_eq!(body.matches("event: snapshot").count(), 2);
        assert!(body.contains("event: done"));
        assert!(body.contains("Thầy giải nhé"));

        let (_, session) = call_json(&app, "GET", &format!("/api/chat/sessions/{id}"), None).await;
        let messages = session["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["sender"], "user");
        assert_eq!(messages[2]["text"], "Thầy giải nhé");
        assert_eq!(messages[2]["isStreaming"], false);
        assert_eq!(session["busy"], false);
    }

    #[tokio::test]
    async fn test_failed_turn_stores_apology() {
        let app = app(ScriptedGateway::streaming(vec![
            Step::Snapshot("Một nửa"),
            Step::Fail("upstream 503"),
        ]));
        let id = open(&app).await;
        let uri = format!("/api/chat/sessions/{id}/messages");

        let (_, body) = call(&app, "POST", &uri, Some(json!({ "text": "Hỏi" }))).await;
        assert!(body.contains("event: done"));
        assert!(!body.contains("upstream 503"));

        let (_, session) = call_json(&app, "GET", &format!("/api/chat/sessions/{id}"), None).await;
        assert_eq!(session["messages"][2]["text"], prompts_builtin::APOLOGY);
        assert_eq!(session["messages"][2]["isStreaming"], false);
    }

    #[tokio::test]
    async fn test_closed_session_is_gone() {
        let app = app(ScriptedGateway::default());
        let id = open(&app).await;
        let uri = format!("/api/chat/sessions/{id}");

        let (status, _) = call(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call_json(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_blank_message_rejected() {
        let app = app(ScriptedGateway::default());
        let id = open(&app).await;
        let uri = format!("/api/chat/sessions/{id}/messages");

        let (status, _) = call_json(&app, "POST", &uri, Some(json!({ "text": "   " }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (_, session) = call_json(&app, "GET", &format!("/api/chat/sessions/{id}"), None).await;
        assert_eq!(session["messages"].as_array().unwrap().len(), 1);
    }
}
