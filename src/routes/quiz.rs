//! Quiz session routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::quiz::failure_notice;
use crate::core::{AnswerError, QuizController, QuizView};
use crate::AppState;

use super::ApiError;

#[derive(Debug, Serialize)]
pub struct QuizSessionView {
    pub id: Uuid,
    #[serde(flatten)]
    pub quiz: QuizView,
}

fn view(id: Uuid, quiz: &QuizController) -> Json<QuizSessionView> {
    Json(QuizSessionView {
        id,
        quiz: quiz.view(),
    })
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub topic: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub question_index: usize,
    /// Full option text as displayed, e.g. `"B. x = 2"`
    pub option: String,
}

async fn session(state: &AppState, id: &Uuid) -> Result<std::sync::Arc<Mutex<QuizController>>, ApiError> {
    state.quizzes.get(id).await.ok_or(ApiError::NotFound)
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<QuizSessionView>) {
    let (id, handle) = state.quizzes.create(QuizController::new()).await;
    tracing::info!(session = %id, "Quiz session opened");
    let body = view(id, &*handle.lock().await);
    (StatusCode::CREATED, body)
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QuizSessionView>, ApiError> {
    let handle = session(&state, &id).await?;
    let quiz = handle.lock().await;
    Ok(view(id, &quiz))
}

async fn generate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<QuizSessionView>, ApiError> {
    if request.topic.trim().is_empty() {
        return Err(ApiError::Unprocessable("Topic must not be empty".into()));
    }

    let handle = session(&state, &id).await?;
    let topic = handle
        .lock()
        .await
        .begin_generate(&request.topic)
        .ok_or_else(|| ApiError::Conflict("A quiz is already being generated".into()))?;

    // Spawned so a dropped request still settles the session
    let gateway = state.gateway.clone();
    let task = tokio::spawn(async move {
        let raw = gateway.generate_quiz(&topic).await;
        let mut quiz = handle.lock().await;
        let settled = quiz.finish_generate(&raw).map(|_| view(id, &quiz));
        settled
    });

    match task.await {
        Ok(Ok(body)) => Ok(body),
        Ok(Err(_)) => Err(ApiError::Upstream(failure_notice().to_string())),
        Err(e) => {
            tracing::error!(session = %id, error = %e, "Quiz generation task failed");
            Err(ApiError::Upstream(failure_notice().to_string()))
        }
    }
}

async fn select_answer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<QuizSessionView>, ApiError> {
    let handle = session(&state, &id).await?;
    let mut quiz = handle.lock().await;
    match quiz.select_answer(request.question_index, &request.option) {
        Ok(()) => Ok(view(id, &quiz)),
        Err(e @ AnswerError::Closed) => Err(ApiError::Conflict(e.to_string())),
        Err(e) => Err(ApiError::Unprocessable(e.to_string())),
    }
}

async fn submit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QuizSessionView>, ApiError> {
    let handle = session(&state, &id).await?;
    let mut quiz = handle.lock().await;
    if !quiz.submit() {
        return Err(ApiError::Conflict(
            "Every question must be answered before submitting".into(),
        ));
    }
    Ok(view(id, &quiz))
}

async fn reset(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QuizSessionView>, ApiError> {
    let handle = session(&state, &id).await?;
    let mut quiz = handle.lock().await;
    if !quiz.reset() {
        return Err(ApiError::Conflict("A quiz is already being generated".into()));
    }
    Ok(view(id, &quiz))
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !state.quizzes.remove(&id).await {
        return Err(ApiError::NotFound);
    }
    tracing::info!(session = %id, "Quiz session closed");
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/quiz/sessions", post(create_session))
        .route("/api/quiz/sessions/:id", get(get_session).delete(close_session))
        .route("/api/quiz/sessions/:id/generate", post(generate))
        .route("/api/quiz/sessions/:id/answers", post(select_answer))
        .route("/api/quiz/sessions/:id/submit", post(submit))
        .route("/api/quiz/sessions/:id/reset", post(reset))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::StatusCode;
    use serde_json::{json, Value};

    use crate::config::prompts_builtin;
    use crate::providers::testing::{ScriptedGateway, THREE_QUESTIONS};
    use crate::routes::test_support::{app, call, call_json};

    async fn open(app: &axum::Router) -> String {
        let (status, body) = call_json(app, "POST", "/api/quiz/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["phase"], "idle");
        body["id"].as_str().map(str::to_string).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_full_quiz_flow() {
        let app = app(ScriptedGateway::quiz(THREE_QUESTIONS));
        let (_, created) = call_json(&app, "POST", "/api/quiz/sessions", None).await;
        assert_eq!(created["phase"], "idle");
        let id = created["id"].as_str().unwrap().to_string();
        let base = format!("/api/quiz/sessions/{id}");

        let (status, view) = call_json(
            &app,
            "POST",
            &format!("{base}/generate"),
            Some(json!({ "topic": "Phương trình bậc 2" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["phase"], "ready");
        assert_eq!(view["questions"].as_array().unwrap().len(), 3);

        let (status, _) = call_json(&app, "POST", &format!("{base}/submit"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let mut last = Value::Null;
        for (i, option) in ["B. x = \\pm 2", "A. 0", "D. 1"].iter().enumerate() {
            let (status, view) = call_json(
                &app,
                "POST",
                &format!("{base}/answers"),
                Some(json!({ "questionIndex": i, "option": option })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            last = view;
        }
        assert_eq!(last["canSubmit"], true);
        assert_eq!(last["selectedAnswers"]["0"], "B");

        let (status, view) = call_json(&app, "POST", &format!("{base}/submit"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["phase"], "submitted");
        assert_eq!(view["resultsRevealed"], true);
        assert_eq!(view["score"], 2);
        assert_eq!(view["review"][2]["isCorrect"], false);

        let (status, _) = call_json(
            &app,
            "POST",
            &format!("{base}/answers"),
            Some(json!({ "questionIndex": 2, "option": "C. 0" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, view) = call_json(&app, "POST", &format!("{base}/reset"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["phase"], "idle");
        assert!(view["questions"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generation_failure_shows_notice() {
        let app = app(ScriptedGateway::quiz("[]"));
        let (_, created) = call_json(&app, "POST", "/api/quiz/sessions", None).await;
        let id = created["id"].as_str().unwrap().to_string();

        let (status, body) = call_json(
            &app,
            "POST",
            &format!("/api/quiz/sessions/{id}/generate"),
            Some(json!({ "topic": "Hình học" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], prompts_builtin::QUIZ_FAILED);

        let (_, view) = call_json(&app, "GET", &format!("/api/quiz/sessions/{id}"), None).await;
        assert_eq!(view["phase"], "idle");
        assert!(view["questions"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_topic_rejected() {
        let app = app(ScriptedGateway::quiz(THREE_QUESTIONS));
        let id = open(&app).await;

        let (status, _) = call_json(
            &app,
            "POST",
            &format!("/api/quiz/sessions/{id}/generate"),
            Some(json!({ "topic": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_dropped_generate_request_still_settles() {
        let gateway = ScriptedGateway {
            quiz_delay: Some(Duration::from_millis(100)),
            ..ScriptedGateway::quiz(THREE_QUESTIONS)
        };
        let app = app(gateway);
        let id = open(&app).await;
        let base = format!("/api/quiz/sessions/{id}");

        let generate_uri = format!("{base}/generate");
        let pending = call_json(
            &app,
            "POST",
            &generate_uri,
            Some(json!({ "topic": "Phân số" })),
        );
        assert!(tokio::time::timeout(Duration::from_millis(20), pending)
            .await
            .is_err());

        let (_, view) = call_json(&app, "GET", &base, None).await;
        assert_eq!(view["phase"], "generating");
        let (status, _) = call_json(&app, "POST", &format!("{base}/reset"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let mut phase = Value::Null;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let (_, view) = call_json(&app, "GET", &base, None).await;
            phase = view["phase"].clone();
            if phase != "generating" {
                break;
            }
        }
        assert_eq!(phase, "ready");

        let (status, view) = call_json(&app, "POST", &format!("{base}/reset"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["phase"], "idle");
    }

    #[tokio::test]
    async fn test_invalid_answers_are_unprocessable() {
        let app = app(ScriptedGateway::quiz(THREE_QUESTIONS));
        let id = open(&app).await;
        let base = format!("/api/quiz/sessions/{id}");
        call_json(
            &app,
            "POST",
            &format!("{base}/generate"),
            Some(json!({ "topic": "Phương trình bậc 2" })),
        )
        .await;

        let answers = format!("{base}/answers");
        let (status, body) = call_json(
            &app,
            "POST",
            &answers,
            Some(json!({ "questionIndex": 9, "option": "A. 1" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "Question 9 does not exist");

        let (status, _) = call_json(
            &app,
            "POST",
            &answers,
            Some(json!({ "questionIndex": 0, "option": ". x" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (_, view) = call_json(&app, "GET", &base, None).await;
        assert!(view["selectedAnswers"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_answers_before_generation_conflict() {
        let app = app(ScriptedGateway::quiz(THREE_QUESTIONS));
        let id = open(&app).await;

        let (status, _) = call_json(
            &app,
            "POST",
            &format!("/api/quiz/sessions/{id}/answers"),
            Some(json!({ "questionIndex": 0, "option": "A. 1" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_closed_session_is_gone() {
        let app = app(ScriptedGateway::default());
        let id = open(&app).await;
        let uri = format!("/api/quiz/sessions/{id}");

        let (status, _) = call(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = call_json(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Session not found");
    }
}
