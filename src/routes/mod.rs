//! API routes

mod chat;
mod quiz;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::render::{self, Node};
use crate::AppState;

/// The three views of the tutor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AppRoute {
    Chat,
    Quiz,
    About,
}

impl AppRoute {
    pub const ALL: [AppRoute; 3] = [AppRoute::Chat, AppRoute::Quiz, AppRoute::About];

    pub fn path(self) -> &'static str {
        match self {
            AppRoute::Chat => "/",
            AppRoute::Quiz => "/quiz",
            AppRoute::About => "/about",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AppRoute::Chat => "Hỏi bài tập",
            AppRoute::Quiz => "Luyện thi",
            AppRoute::About => "Giới thiệu",
        }
    }
}

#[derive(Debug, Serialize)]
struct ViewEntry {
    route: AppRoute,
    path: &'static str,
    label: &'static str,
    default: bool,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct AboutResponse {
    title: String,
    description: &'static str,
    persona: String,
    model: String,
    links: Vec<AboutLink>,
}

#[derive(Debug, Serialize)]
struct AboutLink {
    label: &'static str,
    url: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct RenderRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct RenderResponse {
    pub nodes: Vec<Node>,
}

/// Errors returned to API clients as `{ "error": "..." }`
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Session not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    Upstream(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn views() -> Json<Vec<ViewEntry>> {
    Json(
        AppRoute::ALL
            .into_iter()
            .map(|route| ViewEntry {
                route,
                path: route.path(),
                label: route.label(),
                default: route == AppRoute::Chat,
            })
            .collect(),
    )
}

async fn about(State(state): State<AppState>) -> Json<AboutResponse> {
    Json(AboutResponse {
        title: format!("Về {}", state.persona.name),
        description: "Đây là ứng dụng hỗ trợ học tập môn Toán dành cho học sinh THCS. \
            Ứng dụng sử dụng công nghệ AI từ Google (Gemini) để giúp các em giải đáp thắc mắc, \
            tìm phương pháp giải hay và luyện tập các dạng bài tập đa dạng.",
        persona: state.persona.name.clone(),
        model: state.config.chat_model.clone(),
        links: vec![
            AboutLink {
                label: "GitHub",
                url: "https://github.com/tieuquangthach",
            },
            AboutLink {
                label: "Google AI Studio",
                url: "https://aistudio.google.com/",
            },
        ],
    })
}

async fn render_text(Json(request): Json<RenderRequest>) -> Json<RenderResponse> {
    Json(RenderResponse {
        nodes: render::render(&request.text),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/views", get(views))
        .route("/api/about", get(about))
        .route("/api/render", post(render_text))
        .merge(chat::router())
        .merge(quiz::router())
}
