//! Thầy Thạch - Math tutoring API
//!
//! Serves a streaming chat tutor and a multiple-choice quiz generator for
//! secondary-school math, both backed by Google Gemini. Each browser tab
//! opens its own chat and quiz session; sessions are kept in memory only.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod conversation;
mod core;
mod providers;
mod render;
mod routes;

use crate::config::{Config, Persona};
use crate::core::{ChatController, QuizController, SessionRegistry};
use crate::providers::{AiGateway, GeminiProvider};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub persona: Arc<Persona>,
    pub gateway: Arc<dyn AiGateway>,
    pub chats: Arc<SessionRegistry<ChatController>>,
    pub quizzes: Arc<SessionRegistry<QuizController>>,
}

impl AppState {
    pub fn new(config: Config, persona: Persona, gateway: Arc<dyn AiGateway>) -> Self {
        Self {
            config,
            persona: Arc::new(persona),
            gateway,
            chats: Arc::new(SessionRegistry::new()),
            quizzes: Arc::new(SessionRegistry::new()),
        }
    }

    /// Drop chat and quiz sessions idle for longer than the configured limit
    pub async fn sweep_idle_sessions(&self) -> usize {
        let idle = Duration::from_secs(self.config.session_idle_secs);
        let swept = self.chats.sweep(idle).await + self.quizzes.sweep(idle).await;
        if swept > 0 {
            let chats = self.chats.len().await;
            let quizzes = self.quizzes.len().await;
            tracing::info!(
                swept,
                chats,
                quizzes,
                "Idle sessions dropped"
            );
        }
        swept
    }
}

/// How often idle sessions are looked for
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thay_thach=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let persona = config.load_persona().await?;

    if config.gemini_api_key.is_none() {
        tracing::warn!("GEMINI_API_KEY is not set; chat replies will fall back to the apology and quizzes will fail");
    }

    let gateway = GeminiProvider::new(config.gemini(&persona))?;
    tracing::info!(
        chat_model = %config.chat_model,
        quiz_model = %config.quiz_model,
        persona = %persona.name,
        "🎓 Gemini gateway ready"
    );

    let state = AppState::new(config, persona, Arc::new(gateway));

    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            sweeper.sweep_idle_sessions().await;
        }
    });

    let app = Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("📐 Math tutor API running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
