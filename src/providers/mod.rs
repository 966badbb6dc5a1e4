//! AI provider integrations
//!
//! The tutor talks to the model through the [`AiGateway`] trait so the
//! controllers never depend on a concrete HTTP client.

mod gemini;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::conversation::Message;

pub use gemini::{GeminiConfig, GeminiProvider};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

/// Stream of cumulative text snapshots for one AI turn.
///
/// Every item is the full response so far, never a delta.
pub type SnapshotStream = BoxStream<'static, Result<String, ProviderError>>;

#[async_trait]
pub trait AiGateway: Send + Sync {
    /// Start a streaming chat turn.
    ///
    /// `history` holds every message before the new one; the persona and
    /// temperature are supplied by the implementation.
    async fn stream_chat(
        &self,
        history: &[Message],
        text: &str,
    ) -> Result<SnapshotStream, ProviderError>;

    /// Ask for a quiz on `topic`, returned as a JSON array string.
    ///
    /// Failures are logged and degrade to `"[]"`.
    async fn generate_quiz(&self, topic: &str) -> String;
}
