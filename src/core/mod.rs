//! Tutor controllers
//!
//! Session state for the chat tutor and the quiz generator. Controllers are
//! plain state machines; all model access goes through `AiGateway`.

pub mod chat;
pub mod quiz;
mod sessions;

pub use chat::{run_turn, ChatController, ChatEvent, PendingTurn};
pub use quiz::{AnswerError, QuizController, QuizError, QuizPhase, QuizQuestion, QuizView};
pub use sessions::SessionRegistry;
