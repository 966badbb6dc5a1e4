//! Quiz generation, answering and scoring
//!
//! A quiz session moves through an explicit state machine:
//!
//! ```text
//! Idle ──generate──▶ Generating ──ok──▶ Ready ──submit──▶ Submitted
//!   ▲                    │                                   │
//!   └──────failure───────┘◀──────────────reset───────────────┘
//! ```
//!
//! Answers are selected while `Ready`. Once submitted the selections are
//! frozen until the session is reset or a new topic is generated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::prompts_builtin;
use crate::providers::AiGateway;

/// Number of options every question must carry
pub const OPTIONS_PER_QUESTION: usize = 4;

/// A multiple-choice question as produced by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub question: String,
    /// Each option starts with its letter, e.g. `"B. x = 2"`
    pub options: Vec<String>,
    /// A single letter such as `"B"`
    pub correct_answer: String,
    pub explanation: String,
}

/// Letter of an option: everything before the first `.`, trimmed.
///
/// `"B. x = 2"` gives `"B"`; a string without a dot is returned trimmed.
pub fn answer_letter(option: &str) -> &str {
    option.split('.').next().unwrap_or_default().trim()
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QuizError {
    #[error("Malformed quiz JSON: {0}")]
    Parse(String),

    #[error("Question {index} is invalid: {reason}")]
    Shape { index: usize, reason: String },

    #[error("No questions were generated")]
    Empty,

    #[error("No quiz generation in progress")]
    NotGenerating,
}

/// Why an answer selection was not recorded
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AnswerError {
    #[error("Answers can only be chosen while the quiz is open")]
    Closed,

    #[error("Question {0} does not exist")]
    NoSuchQuestion(usize),

    #[error("Option {0:?} has no letter")]
    NoLetter(String),
}

/// Parse and validate the gateway's JSON output.
///
/// A surrounding Markdown code fence is tolerated. Every question must have
/// text, exactly four options, and a correct answer naming one of them; the
/// correct answer is normalized to its letter.
pub fn parse_questions(raw: &str) -> Result<Vec<QuizQuestion>, QuizError> {
    let questions: Vec<QuizQuestion> =
        serde_json::from_str(strip_code_fence(raw)).map_err(|e| QuizError::Parse(e.to_string()))?;

    if questions.is_empty() {
        return Err(QuizError::Empty);
    }

    questions
        .into_iter()
        .enumerate()
        .map(|(index, q)| validate(index, q))
        .collect()
}

fn validate(index: usize, mut q: QuizQuestion) -> Result<QuizQuestion, QuizError> {
    let shape = |reason: String| QuizError::Shape { index, reason };

    if q.question.trim().is_empty() {
        return Err(shape("empty question text".into()));
    }
    if q.options.len() != OPTIONS_PER_QUESTION {
        return Err(shape(format!(
            "expected {} options, got {}",
            OPTIONS_PER_QUESTION,
            q.options.len()
        )));
    }

    let letters: Vec<&str> = q.options.iter().map(|o| answer_letter(o)).collect();
    if letters.iter().any(|l| l.is_empty()) {
        return Err(shape("option without a letter".into()));
    }
    if letters
        .iter()
        .enumerate()
        .any(|(i, l)| letters[..i].contains(l))
    {
        return Err(shape(format!("duplicate option letters {:?}", letters)));
    }

    let correct = answer_letter(&q.correct_answer).to_string();
    if !letters.contains(&correct.as_str()) {
        return Err(shape(format!(
            "correct answer {:?} matches no option",
            q.correct_answer
        )));
    }

    q.correct_answer = correct;
    Ok(q)
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let body = rest.split_once('\n').map_or("", |(_, body)| body);
            body.trim_end().strip_suffix("```").unwrap_or(body).trim()
        }
        None => trimmed,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuizPhase {
    Idle,
    Generating,
    Ready,
    Submitted,
}

/// Per-question outcome shown once results are revealed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionReview {
    pub index: usize,
    pub selected: Option<String>,
    pub correct_answer: String,
    pub is_correct: bool,
    pub explanation: String,
}

/// Serializable snapshot of a quiz session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizView {
    pub phase: QuizPhase,
    pub topic: String,
    pub questions: Vec<QuizQuestion>,
    pub selected_answers: BTreeMap<usize, String>,
    pub results_revealed: bool,
    pub can_submit: bool,
    /// Present only after submission
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub review: Vec<QuestionReview>,
}

#[derive(Debug)]
pub struct QuizController {
    topic: String,
    questions: Vec<QuizQuestion>,
    selected: BTreeMap<usize, String>,
    phase: QuizPhase,
}

impl Default for QuizController {
    fn default() -> Self {
        Self::new()
    }
}

impl QuizController {
    pub fn new() -> Self {
        Self {
            topic: String::new(),
            questions: Vec::new(),
            selected: BTreeMap::new(),
            phase: QuizPhase::Idle,
        }
    }

    pub fn phase(&self) -> QuizPhase {
        self.phase
    }

    pub fn questions(&self) -> &[QuizQuestion] {
        &self.questions
    }

    pub fn results_revealed(&self) -> bool {
        self.phase == QuizPhase::Submitted
    }

    /// Start generating for `topic`.
    ///
    /// Returns the trimmed topic to send to the gateway, or `None` when the
    /// topic is blank or a generation is already running.
    pub fn begin_generate(&mut self, topic: &str) -> Option<String> {
        let topic = topic.trim();
        if topic.is_empty() {
            return None;
        }
        if self.phase == QuizPhase::Generating {
            tracing::warn!(topic, "Quiz generation already in flight");
            return None;
        }

        self.topic = topic.to_string();
        self.questions.clear();
        self.selected.clear();
        self.phase = QuizPhase::Generating;
        Some(self.topic.clone())
    }

    /// Finish a generation with the gateway's raw output.
    ///
    /// On any parse or shape error the session falls back to `Idle` with no
    /// questions. Ignored unless a generation is running.
    pub fn finish_generate(&mut self, raw: &str) -> Result<usize, QuizError> {
        if self.phase != QuizPhase::Generating {
            return Err(QuizError::NotGenerating);
        }

        match parse_questions(raw) {
            Ok(questions) => {
                let count = questions.len();
                self.questions = questions;
                self.phase = QuizPhase::Ready;
                tracing::info!(topic = %self.topic, count, "Quiz ready");
                Ok(count)
            }
            Err(e) => {
                tracing::error!(topic = %self.topic, error = %e, "Quiz generation failed");
                self.questions.clear();
                self.phase = QuizPhase::Idle;
                Err(e)
            }
        }
    }

    /// Generate a quiz in one step.
    ///
    /// Returns `Ok(None)` when the request was rejected (blank topic or busy).
    pub async fn generate(
        &mut self,
        gateway: &dyn AiGateway,
        topic: &str,
    ) -> Result<Option<usize>, QuizError> {
        let Some(topic) = self.begin_generate(topic) else {
            return Ok(None);
        };
        let raw = gateway.generate_quiz(&topic).await;
        self.finish_generate(&raw).map(Some)
    }

    /// Record the answer for question `index` from the raw option text
    pub fn select_answer(&mut self, index: usize, raw_option: &str) -> Result<(), AnswerError> {
        if self.phase != QuizPhase::Ready {
            return Err(AnswerError::Closed);
        }
        if index >= self.questions.len() {
            return Err(AnswerError::NoSuchQuestion(index));
        }
        let letter = answer_letter(raw_option);
        if letter.is_empty() {
            return Err(AnswerError::NoLetter(raw_option.to_string()));
        }
        self.selected.insert(index, letter.to_string());
        Ok(())
    }

    /// Every question has exactly one selection
    pub fn can_submit(&self) -> bool {
        self.phase == QuizPhase::Ready
            && !self.questions.is_empty()
            && (0..self.questions.len()).all(|i| self.selected.contains_key(&i))
    }

    pub fn submit(&mut self) -> bool {
        if !self.can_submit() {
            return false;
        }
        self.phase = QuizPhase::Submitted;
        tracing::info!(topic = %self.topic, score = self.score(), total = self.questions.len(), "Quiz submitted");
        true
    }

    pub fn score(&self) -> usize {
        self.questions
            .iter()
            .enumerate()
            .filter(|(i, q)| self.selected.get(i) == Some(&q.correct_answer))
            .count()
    }

    /// Back to `Idle`. Refused while a generation is in flight so its result
    /// cannot land in a fresh session.
    pub fn reset(&mut self) -> bool {
        if self.phase == QuizPhase::Generating {
            return false;
        }
        *self = Self::new();
        true
    }

    pub fn view(&self) -> QuizView {
        let revealed = self.results_revealed();
        let review = if revealed {
            self.questions
                .iter()
                .enumerate()
                .map(|(index, q)| {
                    let selected = self.selected.get(&index).cloned();
                    QuestionReview {
                        index,
                        is_correct: selected.as_deref() == Some(q.correct_answer.as_str()),
                        selected,
                        correct_answer: q.correct_answer.clone(),
                        explanation: q.explanation.clone(),
                    }
                })
                .collect()
        } else {
            Vec::new()
        };

        QuizView {
            phase: self.phase,
            topic: self.topic.clone(),
            questions: self.questions.clone(),
            selected_answers: self.selected.clone(),
            results_revealed: revealed,
            can_submit: self.can_submit(),
            score: revealed.then(|| self.score()),
            review,
        }
    }
}

/// Notice shown to the student when generation fails
pub fn failure_notice() -> &'static str {
    prompts_builtin::QUIZ_FAILED
}
