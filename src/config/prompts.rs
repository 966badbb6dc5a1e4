//! Persona templates and the fixed prompts
//!
//! The tutor persona can be replaced by a TOML file.
//!
//! # Example Persona File
//!
//! ```toml
//! [persona]
//! name = "Cô Lan"
//!
//! [system_prompt]
//! content = """
//! Bạn là Cô Lan, một giáo viên dạy Toán...
//! """
//!
//! [greeting]
//! content = "Chào em! Cô là Cô Lan."
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

/// A persona/prompt template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Persona metadata
    pub persona: PersonaInfo,

    /// The system prompt
    pub system_prompt: SystemPrompt,

    /// First message of every chat session
    #[serde(default)]
    pub greeting: Option<Greeting>,
}

/// Persona metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaInfo {
    /// Display name of the persona
    pub name: String,
}

/// System prompt content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPrompt {
    /// The full system prompt content
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Greeting {
    pub content: String,
}

impl PromptTemplate {
    /// Load a template directly from a file path
    pub async fn load_from_file(path: &Path) -> Result<Self, PromptError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| PromptError::IoError(e.to_string()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, PromptError> {
        let template: PromptTemplate =
            toml::from_str(content).map_err(|e| PromptError::ParseError(e.to_string()))?;

        if template.system_prompt.content.trim().is_empty() {
            return Err(PromptError::ParseError(
                "system_prompt.content must not be empty".to_string(),
            ));
        }
        Ok(template)
    }
}

/// The persona actually used by the running service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub name: String,
    pub system_instruction: String,
    pub greeting: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: builtin::TEACHER_NAME.to_string(),
            system_instruction: builtin::TEACHER.to_string(),
            greeting: builtin::WELCOME.to_string(),
        }
    }
}

impl From<PromptTemplate> for Persona {
    fn from(template: PromptTemplate) -> Self {
        Self {
            name: template.persona.name,
            system_instruction: template.system_prompt.content,
            greeting: template
                .greeting
                .map(|g| g.content)
                .unwrap_or_else(|| builtin::WELCOME.to_string()),
        }
    }
}

/// Errors from prompt loading
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Built-in prompts that don't require files
pub mod builtin {
    pub const TEACHER_NAME: &str = "Thầy Tiêu Quang Thạch";

    /// Tutor persona sent as the system instruction of every chat turn
    pub const TEACHER: &str = r#"Bạn là Thầy Tiêu Quang Thạch, một giáo viên dạy Toán THCS (Trung học cơ sở) tận tâm, vui tính và có kiến thức sâu rộng.
Nhiệm vụ của bạn là giúp học sinh hiểu bài, giải bài tập và ôn thi.

Quy tắc ứng xử:
1. Luôn trả lời thân thiện, xưng hô là "Thầy" và gọi người dùng là "em" hoặc "con".
2. Khi giải toán, hãy trình bày từng bước rõ ràng (Step-by-step).
3. Sử dụng định dạng LaTeX cho các công thức toán học (đặt trong dấu $...$ cho inline hoặc $$...$$ cho block).
4. Khuyến khích học sinh tự suy nghĩ trước khi đưa ra đáp án cuối cùng.
5. Nếu câu hỏi không liên quan đến Toán học hoặc giáo dục, hãy khéo léo từ chối và hướng học sinh quay lại bài học."#;

    pub const WELCOME: &str = "Chào em! Thầy là Tiêu Quang Thạch. Em đang gặp khó khăn với bài toán nào? Hãy gửi đề bài cho thầy nhé!";

    /// Replaces an AI turn whose stream failed
    pub const APOLOGY: &str = "Xin lỗi, thầy đang gặp chút sự cố kết nối. Em thử lại sau nhé!";

    /// Shown when a quiz could not be generated
    pub const QUIZ_FAILED: &str = "Không thể tạo câu hỏi lúc này. Vui lòng thử lại chủ đề khác.";

    /// Prompt asking for `count` multiple-choice questions on `topic`
    pub fn quiz_prompt(topic: &str, count: usize) -> String {
        format!(
            r#"Tạo một bộ {count} câu hỏi trắc nghiệm toán học về chủ đề: "{topic}".
Trả về định dạng JSON thuần túy (không markdown) với cấu trúc:
[
    {{
        "question": "Nội dung câu hỏi",
        "options": ["A. ...", "B. ...", "C. ...", "D. ..."],
        "correctAnswer": "Đáp án đúng (ví dụ: A)",
        "explanation": "Giải thích ngắn gọn"
    }}
]"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_template() {
        let toml_content = r#"
[persona]
name = "Cô Lan"
description = "Giáo viên Toán lớp 9"

[system_prompt]
content = "Bạn là Cô Lan."

[greeting]
content = "Chào em, cô là Cô Lan."
"#;

        let persona: Persona = PromptTemplate::from_toml(toml_content).unwrap().into();
        assert_eq!(persona.name, "Cô Lan");
        assert_eq!(persona.system_instruction, "Bạn là Cô Lan.");
        assert_eq!(persona.greeting, "Chào em, cô là Cô Lan.");
    }

    #[test]
    fn test_minimal_template_keeps_default_greeting() {
        let toml_content = r#"
[persona]
name = "Minimal"

[system_prompt]
content = "Hello"
"#;

        let persona: Persona = PromptTemplate::from_toml(toml_content).unwrap().into();
        assert_eq!(persona.greeting, builtin::WELCOME);
    }

    #[test]
    fn test_empty_system_prompt_rejected() {
        let toml_content = r#"
[persona]
name = "Empty"

[system_prompt]
content = "   "
"#;

        assert!(matches!(
            PromptTemplate::from_toml(toml_content),
            Err(PromptError::ParseError(_))
        ));
    }

    #[test]
    fn test_quiz_prompt_embeds_topic_and_count() {
        let prompt = builtin::quiz_prompt("Phương trình bậc 2", 3);
        assert!(prompt.contains("bộ 3 câu hỏi"));
        assert!(prompt.contains("\"Phương trình bậc 2\""));
        assert!(prompt.contains("\"correctAnswer\""));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let result = PromptTemplate::load_from_file(Path::new("/nonexistent/persona.toml")).await;
        assert!(matches!(result, Err(PromptError::IoError(_))));
    }
}
