//! Application configuration

pub mod prompts;

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::providers::GeminiConfig;

pub use prompts::{builtin as prompts_builtin, Persona, PromptTemplate};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing)]
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub chat_model: String,
    pub quiz_model: String,
    pub chat_temperature: f32,
    pub request_timeout_secs: u64,
    pub quiz_question_count: usize,
    /// Sessions untouched this long are dropped
    pub session_idle_secs: u64,
    pub persona_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let gemini = GeminiConfig::default();
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            gemini_api_key: None,
            gemini_base_url: gemini.base_url,
            chat_model: gemini.chat_model,
            quiz_model: gemini.quiz_model,
            chat_temperature: gemini.temperature,
            request_timeout_secs: gemini.timeout_secs,
            quiz_question_count: gemini.quiz_question_count,
            session_idle_secs: 3600,
            persona_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let quiz_question_count = parsed(&var, "QUIZ_QUESTION_COUNT")?
            .unwrap_or(defaults.quiz_question_count);
        if quiz_question_count == 0 {
            anyhow::bail!("QUIZ_QUESTION_COUNT must be at least 1");
        }

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parsed(&var, "PORT")?.unwrap_or(defaults.port),
            gemini_api_key: var("GEMINI_API_KEY")
                .or_else(|| var("API_KEY"))
                .filter(|k| !k.trim().is_empty()),
            gemini_base_url: var("GEMINI_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.gemini_base_url),
            chat_model: var("CHAT_MODEL").unwrap_or(defaults.chat_model),
            quiz_model: var("QUIZ_MODEL").unwrap_or(defaults.quiz_model),
            chat_temperature: parsed(&var, "CHAT_TEMPERATURE")?
                .unwrap_or(defaults.chat_temperature),
            request_timeout_secs: parsed(&var, "REQUEST_TIMEOUT_SECS")?
                .unwrap_or(defaults.request_timeout_secs),
            quiz_question_count,
            session_idle_secs: parsed(&var, "SESSION_IDLE_SECS")?
                .unwrap_or(defaults.session_idle_secs),
            persona_file: var("PERSONA_FILE").map(PathBuf::from),
        })
    }

    /// Gemini settings for the given persona
    pub fn gemini(&self, persona: &Persona) -> GeminiConfig {
        GeminiConfig {
            base_url: self.gemini_base_url.clone(),
            api_key: self.gemini_api_key.clone(),
            chat_model: self.chat_model.clone(),
            quiz_model: self.quiz_model.clone(),
            temperature: self.chat_temperature,
            timeout_secs: self.request_timeout_secs,
            system_instruction: persona.system_instruction.clone(),
            quiz_question_count: self.quiz_question_count,
        }
    }

    /// Built-in teacher unless `PERSONA_FILE` points at a template
    pub async fn load_persona(&self) -> Result<Persona, prompts::PromptError> {
        match &self.persona_file {
            Some(path) => {
                let template = PromptTemplate::load_from_file(path).await?;
                tracing::info!(persona = %template.persona.name, path = %path.display(), "Loaded persona");
                Ok(template.into())
            }
            None => Ok(Persona::default()),
        }
    }
}

fn parsed<F, T>(var: &F, key: &str) -> anyhow::Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("invalid {}={:?}: {}", key, raw, e))
        })
        .transpose()
}
