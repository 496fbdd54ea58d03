//! Nudge message generation.
//!
//! A [`MessageGenerator`] turns a task and the user's recent moods into a
//! short reminder. Output is untrusted: [`validate_message`] normalizes it
//! and rejects anything empty or longer than [`MAX_MESSAGE_CHARS`].

mod mock;
mod openai;
mod prompt;
mod template;

pub use mock::ScriptedGenerator;
pub use openai::OpenAiGenerator;
pub use prompt::{system_prompt, user_prompt};
pub use template::TemplateGenerator;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::collab::EmotionEntry;
use crate::storage::{GeneratorConfig, GeneratorProvider};

/// Longest accepted message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 200;

/// Everything a generator may look at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NudgeContext {
    pub user: String,
    pub task: String,
    pub title: String,
    pub description: String,
    pub due: Option<DateTime<Utc>>,
    /// Newest first.
    pub recent_emotions: Vec<EmotionEntry>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    #[error("API key not set (expected in ${0})")]
    MissingApiKey(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("rate limited")]
    RateLimited,

    #[error("unexpected response: {0}")]
    Parse(String),

    #[error("generated message is empty")]
    Empty,

    #[error("generated message is {len} characters, limit is {max}")]
    TooLong { len: usize, max: usize },
}

#[async_trait]
pub trait MessageGenerator: Send + Sync + std::fmt::Debug {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    async fn generate(&self, context: &NudgeContext) -> Result<String, GeneratorError>;
}

const QUOTE_PAIRS: &[(char, char)] = &[('"', '"'), ('\'', '\''), ('\u{201c}', '\u{201d}'), ('`', '`')];

/// Trim, drop one layer of wrapping quotes, and enforce the length limit.
///
/// # Errors
/// Returns `Empty` or `TooLong`.
pub fn validate_message(raw: &str) -> Result<String, GeneratorError> {
    let mut text = raw.trim();
    for &(open, close) in QUOTE_PAIRS {
        if let Some(inner) = text
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
        {
            text = inner.trim();
            break;
        }
    }
    if text.is_empty() {
        return Err(GeneratorError::Empty);
    }
    let len = text.chars().count();
    if len > MAX_MESSAGE_CHARS {
        return Err(GeneratorError::TooLong {
            len,
            max: MAX_MESSAGE_CHARS,
        });
    }
    Ok(text.to_string())
}

/// Build the configured generator.
///
/// # Errors
/// Returns `MissingApiKey` when the hosted OpenAI endpoint is selected but
/// the key variable is unset, or `Network` if the HTTP client cannot be built.
pub fn from_config(config: &GeneratorConfig) -> Result<Arc<dyn MessageGenerator>, GeneratorError> {
    match config.provider {
        GeneratorProvider::Template => Ok(Arc::new(TemplateGenerator::new())),
        GeneratorProvider::Openai => {
            let api_key = std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.trim().is_empty());
            // Local OpenAI-compatible servers usually run without a key.
            if api_key.is_none() && config.base_url.contains("api.openai.com") {
                return Err(GeneratorError::MissingApiKey(config.api_key_env.clone()));
            }
            Ok(Arc::new(OpenAiGenerator::new(config, api_key)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_trims_and_unquotes() {
        assert_eq!(validate_message("  \"Go for it!\"  ").unwrap(), "Go for it!");
        assert_eq!(validate_message("\u{201c}Start now\u{201d}").unwrap(), "Start now");
        assert_eq!(validate_message("It's time").unwrap(), "It's time");
    }

    #[test]
    fn validate_rejects_empty_and_quoted_empty() {
        assert_eq!(validate_message("   "), Err(GeneratorError::Empty));
        assert_eq!(validate_message("\" \""), Err(GeneratorError::Empty));
    }

    #[test]
    fn validate_counts_characters_not_bytes() {
        let exactly = "é".repeat(MAX_MESSAGE_CHARS);
        assert!(validate_message(&exactly).is_ok());
        let over = "a".repeat(MAX_MESSAGE_CHARS + 1);
        assert_eq!(
            validate_message(&over),
            Err(GeneratorError::TooLong {
                len: MAX_MESSAGE_CHARS + 1,
                max: MAX_MESSAGE_CHARS
            })
        );
    }

    #[test]
    fn from_config_defaults_to_templates() {
        let generator = from_config(&GeneratorConfig::default()).unwrap();
        assert_eq!(generator.name(), "template");
    }

    #[test]
    fn from_config_requires_key_for_hosted_openai() {
        let config = GeneratorConfig {
            provider: GeneratorProvider::Openai,
            api_key_env: "NUDGEROOM_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..GeneratorConfig::default()
        };
        assert!(matches!(
            from_config(&config),
            Err(GeneratorError::MissingApiKey(_))
        ));

        let local = GeneratorConfig {
            base_url: "http://localhost:11434/v1".into(),
            ..config
        };
        assert_eq!(from_config(&local).unwrap().name(), "openai");
    }
}
