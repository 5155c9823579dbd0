//! Chapter translation: cache, pipeline, and the collaborators they drive.
//! Request flow: handler → cache (single-flight) → pipeline → reader + model provider.

pub mod cache;
pub mod chapter;
pub mod extract;
pub mod glossary;
pub mod handler;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod stream;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Translation genre. Selects the system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Wuxia,
    FantasyTranslate,
    LightNovel,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Wuxia => "wuxia",
            Mode::FantasyTranslate => "fantasy_translate",
            Mode::LightNovel => "light_novel",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = TranslateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wuxia" => Ok(Mode::Wuxia),
            "fantasy_translate" => Ok(Mode::FantasyTranslate),
            "light_novel" => Ok(Mode::LightNovel),
            other => Err(TranslateError::InvalidInput(format!("unknown mode: {other}"))),
        }
    }
}

/// Model selection exposed to clients. Each maps to one upstream model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    #[default]
    Google,
    Anthropic,
    Legacy,
    Deepseek,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::Google,
        ModelKind::Anthropic,
        ModelKind::Legacy,
        ModelKind::Deepseek,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::Google => "google",
            ModelKind::Anthropic => "anthropic",
            ModelKind::Legacy => "legacy",
            ModelKind::Deepseek => "deepseek",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = TranslateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(ModelKind::Google),
            "anthropic" => Ok(ModelKind::Anthropic),
            "legacy" => Ok(ModelKind::Legacy),
            "deepseek" => Ok(ModelKind::Deepseek),
            other => Err(TranslateError::InvalidInput(format!("unknown model: {other}"))),
        }
    }
}

/// One translation request as received by the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    pub url: String,
    pub mode: Mode,
    pub model: ModelKind,
    pub ignore_cache: bool,
}

impl TranslationRequest {
    pub fn new(url: impl Into<String>, mode: Mode, model: ModelKind) -> Self {
        Self {
            url: url.into(),
            mode,
            model,
            ignore_cache: false,
        }
    }

    pub fn ignoring_cache(mut self, ignore_cache: bool) -> Self {
        self.ignore_cache = ignore_cache;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// A single message of the conversation sent to a model provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Translation failures, shared by every stage of the request path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslateError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("content fetch failed: {0}")]
    FetchError(String),
    #[error("provider error: {0}")]
    ProviderError(String),
    #[error("timed out waiting for in-flight translation")]
    Timeout,
    #[error("producer finished without a result")]
    NoResult,
    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_and_model_parse_wire_names() {
        assert_eq!("wuxia".parse::<Mode>().unwrap(), Mode::Wuxia);
        assert_eq!("light_novel".parse::<Mode>().unwrap(), Mode::LightNovel);
        assert_eq!(
            "fantasy_translate".parse::<Mode>().unwrap(),
            Mode::FantasyTranslate
        );
        for model in ModelKind::ALL {
            assert_eq!(model.as_str().parse::<ModelKind>().unwrap(), model);
        }
    }

    #[test]
    fn unknown_names_are_invalid_input() {
        assert!(matches!(
            "romance".parse::<Mode>(),
            Err(TranslateError::InvalidInput(_))
        ));
        assert!(matches!(
            "gpt".parse::<ModelKind>(),
            Err(TranslateError::InvalidInput(_))
        ));
    }

    #[test]
    fn defaults_match_wire_defaults() {
        assert_eq!(Mode::default(), Mode::Wuxia);
        assert_eq!(ModelKind::default(), ModelKind::Google);
    }

    #[test]
    fn chat_message_serializes_lowercase_role() {
        let json = serde_json::to_value(ChatMessage::system("hi")).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "hi");
    }
}
