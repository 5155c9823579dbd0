//! DeepSeek chat/completions streaming client (OpenAI-compatible SSE).
//! `deepseek-reasoner` streams `reasoning_content` before the answer; only
//! `content` is forwarded.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{
    http_client, require_key, send_with_retry, spawn_sse_pump, GenerationParams, ModelProvider,
    SseEvent,
};
use crate::translate::stream::StreamHandle;
use crate::translate::{ChatMessage, TranslateError};

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";

pub struct DeepSeekClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl DeepSeekClient {
    pub fn new(api_key: Option<String>) -> Result<Self, TranslateError> {
        Ok(Self {
            http: http_client()?,
            api_key,
            base_url: DEFAULT_BASE_URL.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

fn decode_event(data: &str) -> SseEvent {
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    let Ok(parsed) = serde_json::from_str::<SseChunk>(data) else {
        return SseEvent::Skip;
    };
    if let Some(error) = parsed.error {
        return SseEvent::Error(error.message);
    }
    match parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
    {
        Some(content) if !content.is_empty() => SseEvent::Text(content),
        _ => SseEvent::Skip,
    }
}

#[async_trait]
impl ModelProvider for DeepSeekClient {
    fn name(&self) -> &'static str {
        "deepseek"
    }

    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<StreamHandle, TranslateError> {
        let api_key = require_key(&self.api_key, self.name())?;
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));

        let mut body = json!({
            "model": params.model_id,
            "messages": messages,
            "stream": true,
        });
        if let Some(max_tokens) = params.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let response = send_with_retry(self.name(), || {
            self.http
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
        })
        .await?;
        info!(model = params.model_id, "deepseek accepted request");

        let (writer, handle) = StreamHandle::channel();
        spawn_sse_pump(self.name(), response, writer, decode_event);
        Ok(handle)
    }
}

// --- SSE response types ---

#[derive(Deserialize)]
struct SseChunk {
    #[serde(default)]
    choices: Vec<SseChoice>,
    error: Option<SseError>,
}

#[derive(Deserialize)]
struct SseChoice {
    delta: SseDelta,
}

#[derive(Deserialize)]
struct SseDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct SseError {
    message: String,
}
