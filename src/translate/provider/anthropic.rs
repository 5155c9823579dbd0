//! Anthropic Messages API streaming client, with optional extended thinking.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{
    http_client, require_key, send_with_retry, spawn_sse_pump, GenerationParams, ModelProvider,
    SseEvent,
};
use crate::translate::stream::StreamHandle;
use crate::translate::{ChatMessage, Role, TranslateError};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const FALLBACK_MAX_TOKENS: u32 = 8192;

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl AnthropicClient {
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

fn request_body(messages: &[ChatMessage], params: &GenerationParams) -> Value {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let turns: Vec<Value> = messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| json!({ "role": "user", "content": m.content }))
        .collect();

    let mut body = json!({
        "model": params.model_id,
        "max_tokens": params.max_tokens.unwrap_or(FALLBACK_MAX_TOKENS),
        "messages": turns,
        "stream": true,
    });
    if !system.is_empty() {
        body["system"] = json!(system.join("\n\n"));
    }
    if let Some(budget) = params.thinking_budget {
        body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
    }
    body
}

/// Only `text_delta` content reaches readers; thinking deltas are dropped.
fn decode_event(data: &str) -> SseEvent {
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return SseEvent::Skip;
    };
    match value["type"].as_str() {
        Some("content_block_delta") if value["delta"]["type"] == "text_delta" => {
            match value["delta"]["text"].as_str() {
                Some(text) if !text.is_empty() => SseEvent::Text(text.to_string()),
                _ => SseEvent::Skip,
            }
        }
        Some("message_stop") => SseEvent::Done,
        Some("error") => SseEvent::Error(
            value["error"]["message"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string(),
        ),
        _ => SseEvent::Skip,
    }
}

#[async_trait]
impl ModelProvider for AnthropicClient {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<StreamHandle, TranslateError> {
        let api_key = require_key(&self.api_key, self.name())?;
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let body = request_body(messages, params);

        let response = send_with_retry(self.name(), || {
            self.http
                .post(&url)
                .header("x-api-key", api_key)
                .header("anthropic-version", API_VERSION)
                .json(&body)
        })
        .await?;
        info!(
            model = params.model_id,
            thinking = params.thinking_budget.is_some(),
            "anthropic accepted request"
        );

        let (writer, handle) = StreamHandle::channel();
        spawn_sse_pump(self.name(), response, writer, decode_event);
        Ok(handle)
    }
}
