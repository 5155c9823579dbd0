//! Google Gemini streaming client (`streamGenerateContent?alt=sse`).

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{
    http_client, require_key, send_with_retry, spawn_sse_pump, GenerationParams, ModelProvider,
    SseEvent,
};
use crate::translate::stream::StreamHandle;
use crate::translate::{ChatMessage, Role, TranslateError};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl GeminiClient {
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
    let contents: Vec<Value> = messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| json!({ "role": "user", "parts": [{ "text": m.content }] }))
        .collect();

    let mut body = json!({
        "contents": contents,
        "safetySettings": params.safety_settings,
    });
    if !system.is_empty() {
        body["systemInstruction"] = json!({ "parts": [{ "text": system.join("\n\n") }] });
    }
    if let Some(max_tokens) = params.max_tokens {
        body["generationConfig"] = json!({ "maxOutputTokens": max_tokens });
    }
    body
}

/// Gemini has no end sentinel; the stream simply closes.
fn decode_event(data: &str) -> SseEvent {
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return SseEvent::Skip;
    };
    if let Some(message) = value["error"]["message"].as_str() {
        return SseEvent::Error(message.to_string());
    }
    if let Some(reason) = value["promptFeedback"]["blockReason"].as_str() {
        return SseEvent::Error(format!("prompt blocked: {reason}"));
    }

    let text: String = value["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter(|p| !p["thought"].as_bool().unwrap_or(false))
                .filter_map(|p| p["text"].as_str())
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        SseEvent::Skip
    } else {
        SseEvent::Text(text)
    }
}

#[async_trait]
impl ModelProvider for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<StreamHandle, TranslateError> {
        let api_key = require_key(&self.api_key, self.name())?;
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url.trim_end_matches('/'),
            params.model_id,
            api_key
        );
        let body = request_body(messages, params);

        let response = send_with_retry(self.name(), || self.http.post(&url).json(&body)).await?;
        info!(model = params.model_id, "gemini accepted request");

        let (writer, handle) = StreamHandle::channel();
        spawn_sse_pump(self.name(), response, writer, decode_event);
        Ok(handle)
    }
}
