//! Model providers: streaming chat generation behind one trait.
//! Shared plumbing: connection-pooled client, retry on 429/5xx/timeouts,
//! incremental SSE line parsing, and the task that pumps an accepted
//! response body into a [`StreamWriter`].

pub mod anthropic;
pub mod deepseek;
pub mod gemini;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use tracing::{debug, warn};

use super::stream::{StreamHandle, StreamWriter};
use super::{ChatMessage, ModelKind, TranslateError};

/// Streaming text generation. Returns once the upstream has accepted the
/// request; the body keeps streaming into the returned handle.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<StreamHandle, TranslateError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SafetySetting {
    pub category: &'static str,
    pub threshold: &'static str,
}

const fn block_none(category: &'static str) -> SafetySetting {
    SafetySetting {
        category,
        threshold: "BLOCK_NONE",
    }
}

static SAFETY_CURRENT: [SafetySetting; 5] = [
    block_none("HARM_CATEGORY_HATE_SPEECH"),
    block_none("HARM_CATEGORY_DANGEROUS_CONTENT"),
    block_none("HARM_CATEGORY_HARASSMENT"),
    block_none("HARM_CATEGORY_SEXUALLY_EXPLICIT"),
    block_none("HARM_CATEGORY_CIVIC_INTEGRITY"),
];

// The older model predates the civic integrity category.
static SAFETY_LEGACY: [SafetySetting; 4] = [
    block_none("HARM_CATEGORY_HATE_SPEECH"),
    block_none("HARM_CATEGORY_DANGEROUS_CONTENT"),
    block_none("HARM_CATEGORY_SEXUALLY_EXPLICIT"),
    block_none("HARM_CATEGORY_HARASSMENT"),
];

/// Per-model generation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationParams {
    pub model_id: &'static str,
    pub max_tokens: Option<u32>,
    /// Extended-thinking budget (Anthropic).
    pub thinking_budget: Option<u32>,
    /// Gemini safety thresholds.
    pub safety_settings: &'static [SafetySetting],
}

impl GenerationParams {
    pub fn for_model(model: ModelKind, thinking_budget: Option<u32>) -> Self {
        match model {
            ModelKind::Google => Self {
                model_id: "gemini-2.5-pro-preview-05-06",
                max_tokens: None,
                thinking_budget: None,
                safety_settings: &SAFETY_CURRENT,
            },
            ModelKind::Legacy => Self {
                model_id: "gemini-1.5-pro-latest",
                max_tokens: None,
                thinking_budget: None,
                safety_settings: &SAFETY_LEGACY,
            },
            ModelKind::Anthropic => Self {
                model_id: "claude-4-sonnet-20250514",
                max_tokens: Some(32_000),
                // Budget must stay below max_tokens.
                thinking_budget: thinking_budget.filter(|b| *b > 0).map(|b| b.min(31_000)),
                safety_settings: &[],
            },
            ModelKind::Deepseek => Self {
                model_id: "deepseek-reasoner",
                max_tokens: Some(8192),
                thinking_budget: None,
                safety_settings: &[],
            },
        }
    }
}

/// Maps each model selection to the provider serving it.
#[derive(Clone, Default)]
pub struct ProviderRouter {
    providers: HashMap<ModelKind, Arc<dyn ModelProvider>>,
    thinking_budget: Option<u32>,
}

impl ProviderRouter {
    pub fn new(thinking_budget: Option<u32>) -> Self {
        Self {
            providers: HashMap::new(),
            thinking_budget,
        }
    }

    pub fn register(mut self, model: ModelKind, provider: Arc<dyn ModelProvider>) -> Self {
        self.providers.insert(model, provider);
        self
    }

    pub fn route(
        &self,
        model: ModelKind,
    ) -> Result<(Arc<dyn ModelProvider>, GenerationParams), TranslateError> {
        let provider = self.providers.get(&model).ok_or_else(|| {
            TranslateError::ProviderError(format!("no provider registered for model {model}"))
        })?;
        Ok((
            Arc::clone(provider),
            GenerationParams::for_model(model, self.thinking_budget),
        ))
    }
}

/// HTTP client shared by the provider implementations. No overall timeout:
/// a generation can stream for minutes.
pub(crate) fn http_client() -> Result<reqwest::Client, TranslateError> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(90))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| TranslateError::ProviderError(e.to_string()))
}

pub(crate) fn require_key<'a>(
    key: &'a Option<String>,
    provider: &str,
) -> Result<&'a str, TranslateError> {
    key.as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| TranslateError::ProviderError(format!("{provider} API key not configured")))
}

/// Send with retry.
/// 429: Retry-After or 1s/2s/4s (max 3).
/// 5xx: exponential backoff from 500ms (max 2).
/// Timeout: immediate retry once.
pub(crate) async fn send_with_retry(
    provider: &str,
    build: impl Fn() -> reqwest::RequestBuilder,
) -> Result<reqwest::Response, TranslateError> {
    let mut attempt: u32 = 0;
    let max_429_retries: u32 = 3;
    let max_5xx_retries: u32 = 2;
    let mut timeout_retried = false;

    loop {
        match build().send().await {
            Ok(resp) if resp.status().is_success() => return Ok(resp),
            Ok(resp) if resp.status().as_u16() == 429 => {
                if attempt >= max_429_retries {
                    return Err(TranslateError::ProviderError(format!(
                        "{provider}: rate limited"
                    )));
                }
                let wait = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| Duration::from_secs(1 << attempt));
                warn!(provider, attempt, wait_ms = wait.as_millis() as u64, "429 rate limited, retrying");
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Ok(resp) if resp.status().is_server_error() => {
                if attempt >= max_5xx_retries {
                    return Err(TranslateError::ProviderError(format!(
                        "{provider}: server error {}",
                        resp.status()
                    )));
                }
                let wait = Duration::from_millis(500 * (1 << attempt));
                warn!(
                    provider,
                    attempt,
                    status = resp.status().as_u16(),
                    wait_ms = wait.as_millis() as u64,
                    "5xx error, retrying"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Ok(resp) => {
                let status = resp.status();
                let body_text = resp.text().await.unwrap_or_default();
                return Err(TranslateError::ProviderError(format!(
                    "{provider}: unexpected status {}: {}",
                    status,
                    body_text.chars().take(200).collect::<String>()
                )));
            }
            Err(e) if e.is_timeout() => {
                if timeout_retried {
                    return Err(TranslateError::ProviderError(format!(
                        "{provider}: request timed out"
                    )));
                }
                warn!(provider, "request timeout, retrying once");
                timeout_retried = true;
            }
            Err(e) => {
                return Err(TranslateError::ProviderError(format!("{provider}: {e}")));
            }
        }
    }
}

/// Interpretation of one SSE `data:` payload.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseEvent {
    Text(String),
    Skip,
    Done,
    Error(String),
}

/// Splits a byte stream into SSE `data:` payloads. Bytes are buffered until a
/// full line arrives so multi-byte characters split across chunks survive.
#[derive(Default)]
pub(crate) struct SseLineBuffer {
    buf: Vec<u8>,
}

impl SseLineBuffer {
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(newline_pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=newline_pos).collect();
            if let Some(data) = data_payload(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Payload of a trailing line that never got its newline.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buf);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    let data = line.strip_prefix("data:")?.trim_start();
    Some(data.to_string())
}

/// Drain an accepted SSE response into `writer` on a background task.
pub(crate) fn spawn_sse_pump(
    provider: &'static str,
    response: reqwest::Response,
    writer: StreamWriter,
    decode: fn(&str) -> SseEvent,
) {
    tokio::spawn(async move {
        let mut stream = response.bytes_stream();
        let mut lines = SseLineBuffer::default();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(provider, error = %e, "stream body error");
                    writer.fail(format!("{provider}: {e}"));
                    return;
                }
            };
            for data in lines.feed(&bytes) {
                match decode(&data) {
                    SseEvent::Text(text) => writer.push(text),
                    SseEvent::Skip => {}
                    SseEvent::Done => {
                        debug!(provider, "stream done");
                        writer.finish();
                        return;
                    }
                    SseEvent::Error(msg) => {
                        warn!(provider, error = %msg, "provider reported stream error");
                        writer.fail(format!("{provider}: {msg}"));
                        return;
                    }
                }
            }
        }

        if let Some(data) = lines.finish() {
            match decode(&data) {
                SseEvent::Text(text) => writer.push(text),
                SseEvent::Error(msg) => {
                    writer.fail(format!("{provider}: {msg}"));
                    return;
                }
                SseEvent::Skip | SseEvent::Done => {}
            }
        }
        debug!(provider, "stream body ended");
        writer.finish();
    });
}
