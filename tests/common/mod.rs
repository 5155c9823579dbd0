//! Hand-written collaborators for driving the handler without a network.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use chapterflow::metrics::MetricsRegistry;
use chapterflow::translate::cache::{CacheConfig, EntryState, ResultCache};
use chapterflow::translate::extract::ContentFetcher;
use chapterflow::translate::glossary::NamesGlossary;
use chapterflow::translate::handler::RequestHandler;
use chapterflow::translate::pipeline::TranslationPipeline;
use chapterflow::translate::prompt::PromptStore;
use chapterflow::translate::provider::{GenerationParams, ModelProvider, ProviderRouter};
use chapterflow::translate::stream::StreamHandle;
use chapterflow::translate::{ChatMessage, ModelKind, Role, TranslateError};

/// Returns `raw <url>` for every URL. Fetches can be held at a gate and
/// individual URLs can be made to fail.
#[derive(Default)]
pub struct FakeFetcher {
    calls: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeFetcher {
    /// Every fetch waits for a permit from the returned semaphore.
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (fetcher, gate)
    }

    pub fn fail_on(&self, url: &str) {
        self.failing.lock().insert(url.to_string());
    }

    pub fn recover(&self, url: &str) {
        self.failing.lock().remove(url);
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ContentFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<String, TranslateError> {
        *self.calls.lock().entry(url.to_string()).or_default() += 1;
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| TranslateError::FetchError(e.to_string()))?
                .forget();
        }
        if self.failing.lock().contains(url) {
            return Err(TranslateError::FetchError(format!("{url}: 503")));
        }
        Ok(format!("raw {url}"))
    }
}

/// Echoes the user message back as a finished one-chunk stream and records
/// every system prompt it was given. Can be switched to streams that fail
/// after a partial chunk.
#[derive(Default)]
pub struct FakeProvider {
    system_prompts: Mutex<Vec<String>>,
    calls: Mutex<usize>,
    stream_failure: Mutex<Option<String>>,
}

impl FakeProvider {
    pub fn fail_streams(&self, message: &str) {
        *self.stream_failure.lock() = Some(message.to_string());
    }

    pub fn heal_streams(&self) {
        *self.stream_failure.lock() = None;
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }

    pub fn system_prompts(&self) -> Vec<String> {
        self.system_prompts.lock().clone()
    }
}

#[async_trait]
impl ModelProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> Result<StreamHandle, TranslateError> {
        *self.calls.lock() += 1;
        let mut user = String::new();
        for message in messages {
            match message.role {
                Role::System => self.system_prompts.lock().push(message.content.clone()),
                Role::User => user = message.content.clone(),
            }
        }
        if let Some(message) = self.stream_failure.lock().clone() {
            let (writer, handle) = StreamHandle::channel();
            writer.push("partial");
            writer.fail(message);
            return Ok(handle);
        }
        Ok(StreamHandle::from_text(format!("translated: {user}")))
    }
}

pub struct Harness {
    pub handler: Arc<RequestHandler>,
    pub fetcher: Arc<FakeFetcher>,
    pub provider: Arc<FakeProvider>,
    pub metrics: Arc<MetricsRegistry>,
}

impl Harness {
    pub fn new(fetcher: FakeFetcher) -> Self {
        Self::with_cache(fetcher, CacheConfig::default())
    }

    pub fn with_cache(fetcher: FakeFetcher, cache: CacheConfig) -> Self {
        let fetcher = Arc::new(fetcher);
        let provider = Arc::new(FakeProvider::default());
        let metrics = Arc::new(MetricsRegistry::new());

        let mut router = ProviderRouter::new(None);
        for model in ModelKind::ALL {
            router = router.register(model, Arc::clone(&provider) as Arc<dyn ModelProvider>);
        }
        let prompts = Arc::new(PromptStore::new(NamesGlossary::empty()));
        let pipeline = Arc::new(TranslationPipeline::new(
            Arc::clone(&fetcher) as Arc<dyn ContentFetcher>,
            prompts,
            router,
            Arc::clone(&metrics),
        ));
        let handler = Arc::new(RequestHandler::new(
            Arc::new(ResultCache::new(cache)),
            pipeline,
        ));
        Self {
            handler,
            fetcher,
            provider,
            metrics,
        }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        self.handler.cache()
    }
}

/// Yield until `key` reaches `state`; background tasks run in between.
pub async fn settle_on(
    cache: &ResultCache,
    key: &chapterflow::translate::cache::CacheKey,
    state: Option<EntryState>,
) {
    for _ in 0..1000 {
        if cache.state(key) == state {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("{key} never reached {state:?}, now {:?}", cache.state(key));
}

/// Yield until counter `name` reaches `value`.
pub async fn settle_count(metrics: &MetricsRegistry, name: &str, value: u64) {
    for _ in 0..1000 {
        if metrics.count(name) == value {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("counter {name} never reached {value}, now {}", metrics.count(name));
}

/// Yield until `fetcher` has seen `calls` fetches of `url`.
pub async fn settle_fetches(fetcher: &FakeFetcher, url: &str, calls: usize) {
    for _ in 0..1000 {
        if fetcher.calls(url) == calls {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("{url} fetched {} times, expected {calls}", fetcher.calls(url));
}
