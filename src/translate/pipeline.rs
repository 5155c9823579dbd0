//! Fetch → prompt → provider. Returns the live stream as soon as the provider
//! accepts the request; generation continues in the background.

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tracing::{debug, info, warn};

use super::extract::ContentFetcher;
use super::prompt::PromptStore;
use super::provider::ProviderRouter;
use super::stream::StreamHandle;
use super::{ModelKind, Mode, TranslateError};
use crate::metrics::{metric_names, MetricsRegistry};

pub struct TranslationPipeline {
    fetcher: Arc<dyn ContentFetcher>,
    prompts: Arc<PromptStore>,
    router: ProviderRouter,
    metrics: Arc<MetricsRegistry>,
}

impl TranslationPipeline {
    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        prompts: Arc<PromptStore>,
        router: ProviderRouter,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            fetcher,
            prompts,
            router,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub async fn run(
        &self,
        url: &str,
        mode: Mode,
        model: ModelKind,
    ) -> Result<StreamHandle, TranslateError> {
        // Resolve the provider first so an unusable model costs no fetch.
        let (provider, params) = self.router.route(model)?;

        let fetch_span = self.metrics.span(metric_names::FETCH_DONE);
        let content = self.fetcher.fetch(url).await?;
        fetch_span.finish();

        let messages = self.prompts.messages(mode, &content);

        let start = Instant::now();
        let handle = provider.generate_stream(&messages, &params).await?;
        let accept_us = start.elapsed().as_micros() as f64;
        self.metrics.record(metric_names::PROVIDER_ACCEPTED, accept_us);
        info!(
            url = %url,
            mode = %mode,
            model = %model,
            provider = provider.name(),
            stream_id = %handle.id(),
            accept_ms = accept_us / 1000.0,
            "translation stream started"
        );

        self.observe(&handle, url, start);
        Ok(handle)
    }

    /// Record first-chunk and completion timings without holding up callers.
    fn observe(&self, handle: &StreamHandle, url: &str, start: Instant) {
        let metrics = Arc::clone(&self.metrics);
        let mut reader = Box::pin(handle.reader());
        let stream_id = handle.id();
        let url = url.to_string();

        tokio::spawn(async move {
            let mut chars = 0usize;
            let mut first = true;
            while let Some(item) = reader.next().await {
                match item {
                    Ok(chunk) => {
                        if first {
                            first = false;
                            metrics.record(
                                metric_names::STREAM_FIRST_CHUNK,
                                start.elapsed().as_micros() as f64,
                            );
                        }
                        chars += chunk.chars().count();
                    }
                    Err(failure) => {
                        warn!(url = %url, stream_id = %stream_id, error = %failure, "translation stream failed");
                        return;
                    }
                }
            }
            let elapsed_us = start.elapsed().as_micros() as f64;
            metrics.record(metric_names::STREAM_DONE, elapsed_us);
            debug!(
                url = %url,
                stream_id = %stream_id,
                chars,
                elapsed_ms = elapsed_us / 1000.0,
                "translation stream finished"
            );
        });
    }
}
