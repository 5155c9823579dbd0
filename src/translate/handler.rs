//! Request handling: cache lookup / admission, producing through the
//! pipeline, and warming the cache for the next chapter.
//!
//! Production runs on its own task so a caller that goes away does not
//! abort a pipeline other waiters (and the cache) depend on.

use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::cache::{Admission, CacheKey, Lookup, ResultCache};
use super::chapter::next_chapter_url;
use super::pipeline::TranslationPipeline;
use super::stream::StreamHandle;
use super::{TranslateError, TranslationRequest};
use crate::metrics::{metric_names, MetricsRegistry};

/// What a producer does with its result.
enum Settle {
    /// Single-flight producer: complete or fail the admission.
    Admitted(Admission),
    /// Cache-bypassing producer: overwrite the entry on success only.
    Overwrite(CacheKey),
}

pub struct RequestHandler {
    cache: Arc<ResultCache>,
    pipeline: Arc<TranslationPipeline>,
}

impl RequestHandler {
    pub fn new(cache: Arc<ResultCache>, pipeline: Arc<TranslationPipeline>) -> Self {
        Self { cache, pipeline }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    fn metrics(&self) -> &Arc<MetricsRegistry> {
        self.pipeline.metrics()
    }

    /// Resolve `request` to a live stream, then (unless the cache is bypassed)
    /// start warming the next chapter in the background.
    pub async fn handle(
        self: &Arc<Self>,
        request: TranslationRequest,
    ) -> Result<StreamHandle, TranslateError> {
        let span = info_span!(
            "translate",
            request_id = %Uuid::new_v4(),
            url = %request.url,
            mode = %request.mode,
            model = %request.model,
            ignore_cache = request.ignore_cache,
        );
        async move {
            let handle = self.resolve(&request).await?;
            if !request.ignore_cache {
                self.prefetch_next(&request);
            }
            Ok(handle)
        }
        .instrument(span)
        .await
    }

    async fn resolve(
        self: &Arc<Self>,
        request: &TranslationRequest,
    ) -> Result<StreamHandle, TranslateError> {
        let key = CacheKey::new(&request.url, request.mode, request.model);

        if request.ignore_cache {
            self.metrics().incr(metric_names::CACHE_BYPASS);
            info!(key = %key, "cache bypassed, producing fresh translation");
            return self.produce(request.clone(), Settle::Overwrite(key)).await;
        }

        match self.cache.lookup_or_admit(&key) {
            Lookup::Hit(handle) => {
                self.metrics().incr(metric_names::CACHE_HIT);
                info!(key = %key, stream_id = %handle.id(), "cache hit");
                Ok(handle)
            }
            Lookup::Admitted(admission) => {
                self.metrics().incr(metric_names::CACHE_ADMITTED);
                info!(key = %key, "cache miss, producing");
                self.produce(request.clone(), Settle::Admitted(admission)).await
            }
            Lookup::WaitRequired => {
                self.metrics().incr(metric_names::CACHE_WAIT_REQUIRED);
                info!(key = %key, "translation in flight, waiting");
                let wait_span = self.metrics().span(metric_names::CACHE_WAIT);
                let result = self.cache.await_result(&key).await;
                wait_span.finish();
                result
            }
        }
    }

    /// Run the pipeline on a detached task and settle the cache from there.
    async fn produce(
        &self,
        request: TranslationRequest,
        settle: Settle,
    ) -> Result<StreamHandle, TranslateError> {
        let pipeline = Arc::clone(&self.pipeline);
        let cache = Arc::clone(&self.cache);

        let task = tokio::spawn(
            async move {
                match pipeline.run(&request.url, request.mode, request.model).await {
                    Ok(handle) => {
                        let key = match settle {
                            Settle::Admitted(admission) => {
                                let key = admission.key().clone();
                                admission.complete(handle.clone());
                                key
                            }
                            Settle::Overwrite(key) => {
                                cache.store(&key, handle.clone());
                                key
                            }
                        };
                        let metrics = Arc::clone(pipeline.metrics());
                        evict_on_failure(cache, metrics, key, handle.clone());
                        Ok(handle)
                    }
                    Err(e) => {
                        pipeline.metrics().incr(metric_names::PIPELINE_FAILED);
                        warn!(url = %request.url, error = %e, "translation pipeline failed");
                        if let Settle::Admitted(admission) = settle {
                            admission.fail();
                        }
                        Err(e)
                    }
                }
            }
            .in_current_span(),
        );

        task.await.map_err(|e| {
            // A panicking producer drops its admission, which clears the entry.
            error!(error = %e, "translation producer task aborted");
            TranslateError::NoResult
        })?
    }

    /// Fire-and-forget cache warm-up for the chapter after `request`.
    /// Only an absent key starts work; hits and in-flight keys are left alone.
    fn prefetch_next(self: &Arc<Self>, request: &TranslationRequest) {
        let next_url = match next_chapter_url(&request.url) {
            Ok(url) => url,
            Err(e) => {
                debug!(error = %e, "no next chapter to prefetch");
                return;
            }
        };
        let next = TranslationRequest::new(next_url, request.mode, request.model);
        let key = CacheKey::new(&next.url, next.mode, next.model);
        let span = info_span!("prefetch", url = %next.url);
        let this = Arc::clone(self);

        tokio::spawn(
            async move {
                match this.cache.lookup_or_admit(&key) {
                    Lookup::Admitted(admission) => {
                        this.metrics().incr(metric_names::PREFETCH_STARTED);
                        info!(key = %key, "prefetching next chapter");
                        let url = next.url.clone();
                        if let Err(e) = this.produce(next, Settle::Admitted(admission)).await {
                            this.metrics().incr(metric_names::PREFETCH_FAILED);
                            warn!(url = %url, error = %e, "prefetch failed");
                        }
                    }
                    Lookup::Hit(_) | Lookup::WaitRequired => {
                        debug!(key = %key, "next chapter already cached or in flight");
                    }
                }
            }
            .instrument(span),
        );
    }
}

/// Drop `handle` from the cache once it ends in failure, unless a newer
/// stream has replaced it. Failed generations are never replayed.
fn evict_on_failure(
    cache: Arc<ResultCache>,
    metrics: Arc<MetricsRegistry>,
    key: CacheKey,
    handle: StreamHandle,
) {
    tokio::spawn(
        async move {
            if let Err(failure) = handle.closed().await {
                metrics.incr(metric_names::STREAM_FAILED);
                if cache.evict_if(&key, &handle) {
                    warn!(key = %key, error = %failure, "stream failed, next request starts over");
                }
            }
        }
        .in_current_span(),
    );
}
