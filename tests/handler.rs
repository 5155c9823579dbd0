mod common;

use std::time::Duration;

use tokio::task::JoinHandle;

use chapterflow::metrics::metric_names;
use chapterflow::translate::cache::{CacheConfig, CacheKey, EntryState};
use chapterflow::translate::stream::StreamHandle;
use chapterflow::translate::{ModelKind, Mode, TranslateError, TranslationRequest};
use common::{settle_count, settle_fetches, settle_on, FakeFetcher, Harness};

const CH_309: &str = "https://truyenyy.vip/truyen/tien-nghich/chuong-309.html";
const CH_310: &str = "https://truyenyy.vip/truyen/tien-nghich/chuong-310.html";

fn request(url: &str) -> TranslationRequest {
    TranslationRequest::new(url, Mode::Wuxia, ModelKind::Google)
}

fn key(url: &str) -> CacheKey {
    CacheKey::new(url, Mode::Wuxia, ModelKind::Google)
}

fn spawn_handle(
    h: &Harness,
    request: TranslationRequest,
) -> JoinHandle<Result<StreamHandle, TranslateError>> {
    let handler = h.handler.clone();
    tokio::spawn(async move { handler.handle(request).await })
}

#[tokio::test(start_paused = true)]
async fn concurrent_identical_requests_share_one_production() {
    let (fetcher, gate) = FakeFetcher::gated();
    let h = Harness::new(fetcher);

    let first = tokio::spawn({
        let handler = h.handler.clone();
        async move { handler.handle(request(CH_309)).await }
    });
    settle_on(h.cache(), &key(CH_309), Some(EntryState::Pending)).await;

    let second = tokio::spawn({
        let handler = h.handler.clone();
        async move { handler.handle(request(CH_309)).await }
    });
    settle_count(&h.metrics, metric_names::CACHE_WAIT_REQUIRED, 1).await;
    gate.add_permits(16);

    let a = first.await.unwrap().unwrap();
    let b = second.await.unwrap().unwrap();
    assert!(a.same_stream(&b));
    assert_eq!(h.fetcher.calls(CH_309), 1);
    assert_eq!(h.metrics.count(metric_names::CACHE_ADMITTED), 1);
    assert_eq!(
        a.collect_text().await.unwrap(),
        format!(
            "translated: Here are the draft paragraphs you will be working with:\n<draft>\nraw {CH_309}\n</draft>"
        )
    );
}

#[tokio::test(start_paused = true)]
async fn primary_request_prefetches_next_chapter() {
    let h = Harness::new(FakeFetcher::default());

    let handle = h.handler.handle(request(CH_309)).await.unwrap();
    assert!(handle.collect_text().await.unwrap().contains(CH_309));

    settle_on(h.cache(), &key(CH_310), Some(EntryState::Succeeded)).await;
    assert_eq!(h.fetcher.calls(CH_310), 1);
    assert_eq!(h.metrics.count(metric_names::PREFETCH_STARTED), 1);

    // The wuxia prompt was used for both the chapter and its prefetch.
    let prompts = h.provider.system_prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts.iter().all(|p| p.contains("wuxia/xianxia")));

    // Reading on is now a hit and costs no fetch.
    let next = h.handler.handle(request(CH_310)).await.unwrap();
    assert!(next.collect_text().await.unwrap().contains(CH_310));
    assert_eq!(h.fetcher.calls(CH_310), 1);
    assert_eq!(h.metrics.count(metric_names::CACHE_HIT), 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_request_is_a_hit() {
    let h = Harness::new(FakeFetcher::default());

    let first = h.handler.handle(request(CH_309)).await.unwrap();
    let second = h.handler.handle(request(CH_309)).await.unwrap();
    assert!(first.same_stream(&second));
    assert_eq!(h.fetcher.calls(CH_309), 1);
}

#[tokio::test(start_paused = true)]
async fn ignore_cache_always_produces_and_overwrites() {
    let h = Harness::new(FakeFetcher::default());

    let first = h
        .handler
        .handle(request(CH_309).ignoring_cache(true))
        .await
        .unwrap();
    let second = h
        .handler
        .handle(request(CH_309).ignoring_cache(true))
        .await
        .unwrap();
    assert!(!first.same_stream(&second));
    assert_eq!(h.fetcher.calls(CH_309), 2);
    assert_eq!(h.metrics.count(metric_names::CACHE_BYPASS), 2);

    // The latest bypassing result is what later readers get.
    let cached = h.handler.handle(request(CH_309)).await.unwrap();
    assert!(cached.same_stream(&second));
    assert_eq!(h.fetcher.calls(CH_309), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_bypassing_requests_each_produce() {
    let (fetcher, gate) = FakeFetcher::gated();
    let h = Harness::new(fetcher);

    // An admitted producer already holds the key.
    let admitted = spawn_handle(&h, request(CH_309));
    settle_on(h.cache(), &key(CH_309), Some(EntryState::Pending)).await;

    let first = spawn_handle(&h, request(CH_309).ignoring_cache(true));
    let second = spawn_handle(&h, request(CH_309).ignoring_cache(true));

    // Neither bypass waited on the Pending entry: all three fetches are in flight.
    settle_fetches(&h.fetcher, CH_309, 3).await;
    assert_eq!(h.metrics.count(metric_names::CACHE_WAIT_REQUIRED), 0);
    gate.add_permits(16);

    let a = first.await.unwrap().unwrap();
    let b = second.await.unwrap().unwrap();
    let c = admitted.await.unwrap().unwrap();
    assert!(!a.same_stream(&b));
    assert!(!a.same_stream(&c) && !b.same_stream(&c));
    assert_eq!(h.metrics.count(metric_names::CACHE_BYPASS), 2);
    assert_eq!(h.cache().state(&key(CH_309)), Some(EntryState::Succeeded));
}

#[tokio::test(start_paused = true)]
async fn failed_stream_is_not_replayed() {
    let h = Harness::new(FakeFetcher::default());
    h.provider.fail_streams("quota exceeded mid-stream");

    let first = h.handler.handle(request(CH_309)).await.unwrap();
    assert_eq!(
        first.collect_text().await,
        Err(TranslateError::ProviderError("quota exceeded mid-stream".into()))
    );
    settle_on(h.cache(), &key(CH_309), None).await;
    settle_count(&h.metrics, metric_names::STREAM_FAILED, 2).await;

    h.provider.heal_streams();
    let retry = h.handler.handle(request(CH_309)).await.unwrap();
    assert!(!retry.same_stream(&first));
    assert!(retry.collect_text().await.unwrap().contains(CH_309));
    assert_eq!(h.fetcher.calls(CH_309), 2);
    assert_eq!(h.cache().state(&key(CH_309)), Some(EntryState::Succeeded));
}

#[tokio::test(start_paused = true)]
async fn ignore_cache_does_not_prefetch() {
    let h = Harness::new(FakeFetcher::default());

    h.handler
        .handle(request(CH_309).ignoring_cache(true))
        .await
        .unwrap();
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.fetcher.calls(CH_310), 0);
    assert_eq!(h.cache().state(&key(CH_310)), None);
}

#[tokio::test(start_paused = true)]
async fn failed_production_clears_entry_and_retry_starts_over() {
    let fetcher = FakeFetcher::default();
    fetcher.fail_on(CH_309);
    let h = Harness::new(fetcher);

    let err = h.handler.handle(request(CH_309)).await.unwrap_err();
    assert!(matches!(err, TranslateError::FetchError(_)));
    assert_eq!(h.cache().state(&key(CH_309)), None);
    assert_eq!(h.metrics.count(metric_names::PIPELINE_FAILED), 1);
    // A failed primary request does not prefetch.
    assert_eq!(h.fetcher.calls(CH_310), 0);

    h.fetcher.recover(CH_309);
    let handle = h.handler.handle(request(CH_309)).await.unwrap();
    assert!(handle.collect_text().await.unwrap().contains(CH_309));
    assert_eq!(h.fetcher.calls(CH_309), 2);
    assert_eq!(h.cache().state(&key(CH_309)), Some(EntryState::Succeeded));
}

#[tokio::test(start_paused = true)]
async fn waiter_times_out_and_leaves_entry_pending() {
    let (fetcher, _gate) = FakeFetcher::gated();
    let h = Harness::new(fetcher);

    let _producer = tokio::spawn({
        let handler = h.handler.clone();
        async move { handler.handle(request(CH_309)).await }
    });
    settle_on(h.cache(), &key(CH_309), Some(EntryState::Pending)).await;

    let start = tokio::time::Instant::now();
    let err = h.handler.handle(request(CH_309)).await.unwrap_err();
    assert_eq!(err, TranslateError::Timeout);
    assert!(start.elapsed() >= Duration::from_secs(120));
    assert_eq!(h.cache().state(&key(CH_309)), Some(EntryState::Pending));
    assert_eq!(h.fetcher.calls(CH_309), 1);
}

#[tokio::test(start_paused = true)]
async fn waiter_does_not_see_producer_failure_until_timeout() {
    let (fetcher, gate) = FakeFetcher::gated();
    fetcher.fail_on(CH_309);
    let h = Harness::with_cache(
        fetcher,
        CacheConfig {
            wait_timeout: Duration::from_secs(9),
            ..CacheConfig::default()
        },
    );

    let producer = tokio::spawn({
        let handler = h.handler.clone();
        async move { handler.handle(request(CH_309)).await }
    });
    settle_on(h.cache(), &key(CH_309), Some(EntryState::Pending)).await;

    let waiter = tokio::spawn({
        let handler = h.handler.clone();
        async move { handler.handle(request(CH_309)).await }
    });
    settle_count(&h.metrics, metric_names::CACHE_WAIT_REQUIRED, 1).await;
    gate.add_permits(1);

    assert!(matches!(
        producer.await.unwrap(),
        Err(TranslateError::FetchError(_))
    ));
    assert_eq!(waiter.await.unwrap().unwrap_err(), TranslateError::Timeout);
}

#[tokio::test(start_paused = true)]
async fn production_outlives_a_cancelled_caller() {
    let (fetcher, gate) = FakeFetcher::gated();
    let h = Harness::new(fetcher);

    let caller = tokio::spawn({
        let handler = h.handler.clone();
        async move { handler.handle(request(CH_309)).await }
    });
    settle_on(h.cache(), &key(CH_309), Some(EntryState::Pending)).await;
    caller.abort();
    gate.add_permits(16);

    settle_on(h.cache(), &key(CH_309), Some(EntryState::Succeeded)).await;
    let handle = h.handler.handle(request(CH_309)).await.unwrap();
    assert!(handle.collect_text().await.unwrap().contains(CH_309));
    assert_eq!(h.fetcher.calls(CH_309), 1);
}

#[tokio::test(start_paused = true)]
async fn prefetch_failure_is_swallowed() {
    let fetcher = FakeFetcher::default();
    fetcher.fail_on(CH_310);
    let h = Harness::new(fetcher);

    let handle = h.handler.handle(request(CH_309)).await.unwrap();
    assert!(handle.collect_text().await.unwrap().contains(CH_309));

    settle_count(&h.metrics, metric_names::PREFETCH_FAILED, 1).await;
    assert_eq!(h.cache().state(&key(CH_310)), None);
}

#[tokio::test(start_paused = true)]
async fn url_without_chapter_number_skips_prefetch() {
    let h = Harness::new(FakeFetcher::default());

    let handle = h
        .handler
        .handle(request("https://example.com/about"))
        .await
        .unwrap();
    assert!(handle.collect_text().await.unwrap().contains("example.com/about"));
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.metrics.count(metric_names::PREFETCH_STARTED), 0);
    assert_eq!(h.cache().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn modes_and_models_are_cached_separately() {
    let h = Harness::new(FakeFetcher::default());

    let wuxia = h.handler.handle(request(CH_309)).await.unwrap();
    let novel = h
        .handler
        .handle(TranslationRequest::new(CH_309, Mode::LightNovel, ModelKind::Google))
        .await
        .unwrap();
    let anthropic = h
        .handler
        .handle(TranslationRequest::new(CH_309, Mode::Wuxia, ModelKind::Anthropic))
        .await
        .unwrap();
    assert!(!wuxia.same_stream(&novel));
    assert!(!wuxia.same_stream(&anthropic));
    assert_eq!(h.fetcher.calls(CH_309), 3);
}
