//! Chapterflow: streaming web-novel chapter translation with single-flight
//! result caching and next-chapter prefetch.

pub mod config;
pub mod metrics;
pub mod server;
pub mod translate;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use config::{Config, LogFormat};
use metrics::MetricsRegistry;
use translate::cache::ResultCache;
use translate::extract::ReaderClient;
use translate::glossary::NamesGlossary;
use translate::handler::RequestHandler;
use translate::pipeline::TranslationPipeline;
use translate::prompt::PromptStore;
use translate::provider::anthropic::AnthropicClient;
use translate::provider::deepseek::DeepSeekClient;
use translate::provider::gemini::GeminiClient;
use translate::provider::{ModelProvider, ProviderRouter};
use translate::ModelKind;

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chapterflow=debug,info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wire every component from `config`.
pub fn build_handler(
    config: &Config,
    metrics: Arc<MetricsRegistry>,
) -> anyhow::Result<Arc<RequestHandler>> {
    let glossary = NamesGlossary::load_from_file(&config.glossary_path).unwrap_or_else(|e| {
        warn!(path = %config.glossary_path.display(), error = %e, "glossary load failed, using empty");
        NamesGlossary::empty()
    });
    info!(names = glossary.len(), version = glossary.version(), "glossary loaded");
    let prompts = Arc::new(PromptStore::new(glossary));

    let fetcher = Arc::new(
        ReaderClient::new(config.reader_api_key.clone())
            .context("building reader client")?
            .with_base_url(config.reader_base_url.clone()),
    );

    let gemini: Arc<dyn ModelProvider> = Arc::new(
        GeminiClient::new(config.google_api_key.clone()).context("building gemini client")?,
    );
    let anthropic: Arc<dyn ModelProvider> = Arc::new(
        AnthropicClient::new(config.anthropic_api_key.clone())
            .context("building anthropic client")?,
    );
    let deepseek: Arc<dyn ModelProvider> = Arc::new(
        DeepSeekClient::new(config.deepseek_api_key.clone()).context("building deepseek client")?,
    );
    for (model, key) in [
        (ModelKind::Google, &config.google_api_key),
        (ModelKind::Anthropic, &config.anthropic_api_key),
        (ModelKind::Deepseek, &config.deepseek_api_key),
    ] {
        if key.is_none() {
            warn!(model = %model, "API key missing, requests for this model will fail");
        }
    }

    let router = ProviderRouter::new(config.thinking_budget)
        .register(ModelKind::Google, Arc::clone(&gemini))
        .register(ModelKind::Legacy, gemini)
        .register(ModelKind::Anthropic, anthropic)
        .register(ModelKind::Deepseek, deepseek);

    let cache = Arc::new(ResultCache::new(config.cache.clone()));
    let pipeline = Arc::new(TranslationPipeline::new(fetcher, prompts, router, metrics));
    Ok(Arc::new(RequestHandler::new(cache, pipeline)))
}

/// Run the server until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    let config = Config::from_env().context("reading configuration")?;
    init_tracing(config.log_format);
    info!(addr = %config.bind_addr, "chapterflow starting");

    let metrics = Arc::new(MetricsRegistry::new());
    let handler = build_handler(&config, Arc::clone(&metrics))?;

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("ctrl-c received"),
            Err(e) => warn!(error = %e, "ctrl-c handler failed, shutting down"),
        }
        signal.cancel();
    });

    server::serve(listener, handler, shutdown).await?;

    let mut summary: Vec<_> = metrics.summary().into_iter().collect();
    summary.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, s) in summary {
        info!(
            metric = %name,
            count = s.count,
            p50_us = s.p50_us,
            p95_us = s.p95_us,
            p99_us = s.p99_us,
            "timing summary"
        );
    }
    let mut counters: Vec<_> = metrics.counters().into_iter().collect();
    counters.sort();
    for (name, value) in counters {
        info!(counter = %name, value, "counter");
    }
    info!("chapterflow stopped");
    Ok(())
}
