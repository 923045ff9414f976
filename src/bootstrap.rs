//! Wiring shared by the server and the admin binary

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::config::{LoggingSettings, Settings};
use crate::core::Reranker;
use crate::services::{EmbeddingCache, EmbeddingStore, Gate, OpenAiClient, OpenAiConfig};

/// Initialize logging. `LOG_LEVEL` / `LOG_FORMAT` override the settings.
pub fn init_tracing(logging: &LoggingSettings) {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| logging.level.clone());
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| logging.format.clone());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    if format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.json().init();
    }
}

/// Provider client, or `None` when no API key is configured
pub fn openai_client(settings: &Settings) -> Option<Arc<OpenAiClient>> {
    if !settings.openai_enabled() {
        tracing::warn!("OpenAI API key not set, semantic features and re-ranking disabled");
        return None;
    }

    let config = OpenAiConfig {
        base_url: settings.openai.base_url.clone(),
        api_key: settings.openai.api_key.clone(),
        embedding_model: settings.openai.embedding_model.clone(),
        embedding_dimensions: settings.openai.embedding_dimensions,
        chat_model: settings.openai.chat_model.clone(),
        temperature: settings.openai.temperature,
        request_timeout: Duration::from_millis(settings.gate.call_timeout_ms),
    };

    match OpenAiClient::new(config) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::error!("Failed to build OpenAI client: {}", e);
            None
        }
    }
}

pub fn embedding_cache(
    settings: &Settings,
    store: Arc<dyn EmbeddingStore>,
    client: Option<&Arc<OpenAiClient>>,
) -> Option<Arc<EmbeddingCache>> {
    let client = client?;
    Some(Arc::new(EmbeddingCache::new(
        store,
        client.clone(),
        Gate::new(settings.gate.retry_policy()),
    )))
}

pub fn reranker(settings: &Settings, client: Option<&Arc<OpenAiClient>>) -> Option<Reranker> {
    if !settings.matching.rerank_enabled {
        return None;
    }
    let client = client?;
    Some(
        Reranker::new(client.clone(), Gate::new(settings.gate.retry_policy()))
            .with_bio_excerpt_chars(settings.matching.bio_excerpt_chars),
    )
}

/// Periodically delete embedding cache entries past the retention window
pub fn spawn_embedding_cleanup(
    store: Arc<dyn EmbeddingStore>,
    retention_days: i64,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let cutoff = Utc::now() - chrono::Duration::days(retention_days);
            match store.purge_older_than(cutoff).await {
                Ok(purged) => tracing::info!("Embedding cache cleanup removed {} entries", purged),
                Err(e) => tracing::warn!("Embedding cache cleanup failed: {}", e),
            }
        }
    })
}
