use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::services::directory::TutorVectorWriter;
use crate::services::gate::{Gate, GateError};
use crate::services::openai::EmbeddingProvider;

/// Maximum characters kept in the stored display copy of the text
pub const DISPLAY_TEXT_CHARS: usize = 1000;

/// Errors from the embedding store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Immutable cache entry; created once, never updated
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingCacheEntry {
    pub text: String,
    pub text_hash: String,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// Append-only storage for embedding cache entries, unique by `text_hash`
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    async fn get(&self, text_hash: &str) -> Result<Option<EmbeddingCacheEntry>, StoreError>;

    /// Insert unless an entry with the same hash exists. Returns `false` when
    /// another writer got there first.
    async fn insert_if_absent(&self, entry: EmbeddingCacheEntry) -> Result<bool, StoreError>;

    /// Age-based cleanup, run off the request path
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Process-local store backed by moka; used in tests and when no database is configured
///
/// Unbounded: entries leave only through `purge_older_than`.
pub struct InMemoryEmbeddingStore {
    entries: moka::future::Cache<String, Arc<EmbeddingCacheEntry>>,
}

impl InMemoryEmbeddingStore {
    pub fn new() -> Self {
        Self {
            entries: moka::future::Cache::builder().build(),
        }
    }

    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryEmbeddingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingStore for InMemoryEmbeddingStore {
    async fn get(&self, text_hash: &str) -> Result<Option<EmbeddingCacheEntry>, StoreError> {
        Ok(self.entries.get(text_hash).await.map(|e| (*e).clone()))
    }

    async fn insert_if_absent(&self, entry: EmbeddingCacheEntry) -> Result<bool, StoreError> {
        let inserted = self
            .entries
            .entry(entry.text_hash.clone())
            .or_insert(Arc::new(entry))
            .await;
        Ok(inserted.is_fresh())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let stale: Vec<Arc<String>> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.created_at < cutoff)
            .map(|(key, _)| key)
            .collect();

        for key in &stale {
            self.entries.invalidate(key.as_str()).await;
        }
        Ok(stale.len() as u64)
    }
}

/// Outer whitespace does not change the cache key
pub fn normalize_text(text: &str) -> &str {
    text.trim()
}

/// Hex BLAKE3 digest of the full normalized text
pub fn text_hash(text: &str) -> String {
    blake3::hash(normalize_text(text).as_bytes()).to_hex().to_string()
}

fn display_copy(text: &str) -> String {
    text.chars().take(DISPLAY_TEXT_CHARS).collect()
}

/// Content-addressed text → vector cache in front of the embedding provider
pub struct EmbeddingCache {
    store: Arc<dyn EmbeddingStore>,
    provider: Arc<dyn EmbeddingProvider>,
    gate: Gate,
}

impl EmbeddingCache {
    pub fn new(store: Arc<dyn EmbeddingStore>, provider: Arc<dyn EmbeddingProvider>, gate: Gate) -> Self {
        Self { store, provider, gate }
    }

    /// Return the cached embedding for `text`, computing and storing it on a miss.
    ///
    /// `Ok(None)` means "no embedding": blank text, or the provider was
    /// unavailable after retries. Nothing is cached in that case.
    pub async fn get_or_compute(&self, text: &str) -> Result<Option<Vec<f32>>, GateError> {
        let text = normalize_text(text);
        if text.is_empty() {
            return Ok(None);
        }

        let hash = text_hash(text);

        match self.store.get(&hash).await {
            Ok(Some(entry)) => {
                tracing::trace!("Embedding cache hit: {}", hash);
                return Ok(Some(entry.vector));
            }
            Ok(None) => tracing::trace!("Embedding cache miss: {}", hash),
            Err(e) => tracing::warn!("Embedding cache read failed, computing anyway: {}", e),
        }

        let provider = Arc::clone(&self.provider);
        let vector = self
            .gate
            .call_with_retry("embedding", || {
                let provider = Arc::clone(&provider);
                let input = text.to_string();
                async move { provider.embed(&input).await }
            })
            .await?;

        let Some(vector) = vector else {
            return Ok(None);
        };

        let entry = EmbeddingCacheEntry {
            text: display_copy(text),
            text_hash: hash.clone(),
            vector: vector.clone(),
            created_at: Utc::now(),
        };

        match self.store.insert_if_absent(entry).await {
            Ok(true) => tracing::debug!("Cached embedding {}", hash),
            Ok(false) => tracing::debug!("Embedding {} already cached by a concurrent writer", hash),
            Err(e) => tracing::warn!("Failed to cache embedding {}: {}", hash, e),
        }

        Ok(Some(vector))
    }
}

/// Counts from one tutor embedding refresh run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub updated: usize,
    pub skipped: usize,
}

/// Recompute each tutor's bio embedding and write it back.
///
/// A tutor whose embedding or write fails is logged and skipped. Rejected
/// provider credentials stop the run, since every later call would fail too.
pub async fn refresh_tutor_embeddings(
    cache: &EmbeddingCache,
    tutors: Vec<(i64, String)>,
    writer: &dyn TutorVectorWriter,
) -> Result<RefreshSummary, GateError> {
    let mut summary = RefreshSummary::default();

    for (tutor_id, bio) in tutors {
        let vector = match cache.get_or_compute(&bio).await {
            Ok(Some(vector)) => vector,
            Ok(None) => {
                tracing::warn!("No embedding for tutor {}, provider unavailable", tutor_id);
                summary.skipped += 1;
                continue;
            }
            Err(e) if e.is_auth_failure() => return Err(e),
            Err(e) => {
                tracing::warn!("Embedding failed for tutor {}: {}", tutor_id, e);
                summary.skipped += 1;
                continue;
            }
        };

        match writer.update_tutor_vector(tutor_id, &vector).await {
            Ok(()) => summary.updated += 1,
            Err(e) => {
                tracing::warn!("Failed to store embedding for tutor {}: {}", tutor_id, e);
                summary.skipped += 1;
            }
        }
    }

    Ok(summary)
}
