// Service exports
pub mod cache;
pub mod directory;
pub mod embedding;
pub mod gate;
pub mod openai;
pub mod postgres;

pub use cache::{CacheError, CacheKey, CacheManager};
pub use directory::{
    DirectoryError, InMemoryOrderSource, InMemoryTutorDirectory, OrderSource, TutorDirectory,
    TutorVectorWriter,
};
pub use embedding::{
    refresh_tutor_embeddings, EmbeddingCache, EmbeddingStore, InMemoryEmbeddingStore, RefreshSummary, StoreError,
};
pub use gate::{Gate, GateError, ProviderError, RetryPolicy};
pub use openai::{ChatProvider, EmbeddingProvider, OpenAiClient, OpenAiConfig};
pub use postgres::{DataStats, PostgresClient, PostgresError};
