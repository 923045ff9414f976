use actix_cors::Cors;
use actix_web::{error, http::StatusCode, middleware, web, App, HttpResponse, HttpServer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use tutor_match::bootstrap;
use tutor_match::config::Settings;
use tutor_match::core::{CandidateSelector, FeatureExtractor, Matcher, Ranker};
use tutor_match::routes::{self, AppState, Authenticator};
use tutor_match::services::{CacheManager, EmbeddingStore, OrderSource, PostgresClient, TutorDirectory};

/// JSON error response for JSON payload errors
#[derive(Debug, serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

impl std::fmt::Display for JsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

impl std::error::Error for JsonError {}

impl error::ResponseError for JsonError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::BAD_REQUEST))
            .json(self)
    }
}

/// Handle JSON payload errors
pub fn handle_json_payload_error(err: error::JsonPayloadError, req: &actix_web::HttpRequest) -> actix_web::Error {
    tracing::info!("JSON payload error on {}: {}", req.path(), err);
    JsonError {
        error: "invalid_json".to_string(),
        message: format!("Invalid JSON: {}", err),
        status_code: 400,
    }
    .into()
}

fn config_error(e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    let settings = Settings::load().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        config_error(e)
    })?;

    bootstrap::init_tracing(&settings.logging);

    info!("Starting tutor matching service...");

    // PostgreSQL: orders, tutors and the embedding cache table
    let db_max_conn = settings.database.max_connections.unwrap_or(10);
    let db_min_conn = settings.database.min_connections.unwrap_or(1);

    let postgres = Arc::new(
        PostgresClient::new(&settings.database.url, db_max_conn, db_min_conn)
            .await
            .map_err(|e| {
                error!("Failed to connect to PostgreSQL: {}", e);
                config_error(e)
            })?,
    );

    info!("PostgreSQL client initialized (max: {} connections)", db_max_conn);

    // Response cache (Redis optional)
    let cache_ttl = settings.cache.ttl_secs.unwrap_or(3600);
    let l1_cache_size = settings.cache.l1_cache_size.unwrap_or(10_000);
    let cache = Arc::new(
        CacheManager::new(settings.cache.redis_url.as_deref(), l1_cache_size, cache_ttl).await,
    );

    info!("Cache manager initialized (L1: {} entries, TTL: {}s)", l1_cache_size, cache_ttl);

    // Ranking strategy is chosen once, here
    let ranker = Arc::new(Ranker::from_artifact_path(&settings.ranking.model_path));
    info!("Ranking strategy: {}", ranker.strategy_name());

    let embedding_store: Arc<dyn EmbeddingStore> = postgres.clone();
    let openai = bootstrap::openai_client(&settings);
    let embeddings = bootstrap::embedding_cache(&settings, embedding_store.clone(), openai.as_ref());

    let directory: Arc<dyn TutorDirectory> = postgres.clone();
    let matcher = Matcher::new(directory, ranker)
        .with_selector(CandidateSelector::new(settings.matching.max_candidates))
        .with_extractor(FeatureExtractor::new(embeddings))
        .with_reranker(bootstrap::reranker(&settings, openai.as_ref()))
        .with_request_budget(settings.matching.request_budget());

    if settings.auth.jwt_secret.is_empty() {
        error!("auth.jwt_secret is not set, all match requests will be rejected");
    }

    let cleanup = bootstrap::spawn_embedding_cleanup(
        embedding_store,
        settings.embedding_cache.retention_days,
        Duration::from_secs(settings.embedding_cache.cleanup_interval_secs),
    );

    let orders: Arc<dyn OrderSource> = postgres.clone();
    let app_state = AppState {
        orders,
        cache,
        matcher,
        auth: Arc::new(Authenticator::new(&settings.auth.jwt_secret)),
        postgres: Some(postgres),
        default_limit: settings.matching.default_limit,
        max_limit: settings.matching.max_limit,
    };

    // Configure HTTP server
    let host = settings.server.host.clone();
    let port = settings.server.port;
    let workers = settings.server.workers.unwrap_or(4);

    info!("Starting HTTP server on {}:{}", host, port);

    let result = HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().error_handler(handle_json_payload_error))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes::configure_routes)
    })
    .workers(workers)
    .bind((host, port))?
    .run()
    .await;

    cleanup.abort();
    result
}
