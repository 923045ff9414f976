use actix_web::{web, HttpResponse, Responder};
use std::sync::Arc;
use validator::Validate;

use crate::core::Matcher;
use crate::models::{ErrorResponse, HealthResponse, MatchRequest, MatchResponse};
use crate::routes::auth::Authenticator;
use crate::services::{CacheKey, CacheManager, OrderSource, PostgresClient};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<dyn OrderSource>,
    pub cache: Arc<CacheManager>,
    pub matcher: Matcher,
    pub auth: Arc<Authenticator>,
    /// Checked by the health endpoint when present
    pub postgres: Option<Arc<PostgresClient>>,
    pub default_limit: u16,
    pub max_limit: u16,
}

/// Configure all match-related routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/health", web::get().to(health_check))
        .route("/match", web::post().to(create_match));
}

fn error_response(status: actix_web::http::StatusCode, error: &str, message: String) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse {
        error: error.to_string(),
        message,
        status_code: status.as_u16(),
    })
}

/// Health check endpoint
async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let db_healthy = match &state.postgres {
        Some(pg) => pg.health_check().await.unwrap_or(false),
        None => true,
    };

    let status = if db_healthy { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ranking_strategy: state.matcher.ranker().strategy_name().to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Match tutors to an order
///
/// POST /api/v1/match
///
/// Request body:
/// ```json
/// {
///   "order_id": 123,
///   "limit": 3
/// }
/// ```
async fn create_match(
    state: web::Data<AppState>,
    http_req: actix_web::HttpRequest,
    req: web::Json<MatchRequest>,
) -> impl Responder {
    use actix_web::http::StatusCode;

    let request_id = uuid::Uuid::new_v4();

    let user_id = match state.auth.authenticate(&http_req) {
        Ok(id) => id,
        Err(e) => {
            tracing::info!("Rejected match request: {}", e);
            return error_response(StatusCode::UNAUTHORIZED, "Unauthorized", e.to_string());
        }
    };

    if let Err(errors) = req.validate() {
        return error_response(StatusCode::BAD_REQUEST, "Validation failed", errors.to_string());
    }
    let Some(order_id) = req.order_id else {
        return error_response(StatusCode::BAD_REQUEST, "Validation failed", "order_id is required".to_string());
    };
    let limit = req.effective_limit(state.default_limit, state.max_limit);

    let order = match state.orders.get_order(order_id).await {
        Ok(Some(order)) => order,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, "Order not found", format!("Order {} does not exist", order_id));
        }
        Err(e) => {
            tracing::error!("Failed to load order {}: {}", order_id, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load order", e.to_string());
        }
    };

    if order.student_id != user_id {
        tracing::warn!("User {} requested matches for order {} owned by {}", user_id, order_id, order.student_id);
        return error_response(StatusCode::FORBIDDEN, "Forbidden", "Order belongs to another user".to_string());
    }

    let cache_key = CacheKey::matches(order_id, limit);
    match state.cache.get::<MatchResponse>(&cache_key).await {
        Ok(mut cached) => {
            tracing::debug!("Serving cached matches for order {}", order_id);
            cached.cached = true;
            return HttpResponse::Ok().json(cached);
        }
        Err(crate::services::CacheError::CacheMiss(_)) => {}
        Err(e) => tracing::warn!("Cache read failed for {}: {}", cache_key, e),
    }

    tracing::info!(%request_id, "Matching tutors for order {}, limit: {}", order_id, limit);

    let outcome = match state.matcher.get_matches(&order, limit).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Matching failed for order {}: {}", order_id, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Matching failed", e.to_string());
        }
    };

    let response = MatchResponse {
        order_id,
        total_found: outcome.total_found,
        matches: outcome.matches,
        cached: false,
    };

    if let Err(e) = state.cache.set(&cache_key, &response).await {
        tracing::warn!("Failed to cache matches for order {}: {}", order_id, e);
    }

    tracing::info!(
        %request_id,
        "Returning {} matches for order {} (reranked: {})",
        response.matches.len(),
        order_id,
        outcome.reranked
    );

    HttpResponse::Ok().json(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Ranker;
    use crate::models::{Order, SubjectRef, TutorCandidate};
    use crate::routes::auth::Claims;
    use crate::services::{InMemoryOrderSource, InMemoryTutorDirectory};
    use actix_web::{http::header, test, App};
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "route-secret";

    fn bearer(user_id: i64) -> String {
        let claims = Claims {
            sub: Some(user_id.to_string()),
            user_id: None,
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
        format!("Bearer {}", token)
    }

    fn state() -> AppState {
        let subject = SubjectRef { id: 1, name: "Math".to_string() };
        let order = Order {
            id: 10,
            student_id: 100,
            subject: subject.clone(),
            title: "Geometry".to_string(),
            description: String::new(),
            goal_text: String::new(),
            budget_min: 0.0,
            budget_max: 2000.0,
            format_online: true,
            format_offline: false,
            city: String::new(),
            region: String::new(),
            schedule: None,
        };
        let tutors = (1..=5)
            .map(|id| TutorCandidate {
                id,
                name: format!("Tutor {}", id),
                bio: String::new(),
                hourly_rate: 1000.0,
                rating: 3.0 + id as f64 * 0.3,
                rating_count: 10,
                experience_years: 2,
                city: String::new(),
                region: String::new(),
                is_verified: true,
                is_active: true,
                embedding: None,
                subjects: vec![subject.clone()],
                availability: None,
            })
            .collect();

        AppState {
            orders: Arc::new(InMemoryOrderSource::new(vec![order])),
            cache: Arc::new(CacheManager::l1_only(100, 60)),
            matcher: Matcher::new(Arc::new(InMemoryTutorDirectory::new(tutors)), Arc::new(Ranker::fallback())),
            auth: Arc::new(Authenticator::new(SECRET)),
            postgres: None,
            default_limit: 3,
            max_limit: 20,
        }
    }

    #[actix_web::test]
    async fn test_health_reports_strategy() {
        let app = test::init_service(App::new().app_data(web::Data::new(state())).configure(configure)).await;

        let resp: HealthResponse = test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health").to_request()).await;

        assert_eq!(resp.status, "healthy");
        assert_eq!(resp.ranking_strategy, "fallback");
    }

    #[actix_web::test]
    async fn test_match_owner_gets_results_then_cache() {
        let app = test::init_service(App::new().app_data(web::Data::new(state())).configure(configure)).await;

        let request = || {
            test::TestRequest::post()
                .uri("/match")
                .insert_header((header::AUTHORIZATION, bearer(100)))
                .set_json(serde_json::json!({"order_id": 10}))
                .to_request()
        };

        let first: MatchResponse = test::call_and_read_body_json(&app, request()).await;
        assert_eq!(first.matches.len(), 3);
        assert_eq!(first.matches[0].tutor.id, 5);
        assert!(!first.cached);

        let second: MatchResponse = test::call_and_read_body_json(&app, request()).await;
        assert!(second.cached);
        assert_eq!(second.matches.len(), 3);
    }

    #[actix_web::test]
    async fn test_match_status_codes() {
        let app = test::init_service(App::new().app_data(web::Data::new(state())).configure(configure)).await;

        let cases = [
            (None, serde_json::json!({"order_id": 10}), 401),
            (Some(bearer(100)), serde_json::json!({"limit": 3}), 400),
            (Some(bearer(100)), serde_json::json!({"order_id": 999}), 404),
            (Some(bearer(101)), serde_json::json!({"order_id": 10}), 403),
        ];

        for (auth, body, expected) in cases {
            let mut req = test::TestRequest::post().uri("/match").set_json(body);
            if let Some(auth) = auth {
                req = req.insert_header((header::AUTHORIZATION, auth));
            }
            let resp = test::call_service(&app, req.to_request()).await;
            assert_eq!(resp.status().as_u16(), expected);
        }
    }
}
