use serde::{Deserialize, Serialize};
use crate::models::domain::MatchResult;

/// Response for the match endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResponse {
    pub order_id: i64,
    pub matches: Vec<MatchResult>,
    pub total_found: usize,
    #[serde(default)]
    pub cached: bool,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub ranking_strategy: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}
