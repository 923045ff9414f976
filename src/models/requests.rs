use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request to match tutors to an order
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MatchRequest {
    #[validate(required, range(min = 1))]
    #[serde(alias = "orderId")]
    pub order_id: Option<i64>,
    #[validate(range(min = 1))]
    #[serde(default)]
    pub limit: Option<u16>,
}

impl MatchRequest {
    /// Requested limit, falling back to the default and capped at `max_limit`
    pub fn effective_limit(&self, default_limit: u16, max_limit: u16) -> usize {
        self.limit.unwrap_or(default_limit).min(max_limit) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_order_id_fails_validation() {
        let req: MatchRequest = serde_json::from_str(r#"{"limit": 3}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_non_positive_order_id_fails_validation() {
        let req: MatchRequest = serde_json::from_str(r#"{"order_id": 0}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_limit_defaults_and_caps() {
        let req: MatchRequest = serde_json::from_str(r#"{"orderId": 7}"#).unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.effective_limit(3, 20), 3);

        let req: MatchRequest = serde_json::from_str(r#"{"order_id": 7, "limit": 500}"#).unwrap();
        assert_eq!(req.effective_limit(3, 20), 20);
    }
}
