use actix_web::http::header;
use actix_web::HttpRequest;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token does not identify a user")]
    MissingSubject,

    #[error("Authentication is not configured")]
    NotConfigured,
}

/// Access-token claims; the user id is `sub` or the `user_id` claim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    pub exp: usize,
}

impl Claims {
    pub fn user_id(&self) -> Option<i64> {
        self.user_id
            .or_else(|| self.sub.as_deref().and_then(|s| s.parse().ok()))
    }
}

/// Validates HS256 bearer tokens issued by the platform
pub struct Authenticator {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl Authenticator {
    /// An empty secret rejects every request
    pub fn new(secret: &str) -> Self {
        let key = if secret.is_empty() {
            None
        } else {
            Some(DecodingKey::from_secret(secret.as_bytes()))
        };

        Self {
            key,
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Authenticated user id for the request
    pub fn authenticate(&self, req: &HttpRequest) -> Result<i64, AuthError> {
        let key = self.key.as_ref().ok_or(AuthError::NotConfigured)?;

        let token = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let data = decode::<Claims>(token, key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        data.claims.user_id().ok_or(AuthError::MissingSubject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token(claims: &Claims, secret: &str) -> String {
        encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn claims(sub: Option<&str>, user_id: Option<i64>) -> Claims {
        Claims {
            sub: sub.map(str::to_string),
            user_id,
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        }
    }

    fn request(token: &str) -> HttpRequest {
        TestRequest::default()
            .insert_header((header::AUTHORIZATION, format!("Bearer {}", token)))
            .to_http_request()
    }

    #[test]
    fn test_valid_token_with_sub() {
        let auth = Authenticator::new(SECRET);
        let req = request(&token(&claims(Some("42"), None), SECRET));
        assert_eq!(auth.authenticate(&req).unwrap(), 42);
    }

    #[test]
    fn test_user_id_claim() {
        let auth = Authenticator::new(SECRET);
        let req = request(&token(&claims(None, Some(7)), SECRET));
        assert_eq!(auth.authenticate(&req).unwrap(), 7);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let auth = Authenticator::new(SECRET);
        let req = request(&token(&claims(Some("42"), None), "other"));
        assert!(matches!(auth.authenticate(&req), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_missing_header() {
        let auth = Authenticator::new(SECRET);
        let req = TestRequest::default().to_http_request();
        assert!(matches!(auth.authenticate(&req), Err(AuthError::MissingToken)));
    }

    #[test]
    fn test_unconfigured_rejects_everything() {
        let auth = Authenticator::new("");
        let req = request(&token(&claims(Some("42"), None), ""));
        assert!(matches!(auth.authenticate(&req), Err(AuthError::NotConfigured)));
    }
}
