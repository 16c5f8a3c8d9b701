//! Authentication
//!
//! Users log in through GitHub OAuth; the server then issues its own signed
//! bearer token carrying the user identity. Authenticated routes extract
//! `AuthUser` from the `Authorization` header and reject missing or invalid
//! tokens with 401.

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::ApiError;
use crate::models::User;
use crate::server::AppState;

/// The identity embedded in issued tokens, echoed by `/api/auth/me`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: i32,
    pub username: String,
    pub github_id: String,
    pub avatar_url: Option<String>,
    pub name: Option<String>,
    pub eth_address: Option<String>,
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            github_id: user.github_id.clone(),
            avatar_url: user.avatar_url.clone(),
            name: user.name.clone(),
            eth_address: user.eth_address.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i32,
    username: String,
    github_id: String,
    avatar_url: Option<String>,
    name: Option<String>,
    eth_address: Option<String>,
    iat: i64,
    exp: i64,
}

/// Mints and verifies the server's bearer tokens.
pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_hours: i64,
}

impl TokenAuthority {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_hours,
        }
    }

    pub fn issue(&self, user: &AuthUser) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id,
            username: user.username.clone(),
            github_id: user.github_id.clone(),
            avatar_url: user.avatar_url.clone(),
            name: user.name.clone(),
            eth_address: user.eth_address.clone(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::hours(self.ttl_hours)).timestamp(),
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Option<AuthUser> {
        let data = match decode::<Claims>(token, &self.decoding, &Validation::default()) {
            Ok(data) => data,
            Err(e) => {
                debug!("Token verification failed: {}", e);
                return None;
            }
        };

        let claims = data.claims;
        Some(AuthUser {
            id: claims.sub,
            username: claims.username,
            github_id: claims.github_id,
            avatar_url: claims.avatar_url,
            name: claims.name,
            eth_address: claims.eth_address,
        })
    }
}

/// Pull the bearer token out of the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(|| {
            ApiError::Unauthorized("Unauthorized: No token provided".into())
        })?;

        state
            .tokens
            .verify(token)
            .ok_or_else(|| ApiError::Unauthorized("Unauthorized: Invalid token".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> AuthUser {
        AuthUser {
            id: 7,
            username: "alice".to_string(),
            github_id: "1001".to_string(),
            avatar_url: Some("https://avatars.example/alice".to_string()),
            name: Some("Alice".to_string()),
            eth_address: None,
        }
    }

    #[test]
    fn test_issue_and_verify_round_trip() {
        let authority = TokenAuthority::new("test_secret", 1);
        let token = authority.issue(&sample_user()).unwrap();

        let verified = authority.verify(&token).unwrap();
        assert_eq!(verified.id, 7);
        assert_eq!(verified.username, "alice");
        assert_eq!(verified.github_id, "1001");
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let authority = TokenAuthority::new("test_secret", 1);
        let token = authority.issue(&sample_user()).unwrap();

        let other = TokenAuthority::new("different_secret", 1);
        assert!(other.verify(&token).is_none());
    }

    #[test]
    fn test_verify_rejects_expired_token() {
        // Issued already two hours past expiry; beyond validation leeway
        let authority = TokenAuthority::new("test_secret", -2);
        let token = authority.issue(&sample_user()).unwrap();
        assert!(authority.verify(&token).is_none());
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let authority = TokenAuthority::new("test_secret", 1);
        assert!(authority.verify("not.a.token").is_none());
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert("Authorization", "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert("Authorization", "Basic abc123".parse().unwrap());
        assert!(bearer_token(&headers).is_none());

        headers.insert("Authorization", "Bearer ".parse().unwrap());
        assert!(bearer_token(&headers).is_none());
    }
}
