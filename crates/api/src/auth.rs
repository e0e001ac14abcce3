//! Bearer-token authentication gate.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::AppState;
use crate::error::ApiError;

/// Role allowed to create and list top-ups.
pub const ADMIN_ROLE: &str = "admin";

/// Token claims issued by the login service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub role: String,
    pub exp: i64,
}

/// Caller identity resolved from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token has no role")]
    MissingRole,
}

/// Resolves a bearer token into a caller identity.
pub trait AuthGate: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// HS256 JWT implementation of [`AuthGate`].
///
/// A gate built from a blank secret rejects every token.
pub struct JwtAuthGate {
    has_secret: bool,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuthGate {
    pub fn new(secret: &str) -> Self {
        Self {
            has_secret: !secret.trim().is_empty(),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Signs a token for the given identity, valid for `ttl`.
    pub fn issue(&self, user_id: &str, role: &str, ttl: chrono::Duration) -> Result<String, AuthError> {
        let claims = Claims {
            user_id: user_id.to_string(),
            role: role.to_string(),
            exp: (chrono::Utc::now() + ttl).timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

impl AuthGate for JwtAuthGate {
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        if !self.has_secret {
            return Err(AuthError::InvalidToken("no signing secret configured".to_string()));
        }
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        if data.claims.role.trim().is_empty() {
            return Err(AuthError::MissingRole);
        }

        Ok(Identity {
            user_id: data.claims.user_id,
            role: data.claims.role,
        })
    }
}

/// Extractor admitting only callers with the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub Identity);

impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let identity = state.auth.authenticate(token)?;
        if identity.role != ADMIN_ROLE {
            tracing::warn!(user_id = %identity.user_id, role = %identity.role, "role not permitted");
            return Err(ApiError::Forbidden(format!(
                "role '{}' may not access this resource",
                identity.role
            )));
        }

        Ok(AdminUser(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_token_authenticates() {
        let gate = JwtAuthGate::new("secret");
        let token = gate
            .issue("U1", ADMIN_ROLE, chrono::Duration::hours(1))
            .unwrap();

        let identity = gate.authenticate(&token).unwrap();
        assert_eq!(identity.user_id, "U1");
        assert_eq!(identity.role, "admin");
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = JwtAuthGate::new("secret")
            .issue("U1", ADMIN_ROLE, chrono::Duration::hours(1))
            .unwrap();

        let result = JwtAuthGate::new("other").authenticate(&token);
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_blank_secret_rejects_every_token() {
        let gate = JwtAuthGate::new("");
        let token = gate
            .issue("U1", ADMIN_ROLE, chrono::Duration::hours(1))
            .unwrap();

        assert!(matches!(
            gate.authenticate(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let gate = JwtAuthGate::new("secret");
        let token = gate
            .issue("U1", ADMIN_ROLE, chrono::Duration::hours(-1))
            .unwrap();

        assert!(matches!(
            gate.authenticate(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_empty_role_is_rejected() {
        let gate = JwtAuthGate::new("secret");
        let token = gate.issue("U1", "", chrono::Duration::hours(1)).unwrap();

        assert!(matches!(gate.authenticate(&token), Err(AuthError::MissingRole)));
    }
}
