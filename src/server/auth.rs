//! Bearer token validation.
//!
//! Tokens are HS256 JWTs signed with `server.jwt_secret`. The principal is the
//! `sub` claim with any identity-provider prefix (`auth0|`) removed.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::server::AppState;
use crate::server::error::ApiError;
use crate::utils::error::RelayError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
}

pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKeys").finish_non_exhaustive()
    }
}

impl JwtKeys {
    pub fn from_secret(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Validate `token` and return its principal.
    pub fn verify(&self, token: &str) -> Result<String, RelayError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| RelayError::Auth(e.to_string()))?;
        let principal = principal_from_sub(&data.claims.sub);
        if principal.is_empty() {
            return Err(RelayError::Auth("empty subject".to_string()));
        }
        Ok(principal.to_string())
    }

    /// Sign a token for `sub` that expires after `ttl`.
    pub fn issue(&self, sub: &str, ttl: Duration) -> Result<String, RelayError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| RelayError::Auth(e.to_string()))?;
        let claims = Claims {
            sub: sub.to_string(),
            exp: (now + ttl).as_secs(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| RelayError::Auth(e.to_string()))
    }
}

/// `auth0|42` → `42`; a subject without `|` is returned unchanged.
pub fn principal_from_sub(sub: &str) -> &str {
    sub.rsplit_once('|').map_or(sub, |(_, principal)| principal)
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

/// Authenticated caller, from `Authorization: Bearer <jwt>` or the
/// `access_token` query parameter (browsers cannot set headers on a
/// WebSocket handshake).
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub principal: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| ApiError::unauthorized("Missing access token"))?;

        let principal = state.jwt.verify(&token).map_err(|e| {
            tracing::debug!(error = %e, "rejected access token");
            ApiError::unauthorized("Invalid or expired token")
        })?;

        Ok(AuthUser { principal })
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    header.or_else(|| {
        Query::<TokenQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.access_token)
            .filter(|t| !t.is_empty())
    })
}
