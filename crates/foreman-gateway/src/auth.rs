//! Bearer-token authentication.
//!
//! Every API route requires `Authorization: Bearer <token>` with a
//! non-empty token. The daemon does not compare the token against a
//! server-side value; caller identity travels in the domain via
//! `approved_by`/`source`.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use foreman_kernel::EngineError;

use crate::error::ApiError;

/// Extractor that rejects the request with 401 unless a non-empty bearer
/// token is present.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|header| header.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| BearerToken(token.to_string()))
            .ok_or(ApiError(EngineError::AuthMissing))
    }
}
