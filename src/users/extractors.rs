use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiError;
use crate::users::tokens::{JwtKeys, TokenKind};

/// Resolves the authenticated identity from a Bearer access token. The user
/// id is threaded explicitly into every manager call from here.
#[derive(Debug)]
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("unauthorized request".into()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .or_else(|| auth_header.strip_prefix("bearer "))
            .ok_or_else(|| ApiError::Unauthorized("unauthorized request".into()))?;

        let claims = keys.verify(token, TokenKind::Access).map_err(|_| {
            warn!("invalid or expired access token");
            ApiError::Unauthorized("invalid token".into())
        })?;

        Ok(AuthUser(claims.sub))
    }
}
