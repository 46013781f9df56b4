use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::{config::JwtConfig, state::AppState, users::store::User};

/// Token category. Access and refresh tokens are signed with independent
/// secrets and lifetimes.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT payload. Denormalized profile fields are embedded in access tokens
/// only; refresh tokens carry nothing but the subject id.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    pub iat: usize,
    pub exp: usize,
    pub kind: TokenKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Both halves of a freshly minted token pair. Only the refresh half is
/// mirrored onto the user record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Every verification failure collapses into `Invalid`; callers treat bad
/// signature, malformed payload, wrong kind, and expiry identically.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,
    #[error("token signing failed")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

#[derive(Clone)]
pub struct JwtKeys {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(cfg.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(cfg.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(cfg.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(cfg.refresh_secret.as_bytes()),
            access_ttl: Duration::from_secs((cfg.access_ttl_minutes as u64) * 60),
            refresh_ttl: Duration::from_secs((cfg.refresh_ttl_minutes as u64) * 60),
        }
    }

    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let key = match claims.kind {
            TokenKind::Access => &self.access_encoding,
            TokenKind::Refresh => &self.refresh_encoding,
        };
        let token = encode(&Header::default(), claims, key).map_err(TokenError::Signing)?;
        debug!(user_id = %claims.sub, kind = ?claims.kind, "jwt signed");
        Ok(token)
    }

    fn stamp(&self, kind: TokenKind) -> (usize, usize) {
        let now = OffsetDateTime::now_utc();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        (now.unix_timestamp() as usize, exp.unix_timestamp() as usize)
    }

    pub fn sign_access(&self, user: &User) -> Result<String, TokenError> {
        let (iat, exp) = self.stamp(TokenKind::Access);
        self.sign(&Claims {
            sub: user.id,
            iat,
            exp,
            kind: TokenKind::Access,
            username: Some(user.username.clone()),
            email: Some(user.email.clone()),
        })
    }

    pub fn sign_refresh(&self, user_id: Uuid) -> Result<String, TokenError> {
        let (iat, exp) = self.stamp(TokenKind::Refresh);
        self.sign(&Claims {
            sub: user_id,
            iat,
            exp,
            kind: TokenKind::Refresh,
            username: None,
            email: None,
        })
    }

    /// Mint a fresh access/refresh pair bound to the user's identity.
    pub fn issue_pair(&self, user: &User) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.sign_access(user)?,
            refresh_token: self.sign_refresh(user.id)?,
        })
    }

    /// Verify signature, expiry, and token kind against the secret for
    /// `kind`. Any failure is the same opaque `Invalid`.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        let key = match kind {
            TokenKind::Access => &self.access_decoding,
            TokenKind::Refresh => &self.refresh_decoding,
        };
        let data = decode::<Claims>(token, key, &Validation::default())
            .map_err(|_| TokenError::Invalid)?;
        if data.claims.kind != kind {
            return Err(TokenError::Invalid);
        }
        debug!(user_id = %data.claims.sub, kind = ?kind, "jwt verified");
        Ok(data.claims)
    }
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        Self::new(&state.config.jwt)
    }
}
