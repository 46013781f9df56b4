//! Session lifecycle: credential verification, dual-token issuance, strict
//! refresh-token rotation, revocation, and password change.

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use crate::users::dto::{ChangePasswordRequest, LoginRequest, PublicUser};
use crate::users::password::{hash_password, verify_password};
use crate::users::store::UserUpdate;
use crate::users::tokens::{JwtKeys, TokenKind, TokenPair};

/// Verify credentials and open a session: mint a token pair and persist the
/// refresh half on the user record.
pub async fn login(
    state: &AppState,
    req: LoginRequest,
) -> Result<(PublicUser, TokenPair), ApiError> {
    let username = req
        .username
        .as_deref()
        .map(|u| u.trim().to_lowercase())
        .filter(|u| !u.is_empty());
    let email = req
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string);
    if username.is_none() && email.is_none() {
        return Err(ApiError::BadRequest("username or email is required".into()));
    }

    let user = state
        .store
        .find_one(username.as_deref(), email.as_deref())
        .await?
        .ok_or_else(|| ApiError::NotFound("user does not exist".into()))?;

    if !verify_password(&req.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login with invalid password");
        return Err(ApiError::Unauthorized("invalid user credentials".into()));
    }

    let keys = JwtKeys::new(&state.config.jwt);
    let pair = keys.issue_pair(&user)?;

    // Only the token field changes here; the write is a plain field-set
    // update with no other validation.
    let updated = state
        .store
        .update(
            user.id,
            UserUpdate {
                refresh_token: Some(Some(pair.refresh_token.clone())),
                ..Default::default()
            },
        )
        .await?
        .ok_or_else(|| ApiError::Internal("failed to persist refresh token".into()))?;

    info!(user_id = %updated.id, username = %updated.username, "user logged in");
    Ok((updated.into(), pair))
}

/// Revoke the session by clearing the stored refresh token. Idempotent.
pub async fn logout(state: &AppState, user_id: Uuid) -> Result<(), ApiError> {
    state
        .store
        .update(
            user_id,
            UserUpdate {
                refresh_token: Some(None),
                ..Default::default()
            },
        )
        .await?;
    info!(%user_id, "user logged out");
    Ok(())
}

/// Exchange a refresh token for a brand-new pair. Strict rotation: only the
/// most recently issued refresh token is honored, and a successful exchange
/// replaces it, bounding the replay window to one use.
pub async fn refresh(state: &AppState, incoming: Option<String>) -> Result<TokenPair, ApiError> {
    let incoming = incoming
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("unauthorized request".into()))?;

    let keys = JwtKeys::new(&state.config.jwt);
    let claims = keys
        .verify(&incoming, TokenKind::Refresh)
        .map_err(|_| ApiError::Unauthorized("invalid token".into()))?;

    let user = state
        .store
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("invalid token".into()))?;

    // Byte-for-byte comparison against the stored value catches stale or
    // replayed tokens that still carry a valid signature.
    if user.refresh_token.as_deref() != Some(incoming.as_str()) {
        warn!(user_id = %user.id, "stale or reused refresh token presented");
        return Err(ApiError::Unauthorized("refresh token expired or used".into()));
    }

    let pair = keys.issue_pair(&user)?;
    state
        .store
        .update(
            user.id,
            UserUpdate {
                refresh_token: Some(Some(pair.refresh_token.clone())),
                ..Default::default()
            },
        )
        .await?
        .ok_or_else(|| ApiError::Internal("failed to persist refresh token".into()))?;

    info!(user_id = %user.id, "token pair rotated");
    Ok(pair)
}

/// Replace the password after verifying the current one.
pub async fn change_password(
    state: &AppState,
    user_id: Uuid,
    req: ChangePasswordRequest,
) -> Result<(), ApiError> {
    let user = state
        .store
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user does not exist".into()))?;

    if !verify_password(&req.old_password, &user.password_hash)? {
        return Err(ApiError::BadRequest("invalid old password".into()));
    }

    let password_hash = hash_password(&req.new_password)?;
    state
        .store
        .update(
            user_id,
            UserUpdate {
                password_hash: Some(password_hash),
                ..Default::default()
            },
        )
        .await?;

    info!(%user_id, "password changed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::store::{NewUser, User};

    async fn seed_user(state: &AppState, username: &str, email: &str, password: &str) -> User {
        state
            .store
            .create(NewUser {
                username: username.into(),
                email: email.into(),
                full_name: "Test User".into(),
                password_hash: hash_password(password).unwrap(),
                avatar_url: "https://media.fake.local/avatar.png".into(),
                cover_image_url: String::new(),
            })
            .await
            .unwrap()
    }

    fn by_username(username: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username: Some(username.into()),
            email: None,
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn login_returns_sanitized_user_and_distinct_tokens() {
        let state = AppState::fake();
        let seeded = seed_user(&state, "alice", "alice@example.com", "correct").await;

        let (user, pair) = login(&state, by_username("alice", "correct")).await.unwrap();
        assert_eq!(user.id, seeded.id);
        assert!(!pair.access_token.is_empty());
        assert!(!pair.refresh_token.is_empty());
        assert_ne!(pair.access_token, pair.refresh_token);

        // Refresh token is persisted on the record.
        let stored = state.store.find_by_id(seeded.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some(pair.refresh_token.as_str()));

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password").is_none());
        assert!(json.get("refreshToken").is_none());
    }

    #[tokio::test]
    async fn login_by_email_works() {
        let state = AppState::fake();
        seed_user(&state, "alice", "alice@example.com", "correct").await;

        let req = LoginRequest {
            username: None,
            email: Some("alice@example.com".into()),
            password: "correct".into(),
        };
        assert!(login(&state, req).await.is_ok());
    }

    #[tokio::test]
    async fn login_requires_an_identifier() {
        let state = AppState::fake();
        let req = LoginRequest {
            username: None,
            email: None,
            password: "whatever".into(),
        };
        assert!(matches!(
            login(&state, req).await,
            Err(ApiError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn login_unknown_user_is_not_found() {
        let state = AppState::fake();
        assert!(matches!(
            login(&state, by_username("ghost", "pw")).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn login_wrong_password_leaves_refresh_token_unchanged() {
        let state = AppState::fake();
        let seeded = seed_user(&state, "alice", "alice@example.com", "correct").await;

        let err = login(&state, by_username("alice", "wrong")).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        let stored = state.store.find_by_id(seeded.id).await.unwrap().unwrap();
        assert!(stored.refresh_token.is_none());
    }

    #[tokio::test]
    async fn refresh_rotates_and_rejects_reuse() {
        let state = AppState::fake();
        seed_user(&state, "alice", "alice@example.com", "correct").await;
        let (_, pair) = login(&state, by_username("alice", "correct")).await.unwrap();
        let t1 = pair.refresh_token;

        let rotated = refresh(&state, Some(t1.clone())).await.unwrap();
        assert_ne!(rotated.refresh_token, t1);

        // The first token was invalidated by the rotation.
        let err = refresh(&state, Some(t1)).await.unwrap_err();
        match err {
            ApiError::Unauthorized(msg) => assert!(msg.contains("expired or used")),
            other => panic!("expected Unauthorized, got {other:?}"),
        }

        // The rotated token still works exactly once more.
        assert!(refresh(&state, Some(rotated.refresh_token)).await.is_ok());
    }

    #[tokio::test]
    async fn refresh_requires_a_token() {
        let state = AppState::fake();
        assert!(matches!(
            refresh(&state, None).await,
            Err(ApiError::Unauthorized(_))
        ));
        assert!(matches!(
            refresh(&state, Some(String::new())).await,
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn refresh_rejects_garbage_token() {
        let state = AppState::fake();
        let err = refresh(&state, Some("not-a-jwt".into())).await.unwrap_err();
        match err {
            ApiError::Unauthorized(msg) => assert_eq!(msg, "invalid token"),
            other => panic!("expected Unauthorized, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn logout_revokes_the_refresh_token() {
        let state = AppState::fake();
        let seeded = seed_user(&state, "alice", "alice@example.com", "correct").await;
        let (_, pair) = login(&state, by_username("alice", "correct")).await.unwrap();

        logout(&state, seeded.id).await.unwrap();
        let stored = state.store.find_by_id(seeded.id).await.unwrap().unwrap();
        assert!(stored.refresh_token.is_none());

        // A previously valid refresh token no longer works.
        assert!(matches!(
            refresh(&state, Some(pair.refresh_token)).await,
            Err(ApiError::Unauthorized(_))
        ));

        // Logging out again is fine.
        logout(&state, seeded.id).await.unwrap();
    }

    #[tokio::test]
    async fn change_password_rejects_wrong_old_password() {
        let state = AppState::fake();
        let seeded = seed_user(&state, "alice", "alice@example.com", "old-pass").await;
        let before = state
            .store
            .find_by_id(seeded.id)
            .await
            .unwrap()
            .unwrap()
            .password_hash;

        let err = change_password(
            &state,
            seeded.id,
            ChangePasswordRequest {
                old_password: "wrong".into(),
                new_password: "new-pass".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let after = state
            .store
            .find_by_id(seeded.id)
            .await
            .unwrap()
            .unwrap()
            .password_hash;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn change_password_switches_which_login_succeeds() {
        let state = AppState::fake();
        let seeded = seed_user(&state, "alice", "alice@example.com", "old-pass").await;

        change_password(
            &state,
            seeded.id,
            ChangePasswordRequest {
                old_password: "old-pass".into(),
                new_password: "new-pass".into(),
            },
        )
        .await
        .unwrap();

        assert!(login(&state, by_username("alice", "new-pass")).await.is_ok());
        assert!(matches!(
            login(&state, by_username("alice", "old-pass")).await,
            Err(ApiError::Unauthorized(_))
        ));
    }
}
