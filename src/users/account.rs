//! Account lifecycle: registration, profile updates, and media-field
//! updates through the media upload service.

use std::path::{Path, PathBuf};

use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use crate::users::dto::{PublicUser, UpdateDetailsRequest};
use crate::users::password::hash_password;
use crate::users::store::{NewUser, UserUpdate};

/// Registration input as assembled by the adapter: trimmed-to-be-validated
/// text fields plus local paths of the spooled upload files.
#[derive(Debug)]
pub struct RegisterInput {
    pub full_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub avatar: Option<PathBuf>,
    pub cover_image: Option<PathBuf>,
}

pub async fn register(state: &AppState, input: RegisterInput) -> Result<PublicUser, ApiError> {
    let full_name = input.full_name.trim();
    let email = input.email.trim();
    let username = input.username.trim().to_lowercase();
    let password = input.password.trim();
    if [full_name, email, username.as_str(), password]
        .iter()
        .any(|f| f.is_empty())
    {
        return Err(ApiError::BadRequest("all fields are compulsory".into()));
    }

    // Advisory duplicate check; the store's unique index remains the
    // authoritative signal on create.
    if state
        .store
        .find_one(Some(username.as_str()), Some(email))
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(
            "user with same email or username already exists".into(),
        ));
    }

    let avatar_path = input
        .avatar
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("avatar file is required".into()))?;

    // The upload itself may fail independent of the path check above.
    let avatar = state
        .media
        .upload(avatar_path)
        .await
        .ok_or_else(|| ApiError::BadRequest("avatar file is required".into()))?;

    let cover_image_url = match input.cover_image.as_deref() {
        Some(path) => state
            .media
            .upload(path)
            .await
            .map(|m| m.url)
            .unwrap_or_default(),
        None => String::new(),
    };

    let password_hash = hash_password(password)?;
    let created = state
        .store
        .create(NewUser {
            username: username.clone(),
            email: email.to_string(),
            full_name: full_name.to_string(),
            password_hash,
            avatar_url: avatar.url,
            cover_image_url,
        })
        .await?;

    // Re-fetch to confirm the record actually landed.
    let fetched = state.store.find_by_id(created.id).await?.ok_or_else(|| {
        ApiError::Internal("something went wrong while registering the user".into())
    })?;

    info!(user_id = %fetched.id, %username, "user registered");
    Ok(fetched.into())
}

pub async fn update_account_details(
    state: &AppState,
    user_id: Uuid,
    req: UpdateDetailsRequest,
) -> Result<PublicUser, ApiError> {
    if req.full_name.is_none() && req.email.is_none() {
        return Err(ApiError::BadRequest(
            "at least one of fullName or email is required".into(),
        ));
    }

    let updated = state
        .store
        .update(
            user_id,
            UserUpdate {
                full_name: req.full_name,
                email: req.email,
                ..Default::default()
            },
        )
        .await?
        .ok_or_else(|| ApiError::NotFound("user does not exist".into()))?;

    info!(%user_id, "account details updated");
    Ok(updated.into())
}

pub async fn update_avatar(
    state: &AppState,
    user_id: Uuid,
    file: Option<&Path>,
) -> Result<PublicUser, ApiError> {
    let path = file.ok_or_else(|| ApiError::BadRequest("avatar file is required".into()))?;
    let media = state
        .media
        .upload(path)
        .await
        .ok_or_else(|| ApiError::BadRequest("avatar upload failed".into()))?;

    let updated = state
        .store
        .update(
            user_id,
            UserUpdate {
                avatar_url: Some(media.url),
                ..Default::default()
            },
        )
        .await?
        .ok_or_else(|| ApiError::NotFound("user does not exist".into()))?;

    info!(%user_id, "avatar updated");
    Ok(updated.into())
}

pub async fn update_cover_image(
    state: &AppState,
    user_id: Uuid,
    file: Option<&Path>,
) -> Result<PublicUser, ApiError> {
    let path = file.ok_or_else(|| ApiError::BadRequest("cover image file is required".into()))?;
    let media = state
        .media
        .upload(path)
        .await
        .ok_or_else(|| ApiError::BadRequest("cover image upload failed".into()))?;

    let updated = state
        .store
        .update(
            user_id,
            UserUpdate {
                cover_image_url: Some(media.url),
                ..Default::default()
            },
        )
        .await?
        .ok_or_else(|| ApiError::NotFound("user does not exist".into()))?;

    info!(%user_id, "cover image updated");
    Ok(updated.into())
}

/// Return the authenticated user's sanitized record.
pub async fn current_user(state: &AppState, user_id: Uuid) -> Result<PublicUser, ApiError> {
    let user = state
        .store
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user does not exist".into()))?;
    Ok(user.into())
}
