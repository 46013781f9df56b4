use axum::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// User record as persisted in the credential store.
///
/// The password hash and the current refresh token never leave the server:
/// both are skipped on serialization, and responses go through
/// [`crate::users::dto::PublicUser`] anyway.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub avatar_url: String,
    pub cover_image_url: String,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Fields required to create a user. The id and timestamp are assigned by
/// the store.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub avatar_url: String,
    pub cover_image_url: String,
}

/// Partial field-set update. `None` leaves a field untouched; for the
/// refresh token, `Some(None)` clears the stored value.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub avatar_url: Option<String>,
    pub cover_image_url: Option<String>,
    pub refresh_token: Option<Option<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate {0}")]
    Duplicate(&'static str),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Credential store contract. Production uses [`PgStore`]; tests use
/// [`MemoryStore`] behind the same seam.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Lookup by username OR email; either filter may be absent.
    async fn find_one(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError>;

    /// Insert a new user. A unique-index violation on username or email is
    /// the authoritative duplicate signal and comes back as
    /// [`StoreError::Duplicate`].
    async fn create(&self, new: NewUser) -> Result<User, StoreError>;

    /// Apply a partial field-set update and return the updated record, or
    /// `None` if the user does not exist. The single-row update is the unit
    /// of atomicity; no cross-request locking.
    async fn update(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>, StoreError>;
}

const USER_COLUMNS: &str = "id, username, email, full_name, password_hash, \
     avatar_url, cover_image_url, refresh_token, created_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_unique_violation(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            let field = if db.constraint() == Some("users_email_key") {
                "email"
            } else {
                "username"
            };
            return StoreError::Duplicate(field);
        }
    }
    StoreError::Database(e)
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_one(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE ($1::text IS NOT NULL AND username = $1) \
                OR ($2::text IS NOT NULL AND email = $2)"
        ))
        .bind(username)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users \
             (username, email, full_name, password_hash, avatar_url, cover_image_url) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.full_name)
        .bind(&new.password_hash)
        .bind(&new.avatar_url)
        .bind(&new.cover_image_url)
        .fetch_one(&self.pool)
        .await
        .map_err(map_unique_violation)?;
        Ok(user)
    }

    async fn update(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>, StoreError> {
        let set_refresh = update.refresh_token.is_some();
        let refresh_value = update.refresh_token.flatten();
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET \
                full_name = COALESCE($2, full_name), \
                email = COALESCE($3, email), \
                password_hash = COALESCE($4, password_hash), \
                avatar_url = COALESCE($5, avatar_url), \
                cover_image_url = COALESCE($6, cover_image_url), \
                refresh_token = CASE WHEN $7 THEN $8 ELSE refresh_token END \
             WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(update.full_name)
        .bind(update.email)
        .bind(update.password_hash)
        .bind(update.avatar_url)
        .bind(update.cover_image_url)
        .bind(set_refresh)
        .bind(refresh_value)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_unique_violation)?;
        Ok(user)
    }
}

/// In-process store used by [`crate::state::AppState::fake`].
#[derive(Default)]
pub struct MemoryStore {
    users: std::sync::Mutex<Vec<User>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_update(user: &mut User, update: UserUpdate) {
    if let Some(v) = update.full_name {
        user.full_name = v;
    }
    if let Some(v) = update.email {
        user.email = v;
    }
    if let Some(v) = update.password_hash {
        user.password_hash = v;
    }
    if let Some(v) = update.avatar_url {
        user.avatar_url = v;
    }
    if let Some(v) = update.cover_image_url {
        user.cover_image_url = v;
    }
    if let Some(v) = update.refresh_token {
        user.refresh_token = v;
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_one(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().unwrap();
        Ok(users
            .iter()
            .find(|u| {
                username.is_some_and(|n| u.username == n)
                    || email.is_some_and(|e| u.email == e)
            })
            .cloned())
    }

    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.username == new.username) {
            return Err(StoreError::Duplicate("username"));
        }
        if users.iter().any(|u| u.email == new.email) {
            return Err(StoreError::Duplicate("email"));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            full_name: new.full_name,
            password_hash: new.password_hash,
            avatar_url: new.avatar_url,
            cover_image_url: new.cover_image_url,
            refresh_token: None,
            created_at: OffsetDateTime::now_utc(),
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn update(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>, StoreError> {
        let mut users = self.users.lock().unwrap();
        if let Some(new_email) = update.email.as_deref() {
            if users.iter().any(|u| u.id != id && u.email == new_email) {
                return Err(StoreError::Duplicate("email"));
            }
        }
        let Some(user) = users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        apply_update(user, update);
        Ok(Some(user.clone()))
    }
}
