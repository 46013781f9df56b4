use std::io::Write;
use std::path::Path;

use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use tempfile::NamedTempFile;
use tracing::instrument;

use crate::error::ApiError;
use crate::response::ApiResponse;
use crate::state::AppState;
use crate::users::dto::{
    AuthPayload, ChangePasswordRequest, LoginRequest, PublicUser, RefreshRequest,
    UpdateDetailsRequest,
};
use crate::users::extractors::AuthUser;
use crate::users::tokens::TokenPair;
use crate::users::{account, session};

const ACCESS_COOKIE: &str = "accessToken";
const REFRESH_COOKIE: &str = "refreshToken";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users/register", post(register))
        .route("/users/login", post(login))
        .route("/users/refresh-token", post(refresh_token))
        .route("/users/logout", post(logout))
        .route("/users/change-password", post(change_password))
        .route("/users/me", get(me).patch(update_details))
        .route("/users/me/avatar", patch(update_avatar))
        .route("/users/me/cover-image", patch(update_cover_image))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

fn secure_cookie(name: &'static str, value: String) -> Cookie<'static> {
    // Opaque to script access, sent only over secure transport.
    Cookie::build((name, value))
        .http_only(true)
        .secure(true)
        .path("/")
        .build()
}

fn with_auth_cookies(jar: CookieJar, pair: &TokenPair) -> CookieJar {
    jar.add(secure_cookie(ACCESS_COOKIE, pair.access_token.clone()))
        .add(secure_cookie(REFRESH_COOKIE, pair.refresh_token.clone()))
}

fn without_auth_cookies(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build((ACCESS_COOKIE, "")).path("/").build())
        .remove(Cookie::build((REFRESH_COOKIE, "")).path("/").build())
}

/// Spool an uploaded multipart field to a scoped temp file. The file is
/// removed when the returned guard drops, on every exit path.
async fn spool_upload(field: Field<'_>) -> Result<NamedTempFile, ApiError> {
    let suffix = field
        .file_name()
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    let data = field
        .bytes()
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {e}")))?;
    let mut tmp = tempfile::Builder::new()
        .prefix("clipstream-upload-")
        .suffix(&suffix)
        .tempfile()
        .map_err(|_| ApiError::Internal("failed to spool upload".into()))?;
    tmp.write_all(&data)
        .map_err(|_| ApiError::Internal("failed to spool upload".into()))?;
    Ok(tmp)
}

/// Pull a single named file field out of a multipart body, if present.
async fn single_file(mp: &mut Multipart, field_name: &str) -> Result<Option<NamedTempFile>, ApiError> {
    while let Some(field) = next_field(mp).await? {
        if field.name() == Some(field_name) {
            return Ok(Some(spool_upload(field).await?));
        }
    }
    Ok(None)
}

/// A mid-stream multipart error (truncated body, bad part headers) is the
/// client's fault, not an empty form.
async fn next_field(mp: &mut Multipart) -> Result<Option<Field<'_>>, ApiError> {
    mp.next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))
}

#[derive(Default)]
struct RegisterForm {
    full_name: String,
    email: String,
    username: String,
    password: String,
    avatar: Option<NamedTempFile>,
    cover_image: Option<NamedTempFile>,
}

#[instrument(skip(state, mp))]
async fn register(
    State(state): State<AppState>,
    mut mp: Multipart,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let mut form = RegisterForm::default();
    while let Some(field) = next_field(&mut mp).await? {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("fullName") => form.full_name = read_text(field).await?,
            Some("email") => form.email = read_text(field).await?,
            Some("username") => form.username = read_text(field).await?,
            Some("password") => form.password = read_text(field).await?,
            Some("avatar") => form.avatar = Some(spool_upload(field).await?),
            Some("coverImage") => form.cover_image = Some(spool_upload(field).await?),
            _ => {}
        }
    }

    let input = account::RegisterInput {
        full_name: form.full_name,
        email: form.email,
        username: form.username,
        password: form.password,
        avatar: form.avatar.as_ref().map(|f| f.path().to_path_buf()),
        cover_image: form.cover_image.as_ref().map(|f| f.path().to_path_buf()),
    };
    let user = account::register(&state, input).await?;
    // `form` still owns the temp files; they are cleaned up on drop here.
    Ok(ApiResponse::new(
        StatusCode::CREATED,
        user,
        "user registered successfully",
    ))
}

async fn read_text(field: Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart field: {e}")))
}

#[instrument(skip(state, jar, payload))]
async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, ApiResponse<AuthPayload>), ApiError> {
    let (user, pair) = session::login(&state, payload).await?;
    let jar = with_auth_cookies(jar, &pair);
    Ok((
        jar,
        ApiResponse::ok(
            AuthPayload { user, tokens: pair },
            "user logged in successfully",
        ),
    ))
}

#[instrument(skip(state, jar))]
async fn logout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<serde_json::Value>), ApiError> {
    session::logout(&state, user_id).await?;
    Ok((
        without_auth_cookies(jar),
        ApiResponse::ok(serde_json::json!({}), "user logged out"),
    ))
}

#[instrument(skip(state, jar, body))]
async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> Result<(CookieJar, ApiResponse<TokenPair>), ApiError> {
    let incoming = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| body.and_then(|Json(b)| b.refresh_token));
    let pair = session::refresh(&state, incoming).await?;
    let jar = with_auth_cookies(jar, &pair);
    Ok((jar, ApiResponse::ok(pair, "access token refreshed")))
}

#[instrument(skip(state, payload))]
async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    session::change_password(&state, user_id, payload).await?;
    Ok(ApiResponse::ok(
        serde_json::json!({}),
        "password changed successfully",
    ))
}

#[instrument(skip(state))]
async fn me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let user = account::current_user(&state, user_id).await?;
    Ok(ApiResponse::ok(user, "current user fetched successfully"))
}

#[instrument(skip(state, payload))]
async fn update_details(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<UpdateDetailsRequest>,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let user = account::update_account_details(&state, user_id, payload).await?;
    Ok(ApiResponse::ok(user, "account details updated successfully"))
}

#[instrument(skip(state, mp))]
async fn update_avatar(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut mp: Multipart,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let file = single_file(&mut mp, "avatar").await?;
    let user = account::update_avatar(&state, user_id, file.as_ref().map(|f| f.path())).await?;
    Ok(ApiResponse::ok(user, "avatar updated successfully"))
}

#[instrument(skip(state, mp))]
async fn update_cover_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut mp: Multipart,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let file = single_file(&mut mp, "coverImage").await?;
    let user =
        account::update_cover_image(&state, user_id, file.as_ref().map(|f| f.path())).await?;
    Ok(ApiResponse::ok(user, "cover image updated successfully"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::FromRequest;
    use axum::http::{header, Request};

    #[tokio::test]
    async fn truncated_multipart_is_a_bad_request() {
        // Opens an avatar part but the stream ends before the closing
        // boundary, as with an aborted upload.
        let body = "--BOUND\r\n\
            content-disposition: form-data; name=\"avatar\"; filename=\"a.png\"\r\n\
            \r\n\
            partial-bytes";
        let req = Request::builder()
            .header(
                header::CONTENT_TYPE,
                "multipart/form-data; boundary=BOUND",
            )
            .body(Body::from(body))
            .unwrap();
        let mut mp = Multipart::from_request(req, &()).await.unwrap();

        let err = single_file(&mut mp, "avatar")
            .await
            .expect_err("a truncated body must not read as an empty form");
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn auth_cookies_are_http_only_and_secure() {
        let jar = with_auth_cookies(
            CookieJar::new(),
            &TokenPair {
                access_token: "acc".into(),
                refresh_token: "ref".into(),
            },
        );
        for name in [ACCESS_COOKIE, REFRESH_COOKIE] {
            let cookie = jar.get(name).expect("cookie should be set");
            assert_eq!(cookie.http_only(), Some(true));
            assert_eq!(cookie.secure(), Some(true));
        }
    }

    #[test]
    fn logout_clears_both_cookies() {
        let jar = with_auth_cookies(
            CookieJar::new(),
            &TokenPair {
                access_token: "acc".into(),
                refresh_token: "ref".into(),
            },
        );
        let jar = without_auth_cookies(jar);
        assert!(jar.get(ACCESS_COOKIE).is_none());
        assert!(jar.get(REFRESH_COOKIE).is_none());
    }
}
