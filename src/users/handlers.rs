use axum::{
    extract::{
        multipart::{Field, MultipartRejection},
        DefaultBodyLimit, Multipart, Path, State,
    },
    routing::{get, patch, post},
    Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use tracing::instrument;

use super::{
    dto::{
        ChangePasswordRequest, LoginRequest, LoginResponse, PublicUser, RefreshRequest,
        RegisterForm, TokenResponse, UpdateDetailsRequest,
    },
    repo_types::{ChannelProfile, WatchedVideo},
    services::{self, ImageSlot},
};
use crate::{
    auth::{AuthUser, JsonBody, TokenPair, ACCESS_COOKIE, REFRESH_COOKIE},
    error::AppResult,
    media::UploadItem,
    response::{ApiResponse, Empty},
    state::AppState,
};

const UPLOAD_LIMIT: usize = 10 * 1024 * 1024;

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/register",
            post(register).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
        )
        .route("/login", post(login))
        .route("/refresh-token", post(refresh_token))
}

pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/change-password", post(change_password))
        .route("/current-user", get(current_user))
        .route("/update-details", patch(update_details))
        .route(
            "/change-user-avatar",
            patch(change_avatar).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
        )
        .route(
            "/change-user-coverimg",
            patch(change_cover_image).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
        )
        .route("/channel/:username", get(channel_profile))
        .route("/watch-history", get(watch_history))
}

fn session_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .path("/")
        .build()
}

fn session_cookies(jar: CookieJar, pair: &TokenPair, secure: bool) -> CookieJar {
    jar.add(session_cookie(ACCESS_COOKIE, pair.access_token.clone(), secure))
        .add(session_cookie(REFRESH_COOKIE, pair.refresh_token.clone(), secure))
}

/// Expires both cookies whether or not the request carried them (Bearer clients send none).
fn clear_session_cookies(jar: CookieJar, secure: bool) -> CookieJar {
    let expired = |name: &'static str| {
        let mut cookie = session_cookie(name, String::new(), secure);
        cookie.set_max_age(time::Duration::ZERO);
        cookie
    };
    jar.add(expired(ACCESS_COOKIE)).add(expired(REFRESH_COOKIE))
}

/// Reads a multipart file field; empty parts count as absent.
async fn read_file(field: Field<'_>) -> AppResult<Option<UploadItem>> {
    let content_type = field
        .content_type()
        .map(str::to_string)
        .unwrap_or_else(|| "application/octet-stream".into());
    let body = field.bytes().await?;
    if body.is_empty() {
        return Ok(None);
    }
    Ok(Some(UploadItem { body, content_type }))
}

/// Pulls the first file found under any of `names`.
async fn single_file(mut mp: Multipart, names: &[&str]) -> AppResult<Option<UploadItem>> {
    while let Some(field) = mp.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if names.contains(&name.as_str()) {
            return read_file(field).await;
        }
    }
    Ok(None)
}

/// POST /register (multipart: username, email, fullname, password, avatar, coverImg?)
#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    mp: Result<Multipart, MultipartRejection>,
) -> AppResult<ApiResponse<PublicUser>> {
    let mut mp = mp?;
    let mut form = RegisterForm::default();
    while let Some(field) = mp.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "username" => form.username = field.text().await?,
            "email" => form.email = field.text().await?,
            "fullname" | "fullName" => form.full_name = field.text().await?,
            "password" => form.password = field.text().await?,
            "avatar" => form.avatar = read_file(field).await?,
            "coverImg" | "coverImage" => form.cover_image = read_file(field).await?,
            _ => {}
        }
    }

    let user = services::register(&state, form).await?;
    Ok(ApiResponse::created(user, "User registered successfully"))
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    JsonBody(req): JsonBody<LoginRequest>,
) -> AppResult<(CookieJar, ApiResponse<LoginResponse>)> {
    let (user, pair) = services::login(&state, req).await?;
    let jar = session_cookies(jar, &pair, state.config.cookie_secure);
    Ok((
        jar,
        ApiResponse::ok(
            LoginResponse {
                user,
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
            "User logged in successfully",
        ),
    ))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    AuthUser(user): AuthUser,
) -> AppResult<(CookieJar, ApiResponse<Empty>)> {
    services::logout(&state, user.id).await?;
    Ok((
        clear_session_cookies(jar, state.config.cookie_secure),
        ApiResponse::ok(Empty::default(), "User logged out"),
    ))
}

/// POST /refresh-token (cookie `refreshToken`, else body `refreshToken`)
#[instrument(skip_all)]
pub async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Option<JsonBody<RefreshRequest>>,
) -> AppResult<(CookieJar, ApiResponse<TokenResponse>)> {
    let presented = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| body.and_then(|JsonBody(b)| b.refresh_token));

    let pair = services::refresh_session(&state, presented).await?;
    let jar = session_cookies(jar, &pair, state.config.cookie_secure);
    Ok((
        jar,
        ApiResponse::ok(
            TokenResponse {
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
            "Access token refreshed",
        ),
    ))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    JsonBody(req): JsonBody<ChangePasswordRequest>,
) -> AppResult<ApiResponse<Empty>> {
    services::change_password(&state, user.id, req).await?;
    Ok(ApiResponse::ok(Empty::default(), "Password changed successfully"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn current_user(AuthUser(user): AuthUser) -> ApiResponse<PublicUser> {
    ApiResponse::ok(PublicUser::from(user), "Current user fetched successfully")
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_details(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    JsonBody(req): JsonBody<UpdateDetailsRequest>,
) -> AppResult<ApiResponse<PublicUser>> {
    let user = services::update_details(&state, user.id, req).await?;
    Ok(ApiResponse::ok(user, "Account details updated successfully"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn change_avatar(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mp: Result<Multipart, MultipartRejection>,
) -> AppResult<ApiResponse<PublicUser>> {
    let file = single_file(mp?, &["avatar"]).await?;
    let user = services::replace_image(&state, &user, ImageSlot::Avatar, file).await?;
    Ok(ApiResponse::ok(user, "Avatar updated successfully"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn change_cover_image(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mp: Result<Multipart, MultipartRejection>,
) -> AppResult<ApiResponse<PublicUser>> {
    let file = single_file(mp?, &["coverImg", "coverImage"]).await?;
    let user = services::replace_image(&state, &user, ImageSlot::Cover, file).await?;
    Ok(ApiResponse::ok(user, "Cover image updated successfully"))
}

#[instrument(skip(state, user), fields(viewer = %user.id))]
pub async fn channel_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(username): Path<String>,
) -> AppResult<ApiResponse<ChannelProfile>> {
    let profile = services::channel_profile(&state, &username, user.id).await?;
    Ok(ApiResponse::ok(profile, "Channel fetched successfully"))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn watch_history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<ApiResponse<Vec<WatchedVideo>>> {
    let history = services::watch_history(&state, user.id).await?;
    Ok(ApiResponse::ok(history, "Watch history fetched successfully"))
}
