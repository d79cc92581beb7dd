use axum::{
    async_trait,
    extract::{FromRef, FromRequest, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;

use super::jwt::{TokenError, TokenIssuer};
use crate::{error::AppError, state::AppState, users::repo_types::User};

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

/// JSON body whose rejection is rendered as the error envelope.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

/// Authenticated user, loaded fresh from the repository on every request.
pub struct AuthUser(pub User);

fn access_token(parts: &Parts) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(cookie) = jar.get(ACCESS_COOKIE) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token =
            access_token(parts).ok_or_else(|| AppError::unauthorized("Unauthorized request"))?;

        let claims = TokenIssuer::from_ref(state)
            .verify_access(&token)
            .map_err(|e| {
                warn!(error = %e, "access token rejected");
                match e {
                    TokenError::Expired => AppError::unauthorized("Access token expired"),
                    _ => AppError::unauthorized("Invalid access token"),
                }
            })?;

        let user = state.users.find_by_id(claims.sub).await?.ok_or_else(|| {
            warn!(user_id = %claims.sub, "access token for missing user");
            AppError::unauthorized("Invalid access token")
        })?;

        Ok(AuthUser(user))
    }
}
